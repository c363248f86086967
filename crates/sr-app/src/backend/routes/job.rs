use std::sync::Arc;

use axum::Json;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use sr_core::{JobId, Subscription};
use tracing::{debug, info, warn};

use crate::backend::schemas::{JobCancelResponse, JobCreateResponse, JobStatusResponse, StoryVideoRequest};
use crate::backend::state::AppState;
use crate::error::AppError;

fn parse_id(raw: &str) -> Result<JobId, AppError> {
    raw.parse().map_err(|_| AppError::InvalidJobId(raw.to_string()))
}

pub async fn create_story_video(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StoryVideoRequest>,
) -> Result<Json<JobCreateResponse>, AppError> {
    let id = state.coordinator().submit(req.into()).await?;
    info!(job_id = %id, "story video job accepted");
    Ok(Json(JobCreateResponse {
        job_id: id.to_string(),
        message: "Video processing started. Use the job_id to check status.".into(),
    }))
}

pub async fn get_story_video_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, AppError> {
    let job = state.coordinator().status(parse_id(&id)?).await?;
    Ok(Json(JobStatusResponse::from(&job)))
}

pub async fn get_story_video(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let artifact = state.coordinator().result(parse_id(&id)?).await?;
    let bytes = tokio::fs::read(&artifact.path).await?;
    let disposition = format!("attachment; filename=\"{}\"", artifact.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

pub async fn cancel_story_video(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobCancelResponse>, AppError> {
    let id = parse_id(&id)?;
    let cancelled = state.coordinator().cancel(id).await?;
    let message = if cancelled {
        "Cancellation requested"
    } else {
        "Job already finished"
    };
    Ok(Json(JobCancelResponse {
        job_id: id.to_string(),
        cancelled,
        message: message.into(),
    }))
}

pub async fn story_video_ws(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let id = parse_id(&id)?;
    let updates = state.coordinator().subscribe(id).await?;
    Ok(ws.on_upgrade(move |socket| push_updates(socket, id, updates)))
}

/// Forward job snapshots until the job is terminal or the client leaves.
async fn push_updates(mut socket: WebSocket, id: JobId, mut updates: Subscription) {
    loop {
        let next = tokio::select! {
            next = updates.next() => next,
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    debug!(job_id = %id, "status socket closed by client");
                    return;
                }
                Some(Err(e)) => {
                    debug!(job_id = %id, error = %e, "status socket errored");
                    return;
                }
                Some(Ok(_)) => continue,
            },
        };

        let Some(job) = next else { break };
        let payload = match serde_json::to_string(&JobStatusResponse::from(&job)) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(job_id = %id, error = %e, "failed to encode status");
                break;
            }
        };
        if socket.send(Message::Text(payload.into())).await.is_err() {
            return;
        }
    }

    let _ = socket.send(Message::Close(None)).await;
}
