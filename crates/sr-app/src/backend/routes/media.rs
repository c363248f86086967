use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use tracing::info;
use uuid::Uuid;

use crate::backend::schemas::{TtsRequest, VideoForm};
use crate::backend::state::AppState;
use crate::error::AppError;

fn attachment(file_name: &str) -> String {
    format!("attachment; filename=\"{file_name}\"")
}

pub async fn text_to_speech(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TtsRequest>,
) -> Result<Response, AppError> {
    let audio = state.coordinator().synthesize(req.into()).await?;
    let media = audio.media;
    info!(size = media.len(), duration_secs = audio.duration_secs, "speech returned");

    let file_name = format!("speech_{}.{}", Uuid::new_v4().simple(), media.extension);
    Ok((
        [
            (header::CONTENT_TYPE, format!("audio/{}", media.extension)),
            (header::CONTENT_DISPOSITION, attachment(&file_name)),
        ],
        media.bytes,
    )
        .into_response())
}

pub async fn generate_video(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut form = VideoForm::default();
    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == "image" {
            let file_name = field.file_name().map(str::to_string);
            form.set_image(file_name.as_deref(), field.bytes().await?);
        } else {
            form.set_field(&name, field.text().await?)?;
        }
    }

    let (scene, image, params) = form.into_parts()?;
    let clip = state.coordinator().render_clip(scene, image, params).await?;
    info!(size = clip.len(), "clip returned");

    let file_name = format!("video_{}.mp4", Uuid::new_v4().simple());
    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (header::CONTENT_DISPOSITION, attachment(&file_name)),
        ],
        clip.bytes,
    )
        .into_response())
}
