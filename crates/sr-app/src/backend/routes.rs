use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};

use crate::backend::routes::job::{
    cancel_story_video, create_story_video, get_story_video, get_story_video_status, story_video_ws,
};
use crate::backend::routes::media::{generate_video, text_to_speech};
use crate::backend::state::AppState;

mod job;
mod media;

/// Upper bound for the source image of `/generate-video`.
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/story-video", post(create_story_video))
        .route("/story-video/{id}", get(get_story_video).delete(cancel_story_video))
        .route("/story-video/{id}/status", get(get_story_video_status))
        .route("/story-video/{id}/ws", get(story_video_ws))
        .route("/text-to-speech", post(text_to_speech))
        .route(
            "/generate-video",
            post(generate_video).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
}
