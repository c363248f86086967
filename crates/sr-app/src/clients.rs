pub mod comfyui;
pub mod ffmpeg;
pub mod openai;
pub mod storage;
pub mod workflow;

use std::sync::Arc;
use std::time::Duration;

use log::info;
use reqwest::{Client, Response};
use sr_core::collab::Collaborators;

use crate::clients::comfyui::ComfyUiClient;
use crate::clients::ffmpeg::Ffmpeg;
use crate::clients::openai::OpenAiClient;
use crate::clients::storage::FsArtifactStore;
use crate::clients::workflow::WorkflowTemplate;
use crate::config::AppConfig;
use crate::error::AppError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(180);

/// Pass successful responses through; turn anything else into a backend
/// error carrying the status and body.
pub async fn check_status(response: Response) -> anyhow::Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(anyhow::Error::from(AppError::BackendError(format!(
        "HTTP {}: {}",
        status,
        body.trim()
    ))))
}

/// Construct every adapter from configuration.
pub async fn build(config: &AppConfig) -> anyhow::Result<Collaborators> {
    let http = Client::builder().timeout(HTTP_TIMEOUT).build()?;

    let ffmpeg = Arc::new(Ffmpeg::new(config.ffmpeg.clone()));
    let openai = Arc::new(OpenAiClient::new(http.clone(), config.openai.clone(), ffmpeg.clone()));

    let workflow =
        WorkflowTemplate::load(&config.comfyui.workflow_file, config.comfyui.nodes.clone()).await?;
    info!("Loaded workflow from {}", config.comfyui.workflow_file.display());
    let comfyui = Arc::new(ComfyUiClient::new(http, &config.comfyui.api_url, workflow));

    let store = Arc::new(FsArtifactStore::new(config.output_dir.clone()).await?);

    Ok(Collaborators {
        speech: openai.clone(),
        prompts: openai.clone(),
        images: openai,
        renderer: comfyui,
        assembler: ffmpeg,
        store,
    })
}
