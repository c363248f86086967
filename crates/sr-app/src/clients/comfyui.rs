//! ComfyUI HTTP render backend.
//!
//! submit: upload the scene image, queue the patched workflow.
//! poll:   `/history/{prompt_id}`; no entry yet means still queued.
//! fetch:  `/view` on the first file the workflow produced.
//! cancel: drop the prompt from the queue and interrupt it if running.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{Value, json};
use sr_core::Media;
use sr_core::collab::{RenderBackend, RenderRequest, RenderStatus, RenderTaskId};
use tracing::{debug, info};
use uuid::Uuid;

use super::check_status;
use super::workflow::WorkflowTemplate;

/// Output keys ComfyUI nodes use for produced files, most specific first.
const OUTPUT_KEYS: [&str; 3] = ["gifs", "videos", "images"];

#[derive(Debug, Deserialize)]
struct UploadResponse {
    name: String,
    #[serde(default)]
    subfolder: String,
}

#[derive(Debug, Deserialize)]
struct QueueResponse {
    prompt_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_output_type")]
    pub kind: String,
}

fn default_output_type() -> String {
    "output".into()
}

pub struct ComfyUiClient {
    http: Client,
    base_url: String,
    client_id: String,
    workflow: WorkflowTemplate,
}

impl ComfyUiClient {
    pub fn new(http: Client, base_url: &str, workflow: WorkflowTemplate) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: Uuid::new_v4().to_string(),
            workflow,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn upload_image(&self, request: &RenderRequest) -> anyhow::Result<String> {
        let file_name = format!(
            "storyreel_{}_{:03}.{}",
            request.job_id, request.scene.index, request.image.extension
        );
        let part = Part::bytes(request.image.bytes.to_vec())
            .file_name(file_name)
            .mime_str(&format!("image/{}", request.image.extension))?;
        let form = Form::new().part("image", part).text("overwrite", "true");

        let response = self
            .http
            .post(self.url("upload/image"))
            .multipart(form)
            .send()
            .await
            .context("image upload failed")?;
        let uploaded: UploadResponse = check_status(response).await?.json().await?;

        Ok(if uploaded.subfolder.is_empty() {
            uploaded.name
        } else {
            format!("{}/{}", uploaded.subfolder, uploaded.name)
        })
    }

    async fn history(&self, task: &RenderTaskId) -> anyhow::Result<Value> {
        let response = self
            .http
            .get(self.url(&format!("history/{task}")))
            .send()
            .await
            .context("history request failed")?;
        Ok(check_status(response).await?.json().await?)
    }
}

/// Interpret a `/history/{id}` body.
pub fn history_status(history: &Value, prompt_id: &str) -> RenderStatus {
    let Some(entry) = history.get(prompt_id) else {
        return RenderStatus::Pending;
    };

    let status = entry.get("status");
    if status.and_then(|s| s.get("status_str")).and_then(Value::as_str) == Some("error") {
        let detail = status
            .and_then(|s| s.get("messages"))
            .and_then(Value::as_array)
            .and_then(|messages| {
                messages.iter().find_map(|m| {
                    (m.get(0)?.as_str()? == "execution_error")
                        .then(|| m.get(1)?.get("exception_message")?.as_str())
                        .flatten()
                })
            })
            .unwrap_or("workflow execution failed");
        return RenderStatus::Failed(detail.trim().to_string());
    }

    if first_output(entry).is_some() {
        return RenderStatus::Completed;
    }
    let completed = status
        .and_then(|s| s.get("completed"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if completed {
        RenderStatus::Failed("workflow finished without producing a file".into())
    } else {
        RenderStatus::Running
    }
}

/// First produced file of a history entry, in node order.
pub fn first_output(entry: &Value) -> Option<OutputFile> {
    let outputs = entry.get("outputs")?.as_object()?;
    outputs.values().find_map(|node| {
        OUTPUT_KEYS.iter().find_map(|key| {
            let file = node.get(*key)?.as_array()?.first()?;
            serde_json::from_value(file.clone()).ok()
        })
    })
}

#[async_trait]
impl RenderBackend for ComfyUiClient {
    async fn submit(&self, request: &RenderRequest) -> anyhow::Result<RenderTaskId> {
        let image_name = self.upload_image(request).await?;
        let graph = self.workflow.render(request, &image_name)?;

        let response = self
            .http
            .post(self.url("prompt"))
            .json(&json!({ "prompt": graph, "client_id": self.client_id }))
            .send()
            .await
            .context("queueing workflow failed")?;
        let queued: QueueResponse = check_status(response).await?.json().await?;

        info!(job_id = %request.job_id, index = request.scene.index, prompt_id = %queued.prompt_id, "workflow queued");
        Ok(RenderTaskId(queued.prompt_id))
    }

    async fn poll(&self, task: &RenderTaskId) -> anyhow::Result<RenderStatus> {
        let history = self.history(task).await?;
        Ok(history_status(&history, &task.0))
    }

    async fn fetch(&self, task: &RenderTaskId) -> anyhow::Result<Media> {
        let history = self.history(task).await?;
        let output = history
            .get(&task.0)
            .and_then(first_output)
            .ok_or_else(|| anyhow!("task {task} has no output file"))?;

        let response = self
            .http
            .get(self.url("view"))
            .query(&[
                ("filename", output.filename.as_str()),
                ("subfolder", output.subfolder.as_str()),
                ("type", output.kind.as_str()),
            ])
            .send()
            .await
            .context("downloading clip failed")?;
        let bytes = check_status(response).await?.bytes().await?;

        let extension = output
            .filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_string())
            .unwrap_or_else(|| "mp4".into());
        debug!(task_id = %task, file = %output.filename, size = bytes.len(), "clip downloaded");
        Ok(Media::new(bytes, extension))
    }

    async fn cancel(&self, task: &RenderTaskId) -> anyhow::Result<()> {
        let response = self
            .http
            .post(self.url("queue"))
            .json(&json!({ "delete": [task.0] }))
            .send()
            .await?;
        check_status(response).await?;

        let response = self.http.post(self.url("interrupt")).send().await?;
        check_status(response).await?;
        info!(task_id = %task, "render task cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_entry_is_pending() {
        assert_eq!(history_status(&json!({}), "abc"), RenderStatus::Pending);
    }

    #[test]
    fn test_running_without_outputs() {
        let history = json!({ "abc": { "outputs": {}, "status": { "status_str": "running", "completed": false } } });
        assert_eq!(history_status(&history, "abc"), RenderStatus::Running);
    }

    #[test]
    fn test_completed_with_video() {
        let history = json!({
            "abc": {
                "outputs": {
                    "9": { "text": ["ignored"] },
                    "54": { "gifs": [{ "filename": "wan_00001.mp4", "subfolder": "", "type": "output" }] }
                },
                "status": { "status_str": "success", "completed": true }
            }
        });
        assert_eq!(history_status(&history, "abc"), RenderStatus::Completed);
        let file = first_output(&history["abc"]).unwrap();
        assert_eq!(file.filename, "wan_00001.mp4");
        assert_eq!(file.kind, "output");
    }

    #[test]
    fn test_execution_error() {
        let history = json!({
            "abc": {
                "outputs": {},
                "status": {
                    "status_str": "error",
                    "completed": false,
                    "messages": [
                        ["execution_start", { "prompt_id": "abc" }],
                        ["execution_error", { "exception_message": "CUDA out of memory\n" }]
                    ]
                }
            }
        });
        assert_eq!(
            history_status(&history, "abc"),
            RenderStatus::Failed("CUDA out of memory".into())
        );
    }

    #[test]
    fn test_completed_without_file_is_failure() {
        let history = json!({ "abc": { "outputs": {}, "status": { "status_str": "success", "completed": true } } });
        assert!(matches!(history_status(&history, "abc"), RenderStatus::Failed(_)));
    }
}
