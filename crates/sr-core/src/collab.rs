//! Contracts of the external services the pipeline drives.
//!
//! Adapters report failures as `anyhow` errors; the stage executors attach
//! the phase and decide whether to retry.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::captions::CaptionTrack;
use crate::error::{Error, Result};
use crate::job::{ClipParams, JobId, JobSpec, MAX_TEXT_CHARS, ScenePrompt};
use crate::media::{Artifact, Media, SpeechAudio};

/// Audio containers a speech request may ask for.
pub const SPEECH_FORMATS: [&str; 4] = ["mp3", "opus", "aac", "flac"];

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: String,
    pub model: String,
    /// One of [`SPEECH_FORMATS`].
    pub format: String,
}

impl SpeechRequest {
    /// Narration for a story job, always mp3.
    pub fn for_job(spec: &JobSpec) -> Self {
        Self {
            text: spec.text.clone(),
            voice: spec.voice.clone(),
            model: spec.tts_model.clone(),
            format: "mp3".into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let text = self.text.trim();
        if text.is_empty() {
            return Err(Error::Validation("text must not be empty".into()));
        }
        if text.chars().count() > MAX_TEXT_CHARS {
            return Err(Error::Validation(format!(
                "text exceeds {MAX_TEXT_CHARS} characters"
            )));
        }
        if self.voice.trim().is_empty() || self.model.trim().is_empty() {
            return Err(Error::Validation("voice and model must be set".into()));
        }
        if !SPEECH_FORMATS.contains(&self.format.as_str()) {
            return Err(Error::Validation(format!(
                "response_format must be one of {}",
                SPEECH_FORMATS.join(", ")
            )));
        }
        Ok(())
    }
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SpeechRequest) -> anyhow::Result<SpeechAudio>;
}

#[async_trait]
pub trait PromptGenerator: Send + Sync {
    /// Scene descriptions in story order. May return fewer than `count`.
    async fn generate_prompts(&self, text: &str, count: usize) -> anyhow::Result<Vec<String>>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, prompt: &str) -> anyhow::Result<Media>;
}

/// Backend-issued identifier of one render task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderTaskId(pub String);

impl fmt::Display for RenderTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub job_id: JobId,
    pub scene: ScenePrompt,
    pub image: Media,
    pub params: ClipParams,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderStatus {
    Pending,
    Running,
    Completed,
    Failed(String),
}

/// Queue/poll/fetch protocol of the image-to-video backend.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    async fn submit(&self, request: &RenderRequest) -> anyhow::Result<RenderTaskId>;

    async fn poll(&self, task: &RenderTaskId) -> anyhow::Result<RenderStatus>;

    async fn fetch(&self, task: &RenderTaskId) -> anyhow::Result<Media>;

    /// Best effort; backends without cancellation keep the default.
    async fn cancel(&self, _task: &RenderTaskId) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait MediaAssembler: Send + Sync {
    /// Concatenate clips in the given order.
    async fn concat(&self, clips: &[Media]) -> anyhow::Result<Media>;

    /// Lay the narration under `video`, trimming the video to the audio length.
    async fn mux(&self, video: &Media, audio: &SpeechAudio) -> anyhow::Result<Media>;

    async fn burn_captions(&self, video: &Media, captions: &CaptionTrack) -> anyhow::Result<Media>;
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn store(&self, job_id: JobId, video: &Media) -> anyhow::Result<Artifact>;
}

/// Every collaborator a coordinator needs, injected at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub prompts: Arc<dyn PromptGenerator>,
    pub images: Arc<dyn ImageGenerator>,
    pub renderer: Arc<dyn RenderBackend>,
    pub assembler: Arc<dyn MediaAssembler>,
    pub store: Arc<dyn ArtifactStore>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speech(text: &str, format: &str) -> SpeechRequest {
        SpeechRequest {
            text: text.into(),
            voice: "alloy".into(),
            model: "tts-1".into(),
            format: format.into(),
        }
    }

    #[test]
    fn test_job_narration_is_mp3() {
        let mut spec = JobSpec::new("A story.");
        spec.voice = "onyx".into();
        let request = SpeechRequest::for_job(&spec);
        assert_eq!(request.format, "mp3");
        assert_eq!(request.voice, "onyx");
        assert_eq!(request.model, "tts-1");
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_speech_validation() {
        assert!(speech("Hello.", "flac").validate().is_ok());
        assert!(matches!(speech("  ", "mp3").validate(), Err(Error::Validation(_))));
        assert!(matches!(speech("Hello.", "wav").validate(), Err(Error::Validation(_))));
    }
}
