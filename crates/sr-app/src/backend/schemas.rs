use std::path::Path;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sr_core::collab::SpeechRequest;
use sr_core::{ClipParams, JobFailure, JobSnapshot, JobSpec, JobStatus, Media, Phase, ScenePrompt};
use tracing::debug;

use crate::error::AppError;

/// Body of `POST /story-video`. Everything except `text` has a default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoryVideoRequest {
    pub text: String,
    pub voice: String,
    pub tts_model: String,
    pub image_prompt_count: u32,
    pub frame_rate: u32,
    pub image_width: u32,
    pub image_height: u32,
    pub video_length: u32,
    pub seed: Option<u64>,
    pub steps: u32,
    pub cfg: f32,
    pub sampler_name: String,
    pub scheduler: String,
    pub add_captions: bool,
    pub language: String,
}

impl Default for StoryVideoRequest {
    fn default() -> Self {
        let spec = JobSpec::default();
        let clip = spec.clip;
        Self {
            text: spec.text,
            voice: spec.voice,
            tts_model: spec.tts_model,
            image_prompt_count: spec.image_prompt_count,
            frame_rate: clip.frame_rate,
            image_width: clip.width,
            image_height: clip.height,
            video_length: clip.length,
            seed: clip.seed,
            steps: clip.steps,
            cfg: clip.cfg,
            sampler_name: clip.sampler_name,
            scheduler: clip.scheduler,
            add_captions: spec.add_captions,
            language: spec.language,
        }
    }
}

impl From<StoryVideoRequest> for JobSpec {
    fn from(req: StoryVideoRequest) -> Self {
        JobSpec {
            text: req.text,
            voice: req.voice,
            tts_model: req.tts_model,
            image_prompt_count: req.image_prompt_count,
            clip: ClipParams {
                width: req.image_width,
                height: req.image_height,
                frame_rate: req.frame_rate,
                length: req.video_length,
                steps: req.steps,
                cfg: req.cfg,
                sampler_name: req.sampler_name,
                scheduler: req.scheduler,
                seed: req.seed,
            },
            add_captions: req.add_captions,
            language: req.language,
        }
    }
}

/// Body of `POST /text-to-speech`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtsRequest {
    pub text: String,
    pub voice: String,
    pub model: String,
    pub response_format: String,
}

impl Default for TtsRequest {
    fn default() -> Self {
        Self {
            text: String::new(),
            voice: "alloy".into(),
            model: "tts-1".into(),
            response_format: "mp3".into(),
        }
    }
}

impl From<TtsRequest> for SpeechRequest {
    fn from(req: TtsRequest) -> Self {
        SpeechRequest {
            text: req.text,
            voice: req.voice,
            model: req.model,
            format: req.response_format.trim().to_ascii_lowercase(),
        }
    }
}

/// Fields of the `POST /generate-video` multipart form, filled one part at a
/// time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoForm {
    pub image: Option<Media>,
    pub positive_prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub params: ClipParams,
}

fn form_number<T: FromStr>(name: &str, value: &str) -> Result<T, AppError> {
    value.trim().parse().map_err(|_| {
        AppError::from(sr_core::Error::Validation(format!(
            "{name} must be a number, got {value:?}"
        )))
    })
}

impl VideoForm {
    pub fn set_image(&mut self, file_name: Option<&str>, bytes: Bytes) {
        let extension = file_name
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "png".into());
        self.image = Some(Media::new(bytes, extension));
    }

    pub fn set_field(&mut self, name: &str, value: String) -> Result<(), AppError> {
        let params = &mut self.params;
        match name {
            "positive_prompt" => self.positive_prompt = Some(value),
            "negative_prompt" => self.negative_prompt = Some(value),
            "width" => params.width = form_number(name, &value)?,
            "height" => params.height = form_number(name, &value)?,
            "length" => params.length = form_number(name, &value)?,
            "frame_rate" => params.frame_rate = form_number(name, &value)?,
            "steps" => params.steps = form_number(name, &value)?,
            "cfg" => params.cfg = form_number(name, &value)?,
            "seed" if value.trim().is_empty() => params.seed = None,
            "seed" => params.seed = Some(form_number(name, &value)?),
            "sampler_name" => params.sampler_name = value,
            "scheduler" => params.scheduler = value,
            other => debug!(field = other, "ignoring unknown form field"),
        }
        Ok(())
    }

    /// Split into render inputs. Range checks happen in the engine.
    pub fn into_parts(self) -> Result<(ScenePrompt, Media, ClipParams), AppError> {
        let image = self
            .image
            .ok_or_else(|| sr_core::Error::Validation("image file is required".into()))?;
        let prompt = self
            .positive_prompt
            .ok_or_else(|| sr_core::Error::Validation("positive_prompt is required".into()))?;
        let scene = ScenePrompt {
            index: 0,
            prompt,
            negative_prompt: self.negative_prompt.unwrap_or_default(),
        };
        Ok((scene, image, self.params))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobCreateResponse {
    pub job_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobCancelResponse {
    pub job_id: String,
    pub cancelled: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: f32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_prompts: Option<Vec<ScenePrompt>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&JobSnapshot> for JobStatusResponse {
    fn from(job: &JobSnapshot) -> Self {
        Self {
            job_id: job.id.to_string(),
            status: job.status,
            progress: job.progress,
            message: job.message.clone(),
            phase: job.phase,
            output_file: job.artifact.as_ref().map(|a| a.file_name.clone()),
            audio_duration: job.audio_duration,
            image_prompts: job.prompts.clone(),
            error: job.error.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;
    use sr_core::{Artifact, JobId};

    use super::*;

    #[test]
    fn test_request_defaults() {
        let req: StoryVideoRequest = serde_json::from_value(json!({ "text": "Once upon a time." })).unwrap();
        let spec = JobSpec::from(req);
        assert_eq!(spec.text, "Once upon a time.");
        assert_eq!(spec.voice, "nova");
        assert_eq!(spec.clip.width, 848);
        assert_eq!(spec.clip.length, 81);
        assert_eq!(spec.clip.seed, None);
        assert!(spec.add_captions);
        assert_eq!(spec.language, "vietnamese");
    }

    #[test]
    fn test_request_overrides() {
        let req: StoryVideoRequest = serde_json::from_value(json!({
            "text": "x",
            "image_prompt_count": 6,
            "seed": 42,
            "cfg": 4.5,
            "add_captions": false
        }))
        .unwrap();
        let spec = JobSpec::from(req);
        assert_eq!(spec.image_prompt_count, 6);
        assert_eq!(spec.clip.seed, Some(42));
        assert_eq!(spec.clip.cfg, 4.5);
        assert!(!spec.add_captions);
    }

    #[test]
    fn test_tts_request_defaults() {
        let req: TtsRequest = serde_json::from_value(json!({ "text": "Hello." })).unwrap();
        let speech = SpeechRequest::from(req);
        assert_eq!(speech.text, "Hello.");
        assert_eq!(speech.voice, "alloy");
        assert_eq!(speech.model, "tts-1");
        assert_eq!(speech.format, "mp3");
    }

    #[test]
    fn test_tts_request_overrides() {
        let req: TtsRequest = serde_json::from_value(json!({
            "text": "Hello.",
            "voice": "shimmer",
            "model": "tts-1-hd",
            "response_format": "FLAC"
        }))
        .unwrap();
        let speech = SpeechRequest::from(req);
        assert_eq!(speech.voice, "shimmer");
        assert_eq!(speech.model, "tts-1-hd");
        assert_eq!(speech.format, "flac");
        assert!(speech.validate().is_ok());
    }

    #[test]
    fn test_video_form() {
        let mut form = VideoForm::default();
        form.set_image(Some("Still.JPG"), Bytes::from_static(b"jpeg"));
        for (name, value) in [
            ("positive_prompt", "a lighthouse at dusk"),
            ("negative_prompt", "blurry"),
            ("width", "640"),
            ("frame_rate", "12"),
            ("cfg", "4.5"),
            ("seed", "7"),
            ("scheduler", "karras"),
            ("client_note", "ignored"),
        ] {
            form.set_field(name, value.to_string()).unwrap();
        }

        let (scene, image, params) = form.into_parts().unwrap();
        assert_eq!(scene.prompt, "a lighthouse at dusk");
        assert_eq!(scene.negative_prompt, "blurry");
        assert_eq!(image.extension, "jpg");
        assert_eq!(&image.bytes[..], b"jpeg");
        assert_eq!(params.width, 640);
        assert_eq!(params.height, 480);
        assert_eq!(params.length, 81);
        assert_eq!(params.frame_rate, 12);
        assert_eq!(params.cfg, 4.5);
        assert_eq!(params.seed, Some(7));
        assert_eq!(params.scheduler, "karras");
        assert_eq!(params.sampler_name, "uni_pc");
    }

    #[test]
    fn test_video_form_errors() {
        let mut form = VideoForm::default();
        let err = form.set_field("steps", "many".into()).unwrap_err();
        assert!(err.to_string().contains("steps"));

        form.set_field("seed", " ".into()).unwrap();
        assert_eq!(form.params.seed, None);

        form.set_field("positive_prompt", "a fox".into()).unwrap();
        let err = form.clone().into_parts().unwrap_err();
        assert!(err.to_string().contains("image"));

        form.set_image(None, Bytes::from_static(b"png"));
        let (scene, image, _) = form.into_parts().unwrap();
        assert_eq!(image.extension, "png");
        assert_eq!(scene.negative_prompt, "");
    }

    #[test]
    fn test_status_response() {
        let now = Utc::now();
        let id = JobId::new();
        let job = JobSnapshot {
            id,
            status: JobStatus::Completed,
            progress: 100.0,
            message: "Video generation completed".into(),
            phase: Some(Phase::Assembly),
            audio_duration: Some(18.0),
            prompts: None,
            artifact: Some(Artifact {
                path: PathBuf::from("outputs/x_final.mp4"),
                file_name: "x_final.mp4".into(),
                size_bytes: 10,
            }),
            error: None,
            created_at: now,
            updated_at: now,
        };
        let body = serde_json::to_value(JobStatusResponse::from(&job)).unwrap();
        assert_eq!(body["job_id"], id.to_string());
        assert_eq!(body["status"], "completed");
        assert_eq!(body["output_file"], "x_final.mp4");
        assert_eq!(body["audio_duration"], 18.0);
        assert!(body.get("error").is_none());
        assert!(body.get("image_prompts").is_none());
    }
}
