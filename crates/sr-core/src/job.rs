use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, ErrorKind, Result};
use crate::media::Artifact;

pub const MAX_TEXT_CHARS: usize = 20_000;
pub const MAX_PROMPT_COUNT: u32 = 200;
pub const MAX_DIMENSION: u32 = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (a, b) if *a == b => !a.is_terminal(),
            (Self::Queued, Self::Processing | Self::Failed) => true,
            (Self::Processing, Self::Completed | Self::Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered sub-phases of a `processing` job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Speech,
    Prompts,
    Images,
    Clips,
    Assembly,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Self::Speech,
        Self::Prompts,
        Self::Images,
        Self::Clips,
        Self::Assembly,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Speech => "speech synthesis",
            Self::Prompts => "prompt generation",
            Self::Images => "image generation",
            Self::Clips => "clip rendering",
            Self::Assembly => "assembly",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-clip generation parameters handed to the render backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipParams {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// Clip length in frames.
    pub length: u32,
    pub steps: u32,
    pub cfg: f32,
    pub sampler_name: String,
    pub scheduler: String,
    pub seed: Option<u64>,
}

impl Default for ClipParams {
    fn default() -> Self {
        Self {
            width: 848,
            height: 480,
            frame_rate: 8,
            length: 81,
            steps: 20,
            cfg: 6.0,
            sampler_name: "uni_pc".into(),
            scheduler: "simple".into(),
            seed: None,
        }
    }
}

impl ClipParams {
    pub fn clip_seconds(&self) -> f64 {
        self.length as f64 / self.frame_rate as f64
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Validation("resolution must be non-zero".into()));
        }
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(Error::Validation(format!(
                "resolution {}x{} exceeds {MAX_DIMENSION}",
                self.width, self.height
            )));
        }
        if self.frame_rate == 0 {
            return Err(Error::Validation("frame_rate must be positive".into()));
        }
        if self.length == 0 {
            return Err(Error::Validation("video_length must be positive".into()));
        }
        if self.steps == 0 {
            return Err(Error::Validation("steps must be positive".into()));
        }
        if !self.cfg.is_finite() || self.cfg <= 0.0 {
            return Err(Error::Validation("cfg must be a positive number".into()));
        }
        if self.sampler_name.trim().is_empty() || self.scheduler.trim().is_empty() {
            return Err(Error::Validation(
                "sampler_name and scheduler must be set".into(),
            ));
        }
        Ok(())
    }
}

/// One story-video submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub text: String,
    pub voice: String,
    pub tts_model: String,
    /// 0 derives the count from the narration length.
    pub image_prompt_count: u32,
    pub clip: ClipParams,
    pub add_captions: bool,
    pub language: String,
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            text: String::new(),
            voice: "nova".into(),
            tts_model: "tts-1".into(),
            image_prompt_count: 0,
            clip: ClipParams::default(),
            add_captions: true,
            language: "vietnamese".into(),
        }
    }
}

impl JobSpec {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
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
        if self.voice.trim().is_empty() || self.tts_model.trim().is_empty() {
            return Err(Error::Validation("voice and tts_model must be set".into()));
        }
        if self.image_prompt_count > MAX_PROMPT_COUNT {
            return Err(Error::Validation(format!(
                "image_prompt_count exceeds {MAX_PROMPT_COUNT}"
            )));
        }
        self.clip.validate()
    }
}

/// A scene description produced by the prompt model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenePrompt {
    pub index: usize,
    pub prompt: String,
    pub negative_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub phase: Option<Phase>,
    pub message: String,
}

impl From<&Error> for JobFailure {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            phase: err.phase(),
            message: err.to_string(),
        }
    }
}

/// Immutable copy of a job's state handed to readers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: f32,
    pub message: String,
    pub phase: Option<Phase>,
    pub audio_duration: Option<f64>,
    pub prompts: Option<Vec<ScenePrompt>>,
    pub artifact: Option<Artifact>,
    pub error: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    pub(crate) fn queued(id: JobId) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Queued,
            progress: 0.0,
            message: "Job queued".into(),
            phase: None,
            audio_duration: None,
            prompts: None,
            artifact: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_clip_seconds() {
        let clip = ClipParams {
            length: 40,
            frame_rate: 8,
            ..Default::default()
        };
        assert_eq!(clip.clip_seconds(), 5.0);
    }

    #[test]
    fn test_validation() {
        assert!(JobSpec::new("Once upon a time.").validate().is_ok());
        assert!(matches!(
            JobSpec::new("   ").validate(),
            Err(Error::Validation(_))
        ));

        let mut spec = JobSpec::new("story");
        spec.clip.frame_rate = 0;
        assert!(matches!(spec.validate(), Err(Error::Validation(_))));

        let mut spec = JobSpec::new("story");
        spec.clip.cfg = f32::NAN;
        assert!(spec.validate().is_err());

        let mut spec = JobSpec::new("story");
        spec.image_prompt_count = MAX_PROMPT_COUNT + 1;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_wire_names() {
        let failure = JobFailure::from(&Error::collaborator(Phase::Clips, "oom"));
        let value = serde_json::to_value(&failure).unwrap();
        assert_eq!(value["kind"], "collaborator");
        assert_eq!(value["phase"], "clips");
        assert_eq!(value["message"], "clip rendering failed: oom");
        assert_eq!(serde_json::to_value(JobStatus::Processing).unwrap(), "processing");
    }

    #[test]
    fn test_job_id_round_trip() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }
}
