pub mod captions;
pub mod collab;
pub mod config;
mod coordinator;
pub mod error;
pub mod job;
pub mod media;
pub mod progress;
mod publisher;
mod registry;
pub mod render;
pub mod retry;
pub mod stages;

pub use coordinator::Coordinator;
pub use error::{Error, ErrorKind, Result};
pub use job::{ClipParams, JobFailure, JobId, JobSnapshot, JobSpec, JobStatus, Phase, ScenePrompt};
pub use media::{Artifact, Media, SpeechAudio};
pub use publisher::{ProgressPublisher, Subscription};
pub use registry::{JobRegistry, JobUpdate};
