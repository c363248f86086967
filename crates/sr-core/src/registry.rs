use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::job::{JobFailure, JobId, JobSnapshot, JobSpec, JobStatus, Phase, ScenePrompt};
use crate::media::Artifact;
use crate::progress;

/// Partial update applied to one job under a single write lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<f32>,
    pub message: Option<String>,
    pub phase: Option<Phase>,
    pub audio_duration: Option<f64>,
    pub prompts: Option<Vec<ScenePrompt>>,
    pub artifact: Option<Artifact>,
    pub error: Option<JobFailure>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: f32) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn audio_duration(mut self, secs: f64) -> Self {
        self.audio_duration = Some(secs);
        self
    }

    pub fn prompts(mut self, prompts: Vec<ScenePrompt>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn artifact(mut self, artifact: Artifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn error(mut self, error: JobFailure) -> Self {
        self.error = Some(error);
        self
    }
}

struct JobEntry {
    spec: Arc<JobSpec>,
    snapshot: JobSnapshot,
}

/// In-memory job store. Readers only ever receive owned snapshots.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, JobEntry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, spec: JobSpec) -> JobId {
        let id = JobId::new();
        let entry = JobEntry {
            spec: Arc::new(spec),
            snapshot: JobSnapshot::queued(id),
        };
        self.jobs.write().await.insert(id, entry);
        id
    }

    pub async fn get(&self, id: JobId) -> Result<JobSnapshot> {
        self.jobs
            .read()
            .await
            .get(&id)
            .map(|entry| entry.snapshot.clone())
            .ok_or(Error::NotFound(id))
    }

    pub async fn spec(&self, id: JobId) -> Result<Arc<JobSpec>> {
        self.jobs
            .read()
            .await
            .get(&id)
            .map(|entry| entry.spec.clone())
            .ok_or(Error::NotFound(id))
    }

    /// Apply `update` and return the resulting snapshot.
    ///
    /// Terminal jobs reject every update. Progress never moves backwards and
    /// reads 100 exactly when the job is completed.
    pub async fn update(&self, id: JobId, update: JobUpdate) -> Result<JobSnapshot> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id).ok_or(Error::NotFound(id))?;
        let job = &mut entry.snapshot;

        if job.status.is_terminal() {
            return Err(Error::Terminal(id));
        }

        let status = update.status.unwrap_or(job.status);
        if !job.status.can_transition_to(status) {
            return Err(Error::InvalidTransition {
                id,
                from: job.status,
                to: status,
            });
        }
        job.status = status;

        let requested = update.progress.unwrap_or(job.progress);
        job.progress = if status == JobStatus::Completed {
            progress::COMPLETE
        } else {
            requested.max(job.progress).min(progress::MAX_RUNNING)
        };

        if let Some(message) = update.message {
            job.message = message;
        }
        if update.phase.is_some() {
            job.phase = update.phase;
        }
        if update.audio_duration.is_some() {
            job.audio_duration = update.audio_duration;
        }
        if update.prompts.is_some() {
            job.prompts = update.prompts;
        }
        if update.artifact.is_some() {
            job.artifact = update.artifact;
        }
        if update.error.is_some() {
            job.error = update.error;
        }
        job.updated_at = Utc::now();

        Ok(job.clone())
    }
}
