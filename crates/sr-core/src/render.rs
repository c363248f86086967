//! Queue/poll/fetch session for one image-to-clip render.
//!
//! `Idle → Submitted → Polling* → {Fetched, BackendFailed, TimedOut, Cancelled}`.
//! Every backend call is bounded by the session deadline, so a backend that
//! never answers still ends in `TimedOut`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep_until, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::collab::{RenderBackend, RenderRequest, RenderStatus, RenderTaskId};
use crate::config::RenderConfig;
use crate::error::{Error, Result};
use crate::job::Phase;
use crate::media::Media;

const CANCEL_GRACE: Duration = Duration::from_secs(5);
/// Deadline used when the configured timeout does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Submitted,
    Polling { polls: u32 },
    Fetched(Media),
    BackendFailed(String),
    TimedOut,
    Cancelled,
}

impl SessionState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Fetched(_) | Self::BackendFailed(_) | Self::TimedOut | Self::Cancelled
        )
    }
}

enum Bounded<T> {
    Done(T),
    Failed(String),
    Elapsed,
}

pub struct RenderSession {
    backend: Arc<dyn RenderBackend>,
    config: RenderConfig,
    cancel: CancellationToken,
    deadline: Instant,
    task: Option<RenderTaskId>,
    state: SessionState,
}

impl RenderSession {
    pub fn new(
        backend: Arc<dyn RenderBackend>,
        config: RenderConfig,
        cancel: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        let deadline = now
            .checked_add(config.timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        Self {
            backend,
            config,
            cancel,
            deadline,
            task: None,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn task(&self) -> Option<&RenderTaskId> {
        self.task.as_ref()
    }

    async fn bounded<T, F>(&self, call: F) -> Bounded<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match timeout_at(self.deadline, call).await {
            Ok(Ok(value)) => Bounded::Done(value),
            Ok(Err(err)) => Bounded::Failed(format!("{err:#}")),
            Err(_) => Bounded::Elapsed,
        }
    }

    /// Advance by one transition.
    pub async fn step(&mut self, request: &RenderRequest) -> &SessionState {
        let next = match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Idle => self.submit(request).await,
            SessionState::Submitted => self.poll_once(0).await,
            SessionState::Polling { polls } => {
                let wake = (Instant::now() + self.config.poll_interval).min(self.deadline);
                let cancelled = tokio::select! {
                    _ = self.cancel.cancelled() => true,
                    _ = sleep_until(wake) => false,
                };
                if cancelled {
                    SessionState::Cancelled
                } else if Instant::now() >= self.deadline {
                    SessionState::TimedOut
                } else {
                    self.poll_once(polls).await
                }
            }
            finished => finished,
        };
        self.state = next;
        &self.state
    }

    async fn submit(&mut self, request: &RenderRequest) -> SessionState {
        if self.cancel.is_cancelled() {
            return SessionState::Cancelled;
        }
        match self.bounded(self.backend.submit(request)).await {
            Bounded::Done(task) => {
                debug!(task_id = %task, scene = request.scene.index, "render task submitted");
                self.task = Some(task);
                SessionState::Submitted
            }
            Bounded::Failed(message) => SessionState::BackendFailed(message),
            Bounded::Elapsed => SessionState::TimedOut,
        }
    }

    async fn poll_once(&mut self, polls: u32) -> SessionState {
        let Some(task) = self.task.clone() else {
            return SessionState::BackendFailed("no render task to poll".into());
        };
        match self.bounded(self.backend.poll(&task)).await {
            Bounded::Done(RenderStatus::Completed) => self.fetch(&task).await,
            Bounded::Done(RenderStatus::Failed(message)) => SessionState::BackendFailed(message),
            Bounded::Done(RenderStatus::Pending | RenderStatus::Running) => {
                SessionState::Polling { polls: polls + 1 }
            }
            Bounded::Failed(message) => {
                warn!(task_id = %task, error = %message, "render poll failed, retrying");
                SessionState::Polling { polls: polls + 1 }
            }
            Bounded::Elapsed => SessionState::TimedOut,
        }
    }

    async fn fetch(&mut self, task: &RenderTaskId) -> SessionState {
        match self.bounded(self.backend.fetch(task)).await {
            Bounded::Done(clip) if clip.is_empty() => {
                SessionState::BackendFailed(format!("task {task} produced an empty clip"))
            }
            Bounded::Done(clip) => SessionState::Fetched(clip),
            Bounded::Failed(message) => SessionState::BackendFailed(message),
            Bounded::Elapsed => SessionState::TimedOut,
        }
    }

    /// Drive the session to a finished state.
    pub async fn run(mut self, request: &RenderRequest) -> Result<Media> {
        while !self.state.is_finished() {
            self.step(request).await;
        }

        if matches!(self.state, SessionState::TimedOut | SessionState::Cancelled) {
            if let Some(task) = &self.task {
                match timeout(CANCEL_GRACE, self.backend.cancel(task)).await {
                    Ok(Ok(())) => debug!(task_id = %task, "render task cancelled"),
                    Ok(Err(err)) => warn!(task_id = %task, error = %err, "failed to cancel render task"),
                    Err(_) => warn!(task_id = %task, "render cancel timed out"),
                }
            }
        }

        match self.state {
            SessionState::Fetched(clip) => Ok(clip),
            SessionState::BackendFailed(message) => Err(Error::Collaborator {
                phase: Phase::Clips,
                message,
            }),
            SessionState::TimedOut => Err(Error::Timeout {
                phase: Phase::Clips,
                after: self.config.timeout,
            }),
            _ => Err(Error::Cancelled),
        }
    }
}
