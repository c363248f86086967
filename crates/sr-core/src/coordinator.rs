//! Drives each job through `queued → processing → {completed, failed}`.
//!
//! Every job runs on its own task. Within a job the phases run in order;
//! images and clips fan out under the shared limiters and are fanned back in
//! by scene index. All registry writes for a job happen on that job's task,
//! each one immediately followed by a publish of the resulting snapshot.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures::{FutureExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::captions::CaptionTrack;
use crate::collab::{Collaborators, RenderRequest, SpeechRequest};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::job::{ClipParams, JobFailure, JobId, JobSnapshot, JobSpec, JobStatus, Phase, ScenePrompt};
use crate::media::{Artifact, Media, SpeechAudio};
use crate::progress::ProgressTracker;
use crate::publisher::{ProgressPublisher, Subscription};
use crate::registry::{JobRegistry, JobUpdate};
use crate::stages::{StageExecutors, clip_sequence, scene_count};

struct Inner {
    registry: JobRegistry,
    publisher: ProgressPublisher,
    stages: StageExecutors,
    cancels: Mutex<HashMap<JobId, CancellationToken>>,
    root: CancellationToken,
}

impl Inner {
    fn cancels(&self) -> MutexGuard<'_, HashMap<JobId, CancellationToken>> {
        self.cancels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn fail(&self, id: JobId, err: &Error, phase: Option<Phase>) {
        let mut failure = JobFailure::from(err);
        failure.phase = failure.phase.or(phase);
        let message = match (err, phase) {
            (Error::Cancelled, Some(phase)) => format!("Job cancelled during {phase}"),
            _ => format!("Error: {err}"),
        };

        error!(job_id = %id, phase = ?failure.phase, kind = ?failure.kind, error = %err, "job failed");
        let update = JobUpdate::new()
            .status(JobStatus::Failed)
            .message(message)
            .error(failure);
        match self.registry.update(id, update).await {
            Ok(snapshot) => self.publisher.publish(snapshot),
            Err(e) => warn!(job_id = %id, error = %e, "could not record job failure"),
        }
    }
}

/// Entry point of the engine: submission, status, results, live updates
/// and cancellation.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(collab: Collaborators, config: PipelineConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: JobRegistry::new(),
                publisher: ProgressPublisher::new(),
                stages: StageExecutors::new(collab, config),
                cancels: Mutex::new(HashMap::new()),
                root: CancellationToken::new(),
            }),
        }
    }

    /// Validate and start a job; returns as soon as the job is registered.
    pub async fn submit(&self, spec: JobSpec) -> Result<JobId> {
        spec.validate()?;

        let id = self.inner.registry.create(spec).await;
        let spec = self.inner.registry.spec(id).await?;
        self.inner.publisher.open(self.inner.registry.get(id).await?);

        let cancel = self.inner.root.child_token();
        self.inner.cancels().insert(id, cancel.clone());

        info!(job_id = %id, chars = spec.text.chars().count(), "job submitted");
        let inner = self.inner.clone();
        tokio::spawn(async move {
            run_job(&inner, id, &spec, &cancel).await;
            inner.cancels().remove(&id);
        });

        Ok(id)
    }

    pub async fn status(&self, id: JobId) -> Result<JobSnapshot> {
        self.inner.registry.get(id).await
    }

    /// The finished video of a completed job.
    pub async fn result(&self, id: JobId) -> Result<Artifact> {
        let job = self.inner.registry.get(id).await?;
        match (job.status, job.artifact) {
            (JobStatus::Completed, Some(artifact)) => Ok(artifact),
            (status, _) => Err(Error::NotReady { id, status }),
        }
    }

    /// Latest snapshot, then live changes until the job is terminal.
    pub async fn subscribe(&self, id: JobId) -> Result<Subscription> {
        if let Some(sub) = self.inner.publisher.subscribe(id) {
            return Ok(sub);
        }
        let snapshot = self.inner.registry.get(id).await?;
        Ok(Subscription::finished(snapshot))
    }

    /// Request cancellation; it takes effect at the next phase or item
    /// boundary. Returns `false` when the job had already finished.
    pub async fn cancel(&self, id: JobId) -> Result<bool> {
        let job = self.inner.registry.get(id).await?;
        if job.status.is_terminal() {
            return Ok(false);
        }
        let token = self.inner.cancels().get(&id).cloned();
        match token {
            Some(token) if !token.is_cancelled() => {
                info!(job_id = %id, "cancellation requested");
                token.cancel();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Cancel every running job.
    pub fn shutdown(&self) {
        self.inner.root.cancel();
    }

    /// Narrate text outside any job, with the same retry policy.
    pub async fn synthesize(&self, request: SpeechRequest) -> Result<SpeechAudio> {
        request.validate()?;
        let cancel = self.inner.root.child_token();
        self.inner.stages.synthesize_speech(&cancel, &request).await
    }

    /// Render a single clip outside any job. It competes for the same render
    /// permits as job clips. An empty negative prompt takes the configured one.
    pub async fn render_clip(
        &self,
        mut scene: ScenePrompt,
        image: Media,
        params: ClipParams,
    ) -> Result<Media> {
        if scene.prompt.trim().is_empty() {
            return Err(Error::Validation("positive_prompt must not be empty".into()));
        }
        if image.is_empty() {
            return Err(Error::Validation("image must not be empty".into()));
        }
        params.validate()?;

        let stages = &self.inner.stages;
        if scene.negative_prompt.trim().is_empty() {
            scene.negative_prompt = stages.config().negative_prompt.clone();
        }
        let seed = params
            .seed
            .unwrap_or_else(|| Utc::now().timestamp().unsigned_abs());
        let request = RenderRequest {
            job_id: JobId::new(),
            scene,
            image,
            params,
            seed,
        };
        info!(request_id = %request.job_id, seed, "rendering single clip");
        let cancel = self.inner.root.child_token();
        stages.render_clip(&cancel, &request).await
    }
}

async fn run_job(inner: &Inner, id: JobId, spec: &JobSpec, cancel: &CancellationToken) {
    let mut run = JobRun {
        inner,
        id,
        cancel,
        tracker: ProgressTracker::new(),
        phase: None,
    };

    let outcome = AssertUnwindSafe(run.execute(spec)).catch_unwind().await;
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => inner.fail(id, &err, run.phase).await,
        Err(_) => {
            let phase = run.phase.unwrap_or(Phase::Speech);
            let err = Error::collaborator(phase, "pipeline task panicked");
            inner.fail(id, &err, run.phase).await;
        }
    }
}

struct JobRun<'a> {
    inner: &'a Inner,
    id: JobId,
    cancel: &'a CancellationToken,
    tracker: ProgressTracker,
    phase: Option<Phase>,
}

impl<'a> JobRun<'a> {
    async fn report(&mut self, update: JobUpdate) -> Result<()> {
        let snapshot = self.inner.registry.update(self.id, update).await?;
        self.inner.publisher.publish(snapshot);
        Ok(())
    }

    async fn enter(&mut self, phase: Phase, message: String) -> Result<()> {
        self.checkpoint()?;
        self.phase = Some(phase);
        info!(job_id = %self.id, %phase, "{message}");
        let update = JobUpdate::new()
            .phase(phase)
            .progress(self.tracker.percent())
            .message(message);
        self.report(update).await
    }

    async fn advance(&mut self, phase: Phase, message: String) -> Result<()> {
        let progress = self.tracker.complete_unit(phase);
        self.report(JobUpdate::new().progress(progress).message(message)).await
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    async fn execute(&mut self, spec: &JobSpec) -> Result<()> {
        let inner = self.inner;
        let stages = &inner.stages;
        let config = stages.config();

        self.checkpoint()?;
        self.report(
            JobUpdate::new()
                .status(JobStatus::Processing)
                .message("Initializing job"),
        )
        .await?;

        // Speech
        self.enter(Phase::Speech, "Generating audio from text".into()).await?;
        let audio = stages
            .synthesize_speech(self.cancel, &SpeechRequest::for_job(spec))
            .await?;
        let progress = self.tracker.complete_unit(Phase::Speech);
        self.report(
            JobUpdate::new()
                .progress(progress)
                .audio_duration(audio.duration_secs)
                .message(format!("Audio ready ({:.1}s)", audio.duration_secs)),
        )
        .await?;

        // Prompts
        let count = scene_count(spec.image_prompt_count, audio.duration_secs, config.seconds_per_image);
        let captions = spec.add_captions;
        self.tracker.set_total(Phase::Images, count);
        self.tracker.set_total(Phase::Clips, count);
        self.tracker.set_total(Phase::Assembly, if captions { 4 } else { 3 });

        self.enter(Phase::Prompts, format!("Generating {count} image prompts")).await?;
        let prompts = stages.generate_prompts(self.cancel, &spec.text, count).await?;
        let progress = self.tracker.complete_unit(Phase::Prompts);
        self.report(
            JobUpdate::new()
                .progress(progress)
                .prompts(prompts.clone())
                .message(format!("Generated {} image prompts", prompts.len())),
        )
        .await?;

        // Images
        self.enter(Phase::Images, format!("Generating {count} images")).await?;
        let id = self.id;
        let images = self
            .fan_out(Phase::Images, "image", count, |index, cancel| {
                let scene = &prompts[index];
                async move { stages.generate_image(&cancel, id, scene).await }
            })
            .await?;

        // Clips
        let seed = spec
            .clip
            .seed
            .unwrap_or_else(|| Utc::now().timestamp().unsigned_abs());
        let requests: Vec<RenderRequest> = prompts
            .iter()
            .zip(images)
            .map(|(scene, image)| RenderRequest {
                job_id: id,
                scene: scene.clone(),
                image,
                params: spec.clip.clone(),
                seed,
            })
            .collect();

        self.enter(Phase::Clips, format!("Generating {count} videos from images")).await?;
        let clips = self
            .fan_out(Phase::Clips, "video", count, |index, cancel| {
                let request = &requests[index];
                async move { stages.render_clip(&cancel, request).await }
            })
            .await?;
        drop(requests);

        // Assembly
        let order = clip_sequence(clips.len(), spec.clip.clip_seconds(), audio.duration_secs);
        if order.len() > clips.len() {
            info!(job_id = %id, extra = order.len() - clips.len(), "repeating clips to cover narration");
        }
        let sequence: Vec<Media> = order.iter().map(|&i| clips[i].clone()).collect();

        self.enter(Phase::Assembly, format!("Concatenating {} clips", sequence.len())).await?;
        let video = stages.concat(&sequence).await?;
        drop(sequence);
        self.advance(Phase::Assembly, "Combining videos with audio".into()).await?;

        self.checkpoint()?;
        let mut video = stages.mux(&video, &audio).await?;

        if captions {
            self.advance(Phase::Assembly, "Adding captions".into()).await?;
            self.checkpoint()?;
            let track = CaptionTrack::from_text(&spec.text, audio.duration_secs, &spec.language);
            if track.is_empty() {
                warn!(job_id = %id, "no caption text, skipping captions");
            } else {
                video = stages.burn_captions(&video, &track).await?;
            }
        }
        self.advance(Phase::Assembly, "Writing final video".into()).await?;

        self.checkpoint()?;
        let artifact = stages.store(id, &video).await?;
        self.tracker.complete_unit(Phase::Assembly);
        self.report(
            JobUpdate::new()
                .status(JobStatus::Completed)
                .message("Video generation completed")
                .artifact(artifact),
        )
        .await?;
        info!(job_id = %id, "job completed");

        Ok(())
    }

    /// Run `count` items concurrently and return their results in index
    /// order. The first failure cancels the remaining items; siblings
    /// already inside an external call finish it before stopping.
    async fn fan_out<T, F, Fut>(&mut self, phase: Phase, noun: &str, count: usize, make: F) -> Result<Vec<T>>
    where
        F: Fn(usize, CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let phase_cancel = self.cancel.child_token();
        let mut pending = futures::stream::iter(0..count)
            .map(|index| {
                let item = make(index, phase_cancel.clone());
                async move { (index, item.await) }
            })
            .buffer_unordered(count.max(1));

        let mut results: Vec<Option<T>> = std::iter::repeat_with(|| None).take(count).collect();
        let mut first_err: Option<Error> = None;

        while let Some((index, outcome)) = pending.next().await {
            match outcome {
                Ok(value) if first_err.is_none() => {
                    results[index] = Some(value);
                    let done = self.tracker.done(phase) + 1;
                    self.advance(phase, format!("Generated {noun} {done} of {count}"))
                        .await?;
                }
                Ok(_) => {}
                Err(err) => {
                    if first_err.is_none() {
                        warn!(job_id = %self.id, %phase, index, error = %err, "item failed, stopping phase");
                        phase_cancel.cancel();
                        first_err = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_err {
            return Err(err);
        }
        results
            .into_iter()
            .collect::<Option<Vec<T>>>()
            .ok_or_else(|| Error::collaborator(phase, "missing result"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + Clone>() {}
        assert_send_sync::<Coordinator>();
    }
}
