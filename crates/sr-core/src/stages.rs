//! One executor per pipeline phase. Each wraps its collaborator call(s)
//! with the retry policy and converts failures into phase-tagged errors.

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::captions::CaptionTrack;
use crate::collab::{Collaborators, RenderRequest, SpeechRequest};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::job::{JobId, Phase, ScenePrompt};
use crate::media::{Artifact, Media, SpeechAudio};
use crate::render::RenderSession;

/// Number of scenes for a job: the requested count, or one per
/// `seconds_per_image` of narration.
pub fn scene_count(requested: u32, audio_secs: f64, seconds_per_image: f64) -> usize {
    if requested > 0 {
        return requested as usize;
    }
    let per = if seconds_per_image > 0.0 { seconds_per_image } else { 5.0 };
    ((audio_secs / per).ceil() as usize).max(1)
}

/// Turn raw model output into exactly `count` scene prompts.
///
/// Blank lines are dropped and extras beyond `count` ignored. A shortfall is
/// padded by repeating the last prompt; no usable prompt at all is an error.
pub fn normalize_prompts(raw: Vec<String>, count: usize, negative_prompt: &str) -> Result<Vec<ScenePrompt>> {
    let mut prompts: Vec<String> = raw
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .take(count)
        .collect();

    let Some(last) = prompts.last().cloned() else {
        return Err(Error::collaborator(Phase::Prompts, "model returned no usable prompts"));
    };
    if prompts.len() < count {
        warn!(requested = count, received = prompts.len(), "padding scene prompts with the last prompt");
        prompts.resize(count, last);
    }

    Ok(prompts
        .into_iter()
        .enumerate()
        .map(|(index, prompt)| ScenePrompt {
            index,
            prompt,
            negative_prompt: negative_prompt.to_string(),
        })
        .collect())
}

/// Clip order for the final cut: every clip once in scene order, then
/// repeated cyclically until the narration is covered. The muxer trims the
/// overshoot.
pub fn clip_sequence(clips: usize, clip_secs: f64, audio_secs: f64) -> Vec<usize> {
    if clips == 0 {
        return Vec::new();
    }
    let needed = if clip_secs > 0.0 {
        ((audio_secs / clip_secs).ceil() as usize).max(clips)
    } else {
        clips
    };
    (0..needed).map(|i| i % clips).collect()
}

/// Wait for a limiter slot, giving up as soon as `cancel` fires.
async fn acquire<'a>(
    permits: &'a Semaphore,
    cancel: &CancellationToken,
    phase: Phase,
) -> Result<SemaphorePermit<'a>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        permit = permits.acquire() => {
            permit.map_err(|_| Error::collaborator(phase, "limiter closed"))
        }
    }
}

pub struct StageExecutors {
    collab: Collaborators,
    config: PipelineConfig,
    image_permits: Arc<Semaphore>,
    render_permits: Arc<Semaphore>,
}

impl StageExecutors {
    pub fn new(collab: Collaborators, config: PipelineConfig) -> Self {
        let image_permits = Arc::new(Semaphore::new(config.image_concurrency.max(1)));
        let render_permits = Arc::new(Semaphore::new(config.render_concurrency.max(1)));
        Self {
            collab,
            config,
            image_permits,
            render_permits,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn synthesize_speech(
        &self,
        cancel: &CancellationToken,
        request: &SpeechRequest,
    ) -> Result<SpeechAudio> {
        self.config
            .retry
            .run(Phase::Speech.name(), cancel, |_| async {
                let audio = self
                    .collab
                    .speech
                    .synthesize(request)
                    .await
                    .map_err(|e| Error::collaborator(Phase::Speech, format!("{e:#}")))?;
                if audio.media.is_empty() {
                    return Err(Error::collaborator(Phase::Speech, "empty audio"));
                }
                if !audio.duration_secs.is_finite() || audio.duration_secs <= 0.0 {
                    return Err(Error::collaborator(
                        Phase::Speech,
                        format!("invalid audio duration {}", audio.duration_secs),
                    ));
                }
                Ok(audio)
            })
            .await
    }

    pub async fn generate_prompts(
        &self,
        cancel: &CancellationToken,
        text: &str,
        count: usize,
    ) -> Result<Vec<ScenePrompt>> {
        let raw = self
            .config
            .retry
            .run(Phase::Prompts.name(), cancel, |_| async {
                self.collab
                    .prompts
                    .generate_prompts(text, count)
                    .await
                    .map_err(|e| Error::collaborator(Phase::Prompts, format!("{e:#}")))
            })
            .await?;
        normalize_prompts(raw, count, &self.config.negative_prompt)
    }

    pub async fn generate_image(
        &self,
        cancel: &CancellationToken,
        job_id: JobId,
        scene: &ScenePrompt,
    ) -> Result<Media> {
        self.config
            .retry
            .run(Phase::Images.name(), cancel, |attempt| async move {
                let _permit = acquire(&self.image_permits, cancel, Phase::Images).await?;
                debug!(%job_id, index = scene.index, attempt, "generating image");
                let image = self
                    .collab
                    .images
                    .generate_image(&scene.prompt)
                    .await
                    .map_err(|e| {
                        Error::collaborator(Phase::Images, format!("scene {}: {e:#}", scene.index + 1))
                    })?;
                if image.is_empty() {
                    return Err(Error::collaborator(
                        Phase::Images,
                        format!("scene {}: empty image", scene.index + 1),
                    ));
                }
                Ok(image)
            })
            .await
    }

    pub async fn render_clip(&self, cancel: &CancellationToken, request: &RenderRequest) -> Result<Media> {
        self.config
            .retry
            .run(Phase::Clips.name(), cancel, |attempt| async move {
                let _permit = acquire(&self.render_permits, cancel, Phase::Clips).await?;
                debug!(job_id = %request.job_id, index = request.scene.index, attempt, "rendering clip");
                RenderSession::new(
                    self.collab.renderer.clone(),
                    self.config.render.clone(),
                    cancel.clone(),
                )
                .run(request)
                .await
            })
            .await
    }

    pub async fn concat(&self, clips: &[Media]) -> Result<Media> {
        self.collab
            .assembler
            .concat(clips)
            .await
            .map_err(|e| Error::Assembly(format!("concatenation: {e:#}")))
    }

    pub async fn mux(&self, video: &Media, audio: &SpeechAudio) -> Result<Media> {
        self.collab
            .assembler
            .mux(video, audio)
            .await
            .map_err(|e| Error::Assembly(format!("audio mux: {e:#}")))
    }

    pub async fn burn_captions(&self, video: &Media, captions: &CaptionTrack) -> Result<Media> {
        self.collab
            .assembler
            .burn_captions(video, captions)
            .await
            .map_err(|e| Error::Assembly(format!("captions: {e:#}")))
    }

    pub async fn store(&self, job_id: JobId, video: &Media) -> Result<Artifact> {
        let artifact = self
            .collab
            .store
            .store(job_id, video)
            .await
            .map_err(|e| Error::Assembly(format!("storing artifact: {e:#}")))?;
        info!(%job_id, path = %artifact.path.display(), size = artifact.size_bytes, "artifact written");
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_scene_count() {
        assert_eq!(scene_count(0, 18.0, 5.0), 4);
        assert_eq!(scene_count(0, 20.0, 5.0), 4);
        assert_eq!(scene_count(0, 0.4, 5.0), 1);
        assert_eq!(scene_count(7, 18.0, 5.0), 7);
    }

    #[test]
    fn test_prompts_padded_with_last() {
        let prompts = normalize_prompts(lines(&["a fox", "", "  a river  "]), 4, "blurry").unwrap();
        let text: Vec<_> = prompts.iter().map(|p| p.prompt.as_str()).collect();
        assert_eq!(text, vec!["a fox", "a river", "a river", "a river"]);
        assert_eq!(prompts.iter().map(|p| p.index).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert!(prompts.iter().all(|p| p.negative_prompt == "blurry"));
    }

    #[test]
    fn test_prompts_truncated_to_count() {
        let prompts = normalize_prompts(lines(&["one", "two", "three"]), 2, "").unwrap();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[1].prompt, "two");
    }

    #[test]
    fn test_no_prompts_is_an_error() {
        let err = normalize_prompts(lines(&["", "   "]), 3, "").unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Prompts));
    }

    #[tokio::test]
    async fn test_acquire_gives_up_on_cancel() {
        let permits = Semaphore::new(1);
        let held = permits.acquire().await.unwrap();
        let cancel = CancellationToken::new();
        let waiting = acquire(&permits, &cancel, Phase::Images);
        cancel.cancel();
        assert_eq!(waiting.await.unwrap_err(), Error::Cancelled);

        drop(held);
        assert!(acquire(&permits, &CancellationToken::new(), Phase::Images).await.is_ok());
    }

    #[test]
    fn test_clip_sequence_loops_to_cover_audio() {
        assert_eq!(clip_sequence(4, 5.0, 18.0), vec![0, 1, 2, 3]);
        assert_eq!(clip_sequence(2, 5.0, 18.0), vec![0, 1, 0, 1]);
        assert_eq!(clip_sequence(3, 10.0, 5.0), vec![0, 1, 2]);
        assert!(clip_sequence(0, 5.0, 18.0).is_empty());
    }
}
