//! ffmpeg/ffprobe media assembler.
//!
//! Each call works in its own scratch directory, which is removed when the
//! call returns whether or not it succeeded.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, bail};
use async_trait::async_trait;
use bytes::Bytes;
use sr_core::captions::CaptionTrack;
use sr_core::collab::MediaAssembler;
use sr_core::{Media, SpeechAudio};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::FfmpegConfig;

const CAPTION_STYLE: &str = "Fontname=Arial,FontSize=24,PrimaryColour=&H00FFFFFF,BackColour=&H80000000,BorderStyle=4,Alignment=2";

struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    async fn create(label: &str) -> anyhow::Result<Self> {
        let path = std::env::temp_dir().join(format!("storyreel-{label}-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&path)
            .await
            .with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
        tokio::fs::write(self.path.join(name), bytes)
            .await
            .with_context(|| format!("failed to write {name}"))
    }

    async fn read(&self, name: &str) -> anyhow::Result<Bytes> {
        let bytes = tokio::fs::read(self.path.join(name))
            .await
            .with_context(|| format!("ffmpeg produced no {name}"))?;
        Ok(Bytes::from(bytes))
    }

    async fn remove(self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.path).await {
            warn!(path = %self.path.display(), error = %e, "failed to remove scratch dir");
        }
    }
}

/// Parse ffprobe's `format=duration` output.
pub fn parse_duration(stdout: &str) -> anyhow::Result<f64> {
    let raw = stdout.trim();
    let secs: f64 = raw
        .parse()
        .with_context(|| format!("unexpected ffprobe output {raw:?}"))?;
    if !secs.is_finite() || secs <= 0.0 {
        bail!("invalid audio duration {secs}");
    }
    Ok(secs)
}

fn concat_list(names: &[String]) -> String {
    names.iter().map(|name| format!("file '{name}'\n")).collect()
}

pub struct Ffmpeg {
    config: FfmpegConfig,
}

impl Ffmpeg {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }

    async fn run(&self, program: &str, dir: &Path, args: &[&str]) -> anyhow::Result<String> {
        debug!(program, ?args, "running");
        let output = Command::new(program)
            .current_dir(dir)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to start {program}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            bail!("{program} exited with {}: {}", output.status, tail.join(" | "));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn ffmpeg(&self, dir: &Path, args: &[&str]) -> anyhow::Result<()> {
        self.run(&self.config.ffmpeg_bin, dir, args).await.map(|_| ())
    }

    /// Duration in seconds of an audio payload.
    pub async fn audio_duration(&self, audio: &Media) -> anyhow::Result<f64> {
        let scratch = ScratchDir::create("duration").await?;
        let result = self.duration_in(&scratch, audio).await;
        scratch.remove().await;
        result
    }

    async fn duration_in(&self, scratch: &ScratchDir, audio: &Media) -> anyhow::Result<f64> {
        let name = format!("audio.{}", audio.extension);
        scratch.write(&name, &audio.bytes).await?;
        let stdout = self
            .run(
                &self.config.ffprobe_bin,
                scratch.path(),
                &[
                    "-v",
                    "error",
                    "-show_entries",
                    "format=duration",
                    "-of",
                    "default=noprint_wrappers=1:nokey=1",
                    &name,
                ],
            )
            .await?;
        parse_duration(&stdout)
    }

    async fn concat_in(&self, scratch: &ScratchDir, clips: &[Media]) -> anyhow::Result<Media> {
        let mut names = Vec::with_capacity(clips.len());
        for (i, clip) in clips.iter().enumerate() {
            let name = format!("clip_{i:03}.{}", clip.extension);
            scratch.write(&name, &clip.bytes).await?;
            names.push(name);
        }
        scratch.write("files.txt", concat_list(&names).as_bytes()).await?;

        let dir = scratch.path();
        let copy = self
            .ffmpeg(
                dir,
                &["-y", "-f", "concat", "-safe", "0", "-i", "files.txt", "-c", "copy", "concat.mp4"],
            )
            .await;
        if let Err(e) = copy {
            warn!(error = %e, "concat with stream copy failed, re-encoding");
            self.ffmpeg(
                dir,
                &[
                    "-y", "-f", "concat", "-safe", "0", "-i", "files.txt", "-c:v", "libx264", "-pix_fmt",
                    "yuv420p", "concat.mp4",
                ],
            )
            .await?;
        }
        Ok(Media::new(scratch.read("concat.mp4").await?, "mp4"))
    }

    async fn mux_in(&self, scratch: &ScratchDir, video: &Media, audio: &SpeechAudio) -> anyhow::Result<Media> {
        let audio_name = format!("narration.{}", audio.media.extension);
        scratch.write("video.mp4", &video.bytes).await?;
        scratch.write(&audio_name, &audio.media.bytes).await?;

        let duration = format!("{:.3}", audio.duration_secs);
        self.ffmpeg(
            scratch.path(),
            &[
                "-y", "-i", "video.mp4", "-i", &audio_name, "-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy",
                "-c:a", "aac", "-t", &duration, "muxed.mp4",
            ],
        )
        .await?;
        Ok(Media::new(scratch.read("muxed.mp4").await?, "mp4"))
    }

    async fn captions_in(&self, scratch: &ScratchDir, video: &Media, captions: &CaptionTrack) -> anyhow::Result<Media> {
        scratch.write("video.mp4", &video.bytes).await?;
        scratch.write("captions.srt", captions.to_srt().as_bytes()).await?;

        let filter = format!("subtitles=captions.srt:force_style='{CAPTION_STYLE}'");
        self.ffmpeg(
            scratch.path(),
            &["-y", "-i", "video.mp4", "-vf", &filter, "-c:a", "copy", "captioned.mp4"],
        )
        .await?;
        Ok(Media::new(scratch.read("captioned.mp4").await?, "mp4"))
    }
}

#[async_trait]
impl MediaAssembler for Ffmpeg {
    async fn concat(&self, clips: &[Media]) -> anyhow::Result<Media> {
        if clips.is_empty() {
            bail!("no clips to concatenate");
        }
        let scratch = ScratchDir::create("concat").await?;
        let result = self.concat_in(&scratch, clips).await;
        scratch.remove().await;
        result
    }

    async fn mux(&self, video: &Media, audio: &SpeechAudio) -> anyhow::Result<Media> {
        let scratch = ScratchDir::create("mux").await?;
        let result = self.mux_in(&scratch, video, audio).await;
        scratch.remove().await;
        result
    }

    async fn burn_captions(&self, video: &Media, captions: &CaptionTrack) -> anyhow::Result<Media> {
        let scratch = ScratchDir::create("captions").await?;
        let result = self.captions_in(&scratch, video, captions).await;
        scratch.remove().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("18.024000\n").unwrap(), 18.024);
        assert!(parse_duration("N/A").is_err());
        assert!(parse_duration("0.000000").is_err());
    }

    #[test]
    fn test_concat_list() {
        let names = vec!["clip_000.mp4".to_string(), "clip_001.mp4".to_string()];
        assert_eq!(concat_list(&names), "file 'clip_000.mp4'\nfile 'clip_001.mp4'\n");
    }

    #[tokio::test]
    async fn test_scratch_dir_removed() {
        let scratch = ScratchDir::create("test").await.unwrap();
        scratch.write("a.txt", b"hello").await.unwrap();
        assert_eq!(&scratch.read("a.txt").await.unwrap()[..], b"hello");
        let path = scratch.path().to_path_buf();
        scratch.remove().await;
        assert!(!path.exists());
    }
}
