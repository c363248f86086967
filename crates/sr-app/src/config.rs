use std::env;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use log::info;
use sr_core::config::{DEFAULT_NEGATIVE_PROMPT, PipelineConfig, RenderConfig};
use sr_core::retry::RetryPolicy;

use crate::clients::workflow::WorkflowNodes;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub chat_model: String,
    pub image_model: String,
    pub image_size: String,
    /// Appended to every image prompt.
    pub quality_suffix: String,
}

#[derive(Debug, Clone)]
pub struct ComfyUiConfig {
    pub api_url: String,
    pub workflow_file: PathBuf,
    pub nodes: WorkflowNodes,
}

#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub output_dir: PathBuf,
    pub openai: OpenAiConfig,
    pub comfyui: ComfyUiConfig,
    pub ffmpeg: FfmpegConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Read `.env` if present, then the process environment.
    pub fn load() -> anyhow::Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => info!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(e).context("failed to read .env"),
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let nodes = WorkflowNodes {
            positive_prompt: text("COMFYUI_NODE_POSITIVE", "6"),
            negative_prompt: text("COMFYUI_NODE_NEGATIVE", "7"),
            sampler: text("COMFYUI_NODE_SAMPLER", "3"),
            video_settings: text("COMFYUI_NODE_VIDEO_SETTINGS", "50"),
            frame_rate: text("COMFYUI_NODE_FRAME_RATE", "54"),
            image_loader: text("COMFYUI_NODE_IMAGE_LOADER", "52"),
        };

        let retry = RetryPolicy {
            attempts: parse_in(&lookup, "RETRY_ATTEMPTS", 3, 1..=10)?,
            ..RetryPolicy::default()
        };
        let render = RenderConfig {
            poll_interval: Duration::from_millis(parse_in(
                &lookup,
                "RENDER_POLL_INTERVAL_MS",
                1000,
                1..=60_000,
            )?),
            timeout: Duration::from_secs(parse_in(&lookup, "RENDER_TIMEOUT_SECS", 300, 1..=86_400)?),
        };
        let pipeline = PipelineConfig {
            image_concurrency: parse_in(&lookup, "IMAGE_CONCURRENCY", 4, 1..=64)?,
            render_concurrency: parse_in(&lookup, "RENDER_CONCURRENCY", 2, 1..=64)?,
            retry,
            render,
            seconds_per_image: parse_in(&lookup, "SECONDS_PER_IMAGE", 5.0, 0.5..=600.0)?,
            negative_prompt: text("NEGATIVE_PROMPT", DEFAULT_NEGATIVE_PROMPT),
        };

        Ok(Self {
            host: text("HOST", "0.0.0.0"),
            port: parse(&lookup, "PORT", 8000)?,
            output_dir: PathBuf::from(text("OUTPUT_DIR", "outputs")),
            openai: OpenAiConfig {
                api_key: lookup("OPENAI_API_KEY").filter(|key| !key.trim().is_empty()),
                base_url: text("OPENAI_BASE_URL", "https://api.openai.com/v1"),
                chat_model: text("OPENAI_CHAT_MODEL", "gpt-4-turbo"),
                image_model: text("OPENAI_IMAGE_MODEL", "dall-e-3"),
                image_size: text("IMAGE_SIZE", "1024x1024"),
                quality_suffix: text("IMAGE_QUALITY_PROMPT", "High quality, cinematic, detailed"),
            },
            comfyui: ComfyUiConfig {
                api_url: text("COMFYUI_API_URL", "http://localhost:8188"),
                workflow_file: PathBuf::from(text("WORKFLOW_FILE", "data/workflow_api.json")),
                nodes,
            },
            ffmpeg: FfmpegConfig {
                ffmpeg_bin: text("FFMPEG_BIN", "ffmpeg"),
                ffprobe_bin: text("FFPROBE_BIN", "ffprobe"),
            },
            pipeline,
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} must be a valid number, got {raw:?}: {e}")),
        None => Ok(default),
    }
}

/// Like `parse`, but the value must also lie within `range`.
fn parse_in<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    range: RangeInclusive<T>,
) -> anyhow::Result<T>
where
    T: FromStr + PartialOrd + Display,
    T::Err: Display,
{
    let value = parse(lookup, key, default)?;
    if !range.contains(&value) {
        anyhow::bail!(
            "{key} must be between {} and {}, got {value}",
            range.start(),
            range.end()
        );
    }
    Ok(value)
}
