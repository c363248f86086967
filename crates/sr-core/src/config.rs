use std::time::Duration;

use crate::retry::RetryPolicy;

pub const DEFAULT_NEGATIVE_PROMPT: &str = "Overexposure, static, blurred details, subtitles, paintings, pictures, still, overall gray, worst quality, low quality, JPEG compression residue, ugly, mutilated, redundant fingers, poorly painted hands, poorly painted faces, deformed, disfigured, deformed limbs, fused fingers, cluttered background, three legs, a lot of people in the background, upside down";

#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Concurrent image calls across all jobs.
    pub image_concurrency: usize,
    /// Concurrent render sessions across all jobs.
    pub render_concurrency: usize,
    pub retry: RetryPolicy,
    pub render: RenderConfig,
    /// Narration seconds covered by one scene when the count is derived.
    pub seconds_per_image: f64,
    pub negative_prompt: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image_concurrency: 4,
            render_concurrency: 2,
            retry: RetryPolicy::default(),
            render: RenderConfig::default(),
            seconds_per_image: 5.0,
            negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
        }
    }
}
