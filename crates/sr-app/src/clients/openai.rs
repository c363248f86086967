//! OpenAI-compatible speech, chat and image endpoints.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use sr_core::collab::{ImageGenerator, PromptGenerator, SpeechRequest, SpeechSynthesizer};
use sr_core::{Media, SpeechAudio};
use tracing::{debug, info};

use super::check_status;
use super::ffmpeg::Ffmpeg;
use crate::config::OpenAiConfig;

const SYSTEM_PROMPT: &str = "You are a storyboard artist. You turn a story into a sequence of \
vivid, self-contained image prompts for a text-to-image model. Each prompt describes one scene: \
subject, setting, lighting, mood and camera framing. Keep characters visually consistent across \
scenes. Write prompts in English regardless of the story language.";

fn user_prompt(text: &str, count: usize) -> String {
    format!(
        "Write exactly {count} image prompts that follow this story in order, one prompt per \
         line, with no numbering and no extra commentary.\n\nStory:\n{text}"
    )
}

#[derive(Debug, Serialize)]
struct SpeechBody<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageBody<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
    response_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

pub struct OpenAiClient {
    http: Client,
    config: OpenAiConfig,
    ffmpeg: Arc<Ffmpeg>,
}

impl OpenAiClient {
    pub fn new(http: Client, config: OpenAiConfig, ffmpeg: Arc<Ffmpeg>) -> Self {
        Self { http, config, ffmpeg }
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        let request = self.http.post(url);
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

/// One prompt per non-empty line, list markers and wrapping quotes removed.
pub fn parse_prompt_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(strip_list_marker)
        .map(|line| line.trim_matches(|c| c == '"' || c == '\'').trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix(['-', '*', '•']) {
        return rest.trim_start();
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(['.', ')', ':']) {
            return rest.trim_start();
        }
    }
    line
}

#[async_trait]
impl SpeechSynthesizer for OpenAiClient {
    async fn synthesize(&self, request: &SpeechRequest) -> anyhow::Result<SpeechAudio> {
        let body = SpeechBody {
            model: &request.model,
            input: &request.text,
            voice: &request.voice,
            response_format: &request.format,
        };
        let response = self
            .post("audio/speech")
            .json(&body)
            .send()
            .await
            .context("speech request failed")?;
        let bytes = check_status(response).await?.bytes().await?;
        let media = Media::new(bytes, request.format.as_str());

        let duration_secs = self.ffmpeg.audio_duration(&media).await?;
        info!(voice = %request.voice, size = media.len(), duration_secs, "speech synthesized");
        Ok(SpeechAudio { media, duration_secs })
    }
}

#[async_trait]
impl PromptGenerator for OpenAiClient {
    async fn generate_prompts(&self, text: &str, count: usize) -> anyhow::Result<Vec<String>> {
        let user = user_prompt(text, count);
        let body = ChatBody {
            model: &self.config.chat_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.7,
            max_tokens: 2000,
        };
        let response = self
            .post("chat/completions")
            .json(&body)
            .send()
            .await
            .context("chat request failed")?;
        let reply: ChatResponse = check_status(response).await?.json().await?;

        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("chat response had no content"))?;
        let prompts = parse_prompt_lines(&content);
        debug!(requested = count, received = prompts.len(), "image prompts generated");
        Ok(prompts)
    }
}

#[async_trait]
impl ImageGenerator for OpenAiClient {
    async fn generate_image(&self, prompt: &str) -> anyhow::Result<Media> {
        let prompt = format!("{}. {}", prompt.trim_end_matches('.'), self.config.quality_suffix);
        let body = ImageBody {
            model: &self.config.image_model,
            prompt: &prompt,
            n: 1,
            size: &self.config.image_size,
            response_format: "b64_json",
        };
        let response = self
            .post("images/generations")
            .json(&body)
            .send()
            .await
            .context("image request failed")?;
        let reply: ImageResponse = check_status(response).await?.json().await?;

        let encoded = reply
            .data
            .into_iter()
            .next()
            .and_then(|d| d.b64_json)
            .ok_or_else(|| anyhow!("image response had no b64_json payload"))?;
        let bytes = STANDARD.decode(encoded).context("image payload is not valid base64")?;
        Ok(Media::new(bytes, "png"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prompt_lines() {
        let content = "1. A girl at the window\n\n2) Rain over the rooftops\n- \"A cat on a ledge\"\n* Dawn breaks\n   \n2024 was the year";
        assert_eq!(
            parse_prompt_lines(content),
            vec![
                "A girl at the window",
                "Rain over the rooftops",
                "A cat on a ledge",
                "Dawn breaks",
                "2024 was the year",
            ]
        );
    }

    #[test]
    fn test_user_prompt_names_count() {
        let prompt = user_prompt("A fox crossed the river.", 4);
        assert!(prompt.contains("exactly 4"));
        assert!(prompt.ends_with("A fox crossed the river."));
    }
}
