//! OpenAI API client
//!
//! Chat completions for captions and image generation for the optional
//! OpenAI image backend. Images are requested as `b64_json` so no second
//! download is needed.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use super::{api_error_message, RateLimiter, USER_AGENT};
use crate::agents::{AgentError, AgentResult, ImageGenerator, ImageRequest, TextGenerator};
use crate::config::{ApiKeys, Provider};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com";
const RATE_LIMIT_MS: u64 = 200;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    b64_json: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageGenerationBody<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'static str,
    response_format: &'static str,
}

pub struct OpenAiClient {
    http_client: reqwest::Client,
    rate_limiter: RateLimiter,
    keys: ApiKeys,
    base_url: String,
    chat_model: String,
    image_model: String,
}

impl OpenAiClient {
    pub fn new(keys: ApiKeys, chat_model: String, image_model: String) -> AgentResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| AgentError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            rate_limiter: RateLimiter::new("OpenAI", RATE_LIMIT_MS),
            keys,
            base_url: OPENAI_BASE_URL.to_string(),
            chat_model,
            image_model,
        })
    }

    /// Point the client at another host (proxies, compatible servers)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn api_key(&self) -> AgentResult<String> {
        self.keys
            .get(Provider::OpenAi)
            .ok_or_else(|| AgentError::MissingApiKey(Provider::OpenAi.to_string()))
    }

    async fn post_json(&self, path: &str, body: &serde_json::Value) -> AgentResult<String> {
        let api_key = self.api_key()?;
        self.rate_limiter.wait().await;

        let response = self
            .http_client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(AgentError::Api {
                status: status.as_u16(),
                message: api_error_message(&text),
            });
        }

        Ok(text)
    }
}

/// Nearest size DALL-E accepts for the requested aspect ratio
pub fn image_size_for(width: u32, height: u32) -> &'static str {
    if width > height + height / 4 {
        "1792x1024"
    } else if height > width + width / 4 {
        "1024x1792"
    } else {
        "1024x1024"
    }
}

fn parse_chat_response(body: &str) -> AgentResult<String> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| AgentError::Parse(e.to_string()))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AgentError::Empty("chat completion had no content".to_string()))
}

fn parse_image_response(body: &str) -> AgentResult<Vec<u8>> {
    let parsed: ImageResponse =
        serde_json::from_str(body).map_err(|e| AgentError::Parse(e.to_string()))?;

    let encoded = parsed
        .data
        .into_iter()
        .find_map(|d| d.b64_json)
        .ok_or_else(|| AgentError::Empty("image response had no data".to_string()))?;

    base64::engine::general_purpose::STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| AgentError::Parse(format!("invalid base64 image: {}", e)))
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, system: &str, user: &str) -> AgentResult<String> {
        let body = json!({
            "model": self.chat_model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "response_format": { "type": "json_object" },
            "temperature": 0.9,
        });

        tracing::debug!(model = %self.chat_model, "Requesting chat completion");
        let text = self.post_json("/v1/chat/completions", &body).await?;
        parse_chat_response(&text)
    }
}

#[async_trait]
impl ImageGenerator for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, request: &ImageRequest) -> AgentResult<Vec<u8>> {
        let body = ImageGenerationBody {
            model: &self.image_model,
            prompt: &request.prompt,
            n: 1,
            size: image_size_for(request.width, request.height),
            response_format: "b64_json",
        };
        let body = serde_json::to_value(&body).map_err(|e| AgentError::Parse(e.to_string()))?;

        tracing::debug!(model = %self.image_model, size = %body["size"], "Requesting image");
        let text = self.post_json("/v1/images/generations", &body).await?;
        let bytes = parse_image_response(&text)?;

        tracing::info!(bytes = bytes.len(), "OpenAI image generated");
        Ok(bytes)
    }
}
