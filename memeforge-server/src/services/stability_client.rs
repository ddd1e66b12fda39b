//! Stability AI text-to-image client (v1 generation API)

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{api_error_message, RateLimiter, USER_AGENT};
use crate::agents::{AgentError, AgentResult, ImageGenerator, ImageRequest};
use crate::config::{ApiKeys, Provider};

pub const STABILITY_BASE_URL: &str = "https://api.stability.ai";
const RATE_LIMIT_MS: u64 = 100;
const CFG_SCALE: f32 = 7.0;
const STEPS: u32 = 30;
const MIN_DIMENSION: u32 = 512;
const MAX_DIMENSION: u32 = 1536;

#[derive(Debug, Serialize)]
struct TextPrompt<'a> {
    text: &'a str,
    weight: f32,
}

#[derive(Debug, Serialize)]
struct TextToImageBody<'a> {
    text_prompts: Vec<TextPrompt<'a>>,
    cfg_scale: f32,
    width: u32,
    height: u32,
    steps: u32,
    samples: u32,
}

#[derive(Debug, Deserialize)]
struct TextToImageResponse {
    artifacts: Vec<Artifact>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Artifact {
    base64: String,
    #[serde(default)]
    finish_reason: Option<String>,
}

pub struct StabilityClient {
    http_client: reqwest::Client,
    rate_limiter: RateLimiter,
    keys: ApiKeys,
    base_url: String,
    engine: String,
}

impl StabilityClient {
    pub fn new(keys: ApiKeys, engine: String) -> AgentResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| AgentError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            rate_limiter: RateLimiter::new("Stability", RATE_LIMIT_MS),
            keys,
            base_url: STABILITY_BASE_URL.to_string(),
            engine,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

/// Round to the nearest multiple of 64 inside the engine's accepted range
pub fn round_dimension(value: u32) -> u32 {
    let rounded = (value.saturating_add(32) / 64) * 64;
    rounded.clamp(MIN_DIMENSION, MAX_DIMENSION)
}

fn parse_text_to_image(body: &str) -> AgentResult<Vec<u8>> {
    let parsed: TextToImageResponse =
        serde_json::from_str(body).map_err(|e| AgentError::Parse(e.to_string()))?;

    let artifact = parsed
        .artifacts
        .into_iter()
        .next()
        .ok_or_else(|| AgentError::Empty("no artifacts returned".to_string()))?;

    if artifact.finish_reason.as_deref() == Some("CONTENT_FILTERED") {
        return Err(AgentError::Empty("image blocked by content filter".to_string()));
    }

    base64::engine::general_purpose::STANDARD
        .decode(artifact.base64.as_bytes())
        .map_err(|e| AgentError::Parse(format!("invalid base64 artifact: {}", e)))
}

#[async_trait]
impl ImageGenerator for StabilityClient {
    fn name(&self) -> &str {
        "stability"
    }

    async fn generate(&self, request: &ImageRequest) -> AgentResult<Vec<u8>> {
        let api_key = self
            .keys
            .get(Provider::Stability)
            .ok_or_else(|| AgentError::MissingApiKey(Provider::Stability.to_string()))?;

        let mut text_prompts = vec![TextPrompt {
            text: &request.prompt,
            weight: 1.0,
        }];
        if let Some(negative) = &request.negative_prompt {
            text_prompts.push(TextPrompt {
                text: negative,
                weight: -1.0,
            });
        }

        let body = TextToImageBody {
            text_prompts,
            cfg_scale: CFG_SCALE,
            width: round_dimension(request.width),
            height: round_dimension(request.height),
            steps: STEPS,
            samples: 1,
        };

        self.rate_limiter.wait().await;
        tracing::debug!(
            engine = %self.engine,
            width = body.width,
            height = body.height,
            "Requesting Stability text-to-image"
        );

        let url = format!(
            "{}/v1/generation/{}/text-to-image",
            self.base_url, self.engine
        );
        let response = self
            .http_client
            .post(url)
            .bearer_auth(api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
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

        let bytes = parse_text_to_image(&text)?;
        tracing::info!(bytes = bytes.len(), "Stability image generated");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_dimension() {
        assert_eq!(round_dimension(1024), 1024);
        assert_eq!(round_dimension(1000), 1024);
        assert_eq!(round_dimension(700), 704);
        assert_eq!(round_dimension(100), 512);
        assert_eq!(round_dimension(4000), 1536);
        assert_eq!(round_dimension(u32::MAX), 1536);
    }

    #[test]
    fn test_parse_artifacts() {
        let body = r#"{"artifacts":[{"base64":"aGk=","seed":42,"finishReason":"SUCCESS"}]}"#;
        assert_eq!(parse_text_to_image(body).unwrap(), b"hi");
    }

    #[test]
    fn test_filtered_artifact_is_error() {
        let body = r#"{"artifacts":[{"base64":"","seed":1,"finishReason":"CONTENT_FILTERED"}]}"#;
        assert!(matches!(parse_text_to_image(body), Err(AgentError::Empty(_))));

        assert!(matches!(
            parse_text_to_image(r#"{"artifacts":[]}"#),
            Err(AgentError::Empty(_))
        ));
    }

    #[test]
    fn test_body_serializes_negative_prompt_weight() {
        let body = TextToImageBody {
            text_prompts: vec![
                TextPrompt { text: "a", weight: 1.0 },
                TextPrompt { text: "b", weight: -1.0 },
            ],
            cfg_scale: CFG_SCALE,
            width: 1024,
            height: 1024,
            steps: STEPS,
            samples: 1,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["text_prompts"][1]["weight"], -1.0);
        assert_eq!(value["samples"], 1);
    }
}
