//! AI agents for the creation pipeline
//!
//! Each agent pairs prompt construction with one external call:
//! - [`BackgroundAgent`]: scene image, no people
//! - [`CharacterAgent`]: single subject on a plain background, keyed out later
//! - [`CaptionAgent`]: top/bottom caption text
//!
//! The agents talk to providers through the [`ImageGenerator`] and
//! [`TextGenerator`] traits so tests can swap in canned implementations.

pub mod background;
pub mod caption;
pub mod character;
pub mod prompts;

pub use background::BackgroundAgent;
pub use caption::CaptionAgent;
pub use character::CharacterAgent;

use async_trait::async_trait;
use memeforge_common::config::{ImageProvider, TomlConfig};
use std::sync::Arc;
use thiserror::Error;

use crate::config::ApiKeys;
use crate::services::{OpenAiClient, StabilityClient};

/// Square output used by both image agents
pub const AGENT_IMAGE_SIZE: u32 = 1024;

/// Agent and provider client errors
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("API key not configured for {0}")]
    MissingApiKey(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Empty result: {0}")]
    Empty(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Text-to-image request
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub prompt: String,
    /// Things the image must not contain (providers without negative prompts ignore it)
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
}

/// Text-to-image provider
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Generate one image; returns encoded image bytes (PNG)
    async fn generate(&self, request: &ImageRequest) -> AgentResult<Vec<u8>>;
}

/// Chat completion provider
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Single-turn completion; returns the assistant message content
    async fn complete(&self, system: &str, user: &str) -> AgentResult<String>;
}

/// Generated image and the prompt that produced it
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub prompt: String,
    pub bytes: Vec<u8>,
}

/// The three agents used by the orchestrator
#[derive(Clone)]
pub struct AgentSet {
    pub background: BackgroundAgent,
    pub character: CharacterAgent,
    pub caption: CaptionAgent,
}

impl AgentSet {
    pub fn new(images: Arc<dyn ImageGenerator>, text: Arc<dyn TextGenerator>) -> Self {
        Self {
            background: BackgroundAgent::new(images.clone()),
            character: CharacterAgent::new(images),
            caption: CaptionAgent::new(text),
        }
    }

    /// Build agents backed by the configured providers
    ///
    /// Captions always use OpenAI; `image_provider` picks the image backend.
    pub fn from_config(config: &TomlConfig, keys: ApiKeys) -> AgentResult<Self> {
        let openai = Arc::new(OpenAiClient::new(
            keys.clone(),
            config.openai_chat_model.clone(),
            config.openai_image_model.clone(),
        )?);

        let images: Arc<dyn ImageGenerator> = match config.image_provider {
            ImageProvider::Stability => Arc::new(StabilityClient::new(
                keys,
                config.stability_engine.clone(),
            )?),
            ImageProvider::OpenAi => openai.clone(),
        };

        tracing::info!(
            image_provider = images.name(),
            text_provider = TextGenerator::name(openai.as_ref()),
            "Agents configured"
        );

        Ok(Self::new(images, openai))
    }
}
