//! Character agent
//!
//! Asks for a lone subject on plain white so the compositor can key the
//! background out.

use std::sync::Arc;

use super::{prompts, AgentResult, GeneratedImage, ImageGenerator, ImageRequest, AGENT_IMAGE_SIZE};

#[derive(Clone)]
pub struct CharacterAgent {
    generator: Arc<dyn ImageGenerator>,
}

impl CharacterAgent {
    pub fn new(generator: Arc<dyn ImageGenerator>) -> Self {
        Self { generator }
    }

    pub fn request(concept: &str, style: Option<&str>) -> ImageRequest {
        ImageRequest {
            prompt: prompts::character_prompt(concept, style),
            negative_prompt: Some(prompts::CHARACTER_NEGATIVE.to_string()),
            width: AGENT_IMAGE_SIZE,
            height: AGENT_IMAGE_SIZE,
        }
    }

    pub async fn generate(&self, concept: &str, style: Option<&str>) -> AgentResult<GeneratedImage> {
        let request = Self::request(concept, style);
        tracing::debug!(provider = self.generator.name(), "Generating character");

        let bytes = self.generator.generate(&request).await?;
        Ok(GeneratedImage {
            prompt: request.prompt,
            bytes,
        })
    }
}
