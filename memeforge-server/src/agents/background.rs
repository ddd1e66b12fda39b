//! Background scene agent

use std::sync::Arc;

use super::{prompts, AgentResult, GeneratedImage, ImageGenerator, ImageRequest, AGENT_IMAGE_SIZE};

#[derive(Clone)]
pub struct BackgroundAgent {
    generator: Arc<dyn ImageGenerator>,
}

impl BackgroundAgent {
    pub fn new(generator: Arc<dyn ImageGenerator>) -> Self {
        Self { generator }
    }

    pub fn request(concept: &str, style: Option<&str>) -> ImageRequest {
        ImageRequest {
            prompt: prompts::background_prompt(concept, style),
            negative_prompt: Some(prompts::BACKGROUND_NEGATIVE.to_string()),
            width: AGENT_IMAGE_SIZE,
            height: AGENT_IMAGE_SIZE,
        }
    }

    pub async fn generate(&self, concept: &str, style: Option<&str>) -> AgentResult<GeneratedImage> {
        let request = Self::request(concept, style);
        tracing::debug!(provider = self.generator.name(), "Generating background");

        let bytes = self.generator.generate(&request).await?;
        Ok(GeneratedImage {
            prompt: request.prompt,
            bytes,
        })
    }
}
