//! Caption agent
//!
//! Asks the text model for a JSON `{"top_text", "bottom_text"}` object. Models
//! sometimes answer in prose anyway, so the first two non-empty lines are
//! accepted as a fallback.

use serde::Deserialize;
use std::sync::Arc;

use super::{prompts, AgentError, AgentResult, TextGenerator};
use crate::models::Caption;

/// Longest caption line kept, in characters
pub const MAX_CAPTION_CHARS: usize = 80;

#[derive(Debug, Deserialize)]
struct CaptionJson {
    #[serde(default)]
    top_text: String,
    #[serde(default)]
    bottom_text: String,
}

#[derive(Clone)]
pub struct CaptionAgent {
    generator: Arc<dyn TextGenerator>,
}

impl CaptionAgent {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn generate(&self, concept: &str, style: Option<&str>) -> AgentResult<Caption> {
        let user = prompts::caption_user_prompt(concept, style);
        let raw = self.generator.complete(prompts::CAPTION_SYSTEM, &user).await?;
        let caption = parse_caption(&raw)?;

        tracing::debug!(
            top = %caption.top_text,
            bottom = %caption.bottom_text,
            "Caption generated"
        );
        Ok(caption)
    }
}

/// Turn a model reply into a normalized caption
pub fn parse_caption(raw: &str) -> AgentResult<Caption> {
    let (top, bottom) = match serde_json::from_str::<CaptionJson>(strip_code_fence(raw)) {
        Ok(parsed) => (parsed.top_text, parsed.bottom_text),
        Err(_) => {
            let mut lines = raw
                .lines()
                .map(|l| l.trim().trim_matches('"').trim())
                .filter(|l| !l.is_empty() && !l.starts_with("```"));
            (
                lines.next().unwrap_or_default().to_string(),
                lines.next().unwrap_or_default().to_string(),
            )
        }
    };

    let caption = Caption::new(normalize_line(&top), normalize_line(&bottom));
    if caption.is_empty() {
        return Err(AgentError::Empty("model returned no caption text".to_string()));
    }
    Ok(caption)
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

fn normalize_line(line: &str) -> String {
    let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .to_uppercase()
        .chars()
        .take(MAX_CAPTION_CHARS)
        .collect::<String>()
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[test]
    fn test_parse_json_reply() {
        let c = parse_caption(r#"{"top_text": "when the build", "bottom_text": "finally passes"}"#)
            .unwrap();
        assert_eq!(c, Caption::new("WHEN THE BUILD", "FINALLY PASSES"));
    }

    #[test]
    fn test_parse_fenced_json() {
        let c = parse_caption("```json\n{\"top_text\": \"a\", \"bottom_text\": \"b\"}\n```").unwrap();
        assert_eq!(c, Caption::new("A", "B"));
    }

    #[test]
    fn test_line_fallback() {
        let c = parse_caption("\n  \"one does not simply\"  \n\nwrite   rust\nextra line").unwrap();
        assert_eq!(c, Caption::new("ONE DOES NOT SIMPLY", "WRITE RUST"));
    }

    #[test]
    fn test_single_line_leaves_bottom_empty() {
        let c = parse_caption("just one line").unwrap();
        assert_eq!(c.top_text, "JUST ONE LINE");
        assert_eq!(c.bottom_text, "");
    }

    #[test]
    fn test_truncates_long_lines() {
        let long = "x".repeat(200);
        let c = parse_caption(&format!(r#"{{"top_text": "{}", "bottom_text": "ok"}}"#, long)).unwrap();
        assert_eq!(c.top_text.chars().count(), MAX_CAPTION_CHARS);
    }

    #[test]
    fn test_empty_reply_is_error() {
        assert!(matches!(parse_caption("   \n "), Err(AgentError::Empty(_))));
        assert!(matches!(
            parse_caption(r#"{"top_text": "", "bottom_text": " "}"#),
            Err(AgentError::Empty(_))
        ));
    }

    struct Canned(&'static str);

    #[async_trait]
    impl TextGenerator for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, system: &str, user: &str) -> AgentResult<String> {
            assert!(system.contains("JSON"));
            assert!(user.contains("tax season"));
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_agent_uses_generator() {
        let agent = CaptionAgent::new(Arc::new(Canned(r#"{"top_text":"me","bottom_text":"also me"}"#)));
        let caption = agent.generate("tax season", None).await.unwrap();
        assert_eq!(caption, Caption::new("ME", "ALSO ME"));
    }
}
