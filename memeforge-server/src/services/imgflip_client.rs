//! Imgflip template list client

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::USER_AGENT;
use crate::catalog::{CatalogError, CatalogResult, TemplateSource};
use crate::models::MemeTemplate;

pub const IMGFLIP_MEMES_URL: &str = "https://api.imgflip.com/get_memes";

#[derive(Debug, Deserialize)]
struct GetMemesResponse {
    success: bool,
    #[serde(default)]
    data: Option<GetMemesData>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetMemesData {
    memes: Vec<ImgflipMeme>,
}

#[derive(Debug, Deserialize)]
struct ImgflipMeme {
    id: String,
    name: String,
    url: String,
    width: u32,
    height: u32,
    #[serde(default)]
    box_count: u32,
}

pub struct ImgflipClient {
    http_client: reqwest::Client,
    url: String,
}

impl ImgflipClient {
    pub fn new() -> CatalogResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            url: IMGFLIP_MEMES_URL.to_string(),
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

fn parse_get_memes(body: &str) -> CatalogResult<Vec<MemeTemplate>> {
    let parsed: GetMemesResponse =
        serde_json::from_str(body).map_err(|e| CatalogError::Parse(e.to_string()))?;

    if !parsed.success {
        return Err(CatalogError::Api {
            status: 200,
            message: parsed
                .error_message
                .unwrap_or_else(|| "imgflip reported failure".to_string()),
        });
    }

    let memes = parsed.data.map(|d| d.memes).unwrap_or_default();
    Ok(memes
        .into_iter()
        .map(|m| MemeTemplate {
            id: m.id,
            name: m.name,
            url: m.url,
            width: m.width,
            height: m.height,
            box_count: m.box_count,
        })
        .collect())
}

#[async_trait]
impl TemplateSource for ImgflipClient {
    async fn fetch_templates(&self) -> CatalogResult<Vec<MemeTemplate>> {
        tracing::debug!(url = %self.url, "Fetching meme templates");

        let response = self
            .http_client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(CatalogError::Api {
                status: status.as_u16(),
                message: super::api_error_message(&text),
            });
        }

        parse_get_memes(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get_memes() {
        let body = r#"{
            "success": true,
            "data": {"memes": [
                {"id": "181913649", "name": "Drake Hotline Bling",
                 "url": "https://i.imgflip.com/30b1gx.jpg",
                 "width": 1200, "height": 1200, "box_count": 2, "captions": 1000}
            ]}
        }"#;

        let templates = parse_get_memes(body).unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].name, "Drake Hotline Bling");
        assert_eq!(templates[0].box_count, 2);
    }

    #[test]
    fn test_parse_failure_flag() {
        let body = r#"{"success": false, "error_message": "rate limited"}"#;
        match parse_get_memes(body) {
            Err(CatalogError::Api { message, .. }) => assert_eq!(message, "rate limited"),
            other => panic!("expected Api error, got {:?}", other),
        }
    }
}
