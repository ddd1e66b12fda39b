//! Giphy trending/search client

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{RateLimiter, USER_AGENT};
use crate::catalog::{CatalogError, CatalogResult, GifSource};
use crate::config::{ApiKeys, Provider};
use crate::models::GifEntry;

pub const GIPHY_BASE_URL: &str = "https://api.giphy.com";
const RATE_LIMIT_MS: u64 = 250;
const RATING: &str = "pg-13";

#[derive(Debug, Deserialize)]
struct GiphyResponse {
    data: Vec<GiphyGif>,
}

#[derive(Debug, Deserialize)]
struct GiphyGif {
    id: String,
    #[serde(default)]
    title: String,
    images: GiphyImages,
}

#[derive(Debug, Deserialize)]
struct GiphyImages {
    original: GiphyRendition,
    #[serde(default)]
    fixed_width: Option<GiphyRendition>,
}

/// Giphy sends dimensions as strings
#[derive(Debug, Deserialize)]
struct GiphyRendition {
    url: String,
    #[serde(default)]
    width: String,
    #[serde(default)]
    height: String,
}

pub struct GiphyClient {
    http_client: reqwest::Client,
    rate_limiter: RateLimiter,
    keys: ApiKeys,
    base_url: String,
}

impl GiphyClient {
    pub fn new(keys: ApiKeys) -> CatalogResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            rate_limiter: RateLimiter::new("Giphy", RATE_LIMIT_MS),
            keys,
            base_url: GIPHY_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> CatalogResult<Vec<GifEntry>> {
        let api_key = self
            .keys
            .get(Provider::Giphy)
            .ok_or_else(|| CatalogError::NotConfigured("GIF search (Giphy API key)".to_string()))?;

        self.rate_limiter.wait().await;

        let mut query: Vec<(&str, String)> = vec![("api_key", api_key), ("rating", RATING.to_string())];
        query.extend(params.iter().cloned());

        let response = self
            .http_client
            .get(format!("{}{}", self.base_url, path))
            .query(&query)
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

        parse_giphy(&text)
    }
}

fn parse_giphy(body: &str) -> CatalogResult<Vec<GifEntry>> {
    let parsed: GiphyResponse =
        serde_json::from_str(body).map_err(|e| CatalogError::Parse(e.to_string()))?;

    Ok(parsed
        .data
        .into_iter()
        .map(|gif| {
            let preview_url = gif
                .images
                .fixed_width
                .as_ref()
                .map(|r| r.url.clone())
                .unwrap_or_else(|| gif.images.original.url.clone());
            GifEntry {
                id: gif.id,
                title: gif.title,
                width: gif.images.original.width.parse().unwrap_or(0),
                height: gif.images.original.height.parse().unwrap_or(0),
                url: gif.images.original.url,
                preview_url,
            }
        })
        .collect())
}

#[async_trait]
impl GifSource for GiphyClient {
    async fn trending(&self, limit: u32) -> CatalogResult<Vec<GifEntry>> {
        tracing::debug!(limit, "Fetching trending GIFs");
        self.get("/v1/gifs/trending", &[("limit", limit.to_string())])
            .await
    }

    async fn search(&self, query: &str, limit: u32) -> CatalogResult<Vec<GifEntry>> {
        tracing::debug!(query, limit, "Searching GIFs");
        self.get(
            "/v1/gifs/search",
            &[("q", query.to_string()), ("limit", limit.to_string())],
        )
        .await
    }
}
