//! Template image downloads

use async_trait::async_trait;
use std::time::Duration;

use super::USER_AGENT;
use crate::catalog::{CatalogError, CatalogResult, ImageFetcher};

/// Largest template image accepted
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

pub struct HttpImageFetcher {
    http_client: reqwest::Client,
    max_bytes: usize,
}

impl HttpImageFetcher {
    pub fn new() -> CatalogResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            max_bytes: MAX_IMAGE_BYTES,
        })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> CatalogResult<Vec<u8>> {
        let mut response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Api {
                status: status.as_u16(),
                message: format!("image download failed: {}", url),
            });
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_bytes {
                return Err(CatalogError::TooLarge { limit: self.max_bytes });
            }
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| CatalogError::Network(e.to_string()))?
        {
            if bytes.len() + chunk.len() > self.max_bytes {
                return Err(CatalogError::TooLarge { limit: self.max_bytes });
            }
            bytes.extend_from_slice(&chunk);
        }

        tracing::debug!(url, bytes = bytes.len(), "Downloaded image");
        Ok(bytes)
    }
}
