//! Template and GIF catalogs
//!
//! Both provider lists are kept in a [`TtlCache`]: a time-stamped in-memory
//! list replaced wholesale once it expires. A failed refresh keeps serving the
//! previous list.

use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use memeforge_common::events::{EventBus, MemeEvent};

use crate::models::{GifEntry, MemeTemplate};

/// Number of trending GIFs kept in the cache
pub const TRENDING_GIF_LIMIT: u32 = 50;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{0} is not configured")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Download exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Blank meme template provider
#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn fetch_templates(&self) -> CatalogResult<Vec<MemeTemplate>>;
}

/// GIF provider
#[async_trait]
pub trait GifSource: Send + Sync {
    async fn trending(&self, limit: u32) -> CatalogResult<Vec<GifEntry>>;
    async fn search(&self, query: &str, limit: u32) -> CatalogResult<Vec<GifEntry>>;
}

/// Downloads template images
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> CatalogResult<Vec<u8>>;
}

struct CacheEntry<T> {
    fetched_at: Instant,
    list: Arc<Vec<T>>,
    /// Set by `invalidate`; the list stays as a stale fallback
    expired: bool,
}

impl<T> CacheEntry<T> {
    fn is_fresh(&self, ttl: Duration) -> bool {
        !self.expired && self.fetched_at.elapsed() < ttl
    }
}

/// Time-to-live cache for a whole list
pub struct TtlCache<T> {
    name: &'static str,
    ttl: Duration,
    entry: Mutex<Option<CacheEntry<T>>>,
}

impl<T> TtlCache<T> {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// Cached list while fresh, otherwise the result of `fetch`
    ///
    /// The lock is held across the refresh so concurrent callers share one
    /// provider request.
    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> CatalogResult<Arc<Vec<T>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CatalogResult<Vec<T>>>,
    {
        let mut entry = self.entry.lock().await;

        if let Some(cached) = entry.as_ref() {
            if cached.is_fresh(self.ttl) {
                return Ok(cached.list.clone());
            }
        }

        match fetch().await {
            Ok(list) => {
                let list = Arc::new(list);
                tracing::info!(cache = self.name, entries = list.len(), "Cache refreshed");
                *entry = Some(CacheEntry {
                    fetched_at: Instant::now(),
                    list: list.clone(),
                    expired: false,
                });
                Ok(list)
            }
            Err(e) => match entry.as_ref() {
                Some(stale) => {
                    tracing::warn!(
                        cache = self.name,
                        error = %e,
                        "Cache refresh failed, serving stale list"
                    );
                    Ok(stale.list.clone())
                }
                None => Err(e),
            },
        }
    }

    /// Force the next lookup to refresh
    pub async fn invalidate(&self) {
        if let Some(cached) = self.entry.lock().await.as_mut() {
            cached.expired = true;
        }
    }

    /// Time since the last successful refresh
    pub async fn age(&self) -> Option<Duration> {
        self.entry
            .lock()
            .await
            .as_ref()
            .map(|cached| cached.fetched_at.elapsed())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Template and GIF catalogs backed by their providers
pub struct Catalog {
    template_source: Arc<dyn TemplateSource>,
    gif_source: Arc<dyn GifSource>,
    templates: TtlCache<MemeTemplate>,
    gifs: TtlCache<GifEntry>,
    event_bus: EventBus,
}

impl Catalog {
    pub fn new(
        template_source: Arc<dyn TemplateSource>,
        gif_source: Arc<dyn GifSource>,
        template_ttl: Duration,
        gif_ttl: Duration,
        event_bus: EventBus,
    ) -> Self {
        Self {
            template_source,
            gif_source,
            templates: TtlCache::new("templates", template_ttl),
            gifs: TtlCache::new("gifs", gif_ttl),
            event_bus,
        }
    }

    pub async fn templates(&self) -> CatalogResult<Arc<Vec<MemeTemplate>>> {
        let source = self.template_source.clone();
        let event_bus = self.event_bus.clone();
        self.templates
            .get_or_refresh(|| async move {
                let list = source.fetch_templates().await?;
                emit_refreshed(&event_bus, "templates", list.len());
                Ok(list)
            })
            .await
    }

    pub async fn find_template(&self, id: &str) -> CatalogResult<Option<MemeTemplate>> {
        Ok(self.templates().await?.iter().find(|t| t.id == id).cloned())
    }

    /// Drop the cached template list and fetch a new one
    pub async fn refresh_templates(&self) -> CatalogResult<Arc<Vec<MemeTemplate>>> {
        self.templates.invalidate().await;
        self.templates().await
    }

    /// Cached trending GIFs, truncated to `limit`
    pub async fn trending_gifs(&self, limit: usize) -> CatalogResult<Vec<GifEntry>> {
        let source = self.gif_source.clone();
        let event_bus = self.event_bus.clone();
        let list = self
            .gifs
            .get_or_refresh(|| async move {
                let list = source.trending(TRENDING_GIF_LIMIT).await?;
                emit_refreshed(&event_bus, "gifs", list.len());
                Ok(list)
            })
            .await?;

        Ok(list.iter().take(limit).cloned().collect())
    }

    /// Search pass-through; results are not cached
    pub async fn search_gifs(&self, query: &str, limit: u32) -> CatalogResult<Vec<GifEntry>> {
        self.gif_source.search(query, limit).await
    }

    pub async fn template_cache_age(&self) -> Option<Duration> {
        self.templates.age().await
    }
}

fn emit_refreshed(event_bus: &EventBus, catalog: &str, entries: usize) {
    event_bus.emit_lossy(MemeEvent::CatalogRefreshed {
        catalog: catalog.to_string(),
        entries,
        timestamp: Utc::now(),
    });
}
