//! Shared fixtures for integration tests
//!
//! Every external provider is replaced by an in-process fake, so these tests
//! never touch the network.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use memeforge_common::events::{EventBus, MemeEvent};
use memeforge_server::agents::{AgentError, AgentResult, AgentSet, ImageGenerator, ImageRequest, TextGenerator};
use memeforge_server::catalog::{Catalog, CatalogError, CatalogResult, GifSource, ImageFetcher, TemplateSource};
use memeforge_server::compositor::{Compositor, SceneOptions};
use memeforge_server::config::ApiKeys;
use memeforge_server::models::{GifEntry, MemeTemplate};
use memeforge_server::storage::FileStore;
use memeforge_server::{AppState, ServerSettings, Services};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, Notify};

pub const TEMPLATE_ID: &str = "181913649";

pub fn png(img: RgbaImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Solid blue sky
pub fn background_png() -> Vec<u8> {
    png(RgbaImage::from_pixel(96, 96, Rgba([40, 90, 200, 255])))
}

/// Red square on a white backdrop that keys out cleanly
pub fn character_png() -> Vec<u8> {
    let mut img = RgbaImage::from_pixel(96, 96, Rgba([255, 255, 255, 255]));
    for y in 24..72 {
        for x in 32..64 {
            img.put_pixel(x, y, Rgba([220, 30, 30, 255]));
        }
    }
    png(img)
}

/// Alternates background and character images; counts calls
#[derive(Default)]
pub struct FakeImages {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ImageGenerator for FakeImages {
    fn name(&self) -> &str {
        "fake-images"
    }

    async fn generate(&self, _request: &ImageRequest) -> AgentResult<Vec<u8>> {
        // the pipeline asks for the background first, then the character
        if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            Ok(background_png())
        } else {
            Ok(character_png())
        }
    }
}

/// Always fails, as a provider rejecting the request would
pub struct FailingImages;

#[async_trait]
impl ImageGenerator for FailingImages {
    fn name(&self) -> &str {
        "failing-images"
    }

    async fn generate(&self, _request: &ImageRequest) -> AgentResult<Vec<u8>> {
        Err(AgentError::Api {
            status: 400,
            message: "content policy violation".to_string(),
        })
    }
}

/// Blocks until released, for cancellation tests
#[derive(Default)]
pub struct GatedImages {
    pub gate: Notify,
}

#[async_trait]
impl ImageGenerator for GatedImages {
    fn name(&self) -> &str {
        "gated-images"
    }

    async fn generate(&self, _request: &ImageRequest) -> AgentResult<Vec<u8>> {
        self.gate.notified().await;
        Ok(background_png())
    }
}

pub struct FakeText {
    pub reply: String,
}

impl Default for FakeText {
    fn default() -> Self {
        Self {
            reply: r#"{"top_text": "when the build", "bottom_text": "passes first try"}"#.to_string(),
        }
    }
}

#[async_trait]
impl TextGenerator for FakeText {
    fn name(&self) -> &str {
        "fake-text"
    }

    async fn complete(&self, _system: &str, _user: &str) -> AgentResult<String> {
        Ok(self.reply.clone())
    }
}

pub struct FakeTemplates;

#[async_trait]
impl TemplateSource for FakeTemplates {
    async fn fetch_templates(&self) -> CatalogResult<Vec<MemeTemplate>> {
        Ok(vec![MemeTemplate {
            id: TEMPLATE_ID.to_string(),
            name: "Drake Hotline Bling".to_string(),
            url: "https://i.imgflip.com/30b1gx.jpg".to_string(),
            width: 1200,
            height: 1200,
            box_count: 2,
        }])
    }
}

/// GIF source without a key
pub struct UnconfiguredGifs;

#[async_trait]
impl GifSource for UnconfiguredGifs {
    async fn trending(&self, _limit: u32) -> CatalogResult<Vec<GifEntry>> {
        Err(CatalogError::NotConfigured("giphy".to_string()))
    }

    async fn search(&self, _query: &str, _limit: u32) -> CatalogResult<Vec<GifEntry>> {
        Err(CatalogError::NotConfigured("giphy".to_string()))
    }
}

pub struct FakeGifs;

#[async_trait]
impl GifSource for FakeGifs {
    async fn trending(&self, limit: u32) -> CatalogResult<Vec<GifEntry>> {
        Ok((0..limit.min(60))
            .map(|i| gif(&format!("trending-{}", i)))
            .collect())
    }

    async fn search(&self, query: &str, _limit: u32) -> CatalogResult<Vec<GifEntry>> {
        Ok(vec![gif(query)])
    }
}

fn gif(id: &str) -> GifEntry {
    GifEntry {
        id: id.to_string(),
        title: id.to_string(),
        url: format!("https://media.giphy.com/{}.gif", id),
        preview_url: format!("https://media.giphy.com/{}_w.gif", id),
        width: 200,
        height: 150,
    }
}

/// Serves a fixed image for every URL
pub struct FakeFetcher;

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, _url: &str) -> CatalogResult<Vec<u8>> {
        Ok(png(RgbaImage::from_pixel(120, 80, Rgba([200, 200, 200, 255]))))
    }
}

pub struct TestHarness {
    pub state: AppState,
    /// Holds the file store directory
    pub dir: TempDir,
}

/// App state over an in-memory database and a temporary file store
pub async fn harness_with(
    images: Arc<dyn ImageGenerator>,
    text: Arc<dyn TextGenerator>,
    gifs: Arc<dyn GifSource>,
    settings: ServerSettings,
) -> TestHarness {
    let dir = TempDir::new().unwrap();
    let db = memeforge_server::db::init_memory_pool().await.unwrap();
    let event_bus = EventBus::new(256);

    let catalog = Arc::new(Catalog::new(
        Arc::new(FakeTemplates),
        gifs,
        Duration::from_secs(3600),
        Duration::from_secs(600),
        event_bus.clone(),
    ));

    let compositor = Compositor::new(None).with_options(SceneOptions {
        canvas_size: 128,
        ..SceneOptions::default()
    });

    let services = Services {
        files: FileStore::new(dir.path().join("files")),
        catalog,
        image_fetcher: Arc::new(FakeFetcher),
        agents: AgentSet::new(images, text),
        compositor: Arc::new(compositor),
        api_keys: ApiKeys::new(),
    };

    TestHarness {
        state: AppState::new(db, event_bus, services, settings),
        dir,
    }
}

pub async fn harness() -> TestHarness {
    harness_with(
        Arc::new(FakeImages::default()),
        Arc::new(FakeText::default()),
        Arc::new(FakeGifs),
        ServerSettings::default(),
    )
    .await
}

/// Wait for the first event matching `pred`
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<MemeEvent>, pred: F) -> MemeEvent
where
    F: Fn(&MemeEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event bus closed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// True for the event that ends a creation
pub fn is_terminal(event: &MemeEvent) -> bool {
    matches!(
        event,
        MemeEvent::CreationCompleted { .. }
            | MemeEvent::CreationFailed { .. }
            | MemeEvent::CreationCancelled { .. }
    )
}
