//! memeforge-server library interface
//!
//! Exposes the router and application state for the binary and for
//! integration tests.

pub mod agents;
pub mod api;
pub mod catalog;
pub mod compositor;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod storage;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::services::ServeDir;
use uuid::Uuid;
use memeforge_common::config::{ImageProvider, TomlConfig};
use memeforge_common::events::EventBus;

use crate::agents::AgentSet;
use crate::catalog::{Catalog, ImageFetcher};
use crate::compositor::Compositor;
use crate::config::ApiKeys;
use crate::orchestrator::MemeOrchestrator;
use crate::storage::{FileStore, FILES_URL_PREFIX};

/// Runtime settings fixed at startup
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub max_concurrent_creations: usize,
    pub image_provider: ImageProvider,
    /// TOML file that API keys set through the UI are synced to
    pub config_path: Option<PathBuf>,
}

impl ServerSettings {
    pub fn from_toml(config: &TomlConfig, config_path: Option<PathBuf>) -> Self {
        Self {
            max_concurrent_creations: config.max_concurrent_creations.max(1),
            image_provider: config.image_provider,
            config_path,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self::from_toml(&TomlConfig::default(), None)
    }
}

/// External collaborators, swapped for fakes in tests
pub struct Services {
    pub files: FileStore,
    pub catalog: Arc<Catalog>,
    pub image_fetcher: Arc<dyn ImageFetcher>,
    pub agents: AgentSet,
    pub compositor: Arc<Compositor>,
    pub api_keys: ApiKeys,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Event bus feeding the WebSocket and SSE channels
    pub event_bus: EventBus,
    pub files: FileStore,
    pub catalog: Arc<Catalog>,
    pub image_fetcher: Arc<dyn ImageFetcher>,
    pub orchestrator: MemeOrchestrator,
    pub compositor: Arc<Compositor>,
    pub api_keys: ApiKeys,
    pub settings: Arc<ServerSettings>,
    /// Cancellation tokens of running creations; also the concurrency count
    pub cancellation_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Spawned creation runs, drained on shutdown
    pub tasks: TaskTracker,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last background failure, reported by /health
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        services: Services,
        settings: ServerSettings,
    ) -> Self {
        let orchestrator = MemeOrchestrator::new(
            db.clone(),
            event_bus.clone(),
            services.files.clone(),
            services.agents,
            services.compositor.clone(),
        );

        Self {
            db,
            event_bus,
            files: services.files,
            catalog: services.catalog,
            image_fetcher: services.image_fetcher,
            orchestrator,
            compositor: services.compositor,
            api_keys: services.api_keys,
            settings: Arc::new(settings),
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            tasks: TaskTracker::new(),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Cancel running creations and wait for their tasks to record it
    ///
    /// Returns false if the tasks did not finish within `grace`.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        {
            let running = self.cancellation_tokens.read().await;
            if !running.is_empty() {
                tracing::info!("Cancelling {} running creations", running.len());
            }
            for token in running.values() {
                token.cancel();
            }
        }

        self.tasks.close();
        match tokio::time::timeout(grace, self.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    "{} creation tasks still running after {:?}",
                    self.tasks.len(),
                    grace
                );
                false
            }
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    let files = ServeDir::new(state.files.root());

    Router::new()
        // UI routes (HTML pages)
        .merge(api::ui_routes())
        // API routes
        .merge(api::catalog_routes())
        .merge(api::meme_routes())
        .merge(api::creation_routes())
        .merge(api::settings_routes())
        .merge(api::health_routes())
        // Event channels
        .route("/ws", get(api::ws::ws_handler))
        .route("/events", get(api::sse::event_stream))
        .nest_service(FILES_URL_PREFIX, files)
        .with_state(state)
}
