//! memeforge - meme generation server
//!
//! Serves the browser UI and the REST/WebSocket API. Template memes are
//! rendered synchronously; AI memes run through the creation pipeline in
//! background tasks and report progress over `/ws` and `/events`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use memeforge_common::config::{
    default_config_path, load_toml_config, RootFolderInitializer, RootFolderResolver,
};
use memeforge_common::events::EventBus;

use memeforge_server::agents::AgentSet;
use memeforge_server::catalog::Catalog;
use memeforge_server::compositor::{load_font, Compositor};
use memeforge_server::services::{GiphyClient, HttpImageFetcher, ImgflipClient};
use memeforge_server::storage::FileStore;
use memeforge_server::{AppState, ServerSettings, Services};

/// Time allowed for running creations to record their cancellation
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Command-line arguments for memeforge
#[derive(Parser, Debug)]
#[command(name = "memeforge")]
#[command(about = "Meme generation server")]
#[command(version)]
struct Args {
    /// Folder holding the database and generated images
    #[arg(short, long, env = "MEMEFORGE_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Port to listen on (overrides TOML)
    #[arg(short, long, env = "MEMEFORGE_PORT")]
    port: Option<u16>,

    /// Bind address (overrides TOML)
    #[arg(long, env = "MEMEFORGE_HOST")]
    host: Option<String>,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = default_config_path(args.config.as_deref());
    let toml_config = load_toml_config(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "memeforge_server={level},memeforge_common={level},tower_http=info",
                    level = toml_config.logging.level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting memeforge v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE"),
    );
    info!("Config: {}", config_path.display());

    // Root folder and database
    let root_folder = RootFolderResolver::new(args.root_folder, toml_config.root_folder.clone())
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = memeforge_server::db::init_database_pool(&db_path).await?;

    let interrupted = memeforge_server::db::creations::mark_interrupted_creations(&db_pool).await?;
    if interrupted > 0 {
        warn!("Marked {} interrupted creations as failed", interrupted);
    }

    let event_bus = EventBus::new(toml_config.event_bus_capacity);

    // External services
    let api_keys = memeforge_server::config::resolve_api_keys(&db_pool, &toml_config).await?;
    let agents = AgentSet::from_config(&toml_config, api_keys.clone())
        .context("Failed to configure AI providers")?;

    let compositor = Arc::new(Compositor::new(load_font(
        toml_config.caption_font_path.as_deref(),
    )));

    let catalog = Arc::new(Catalog::new(
        Arc::new(ImgflipClient::new()?),
        Arc::new(GiphyClient::new(api_keys.clone())?),
        Duration::from_secs(toml_config.template_cache_ttl_secs),
        Duration::from_secs(toml_config.gif_cache_ttl_secs),
        event_bus.clone(),
    ));

    let files = FileStore::new(initializer.files_path());
    info!("File store: {}", files.root().display());

    let services = Services {
        files,
        catalog,
        image_fetcher: Arc::new(HttpImageFetcher::new()?),
        agents,
        compositor,
        api_keys,
    };
    let settings = ServerSettings::from_toml(&toml_config, Some(config_path));
    let state = AppState::new(db_pool, event_bus, services, settings);
    let app = memeforge_server::build_router(state.clone());

    let host = args.host.unwrap_or_else(|| toml_config.host.clone());
    let port = args.port.unwrap_or(toml_config.port);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    state.shutdown(SHUTDOWN_GRACE).await;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
