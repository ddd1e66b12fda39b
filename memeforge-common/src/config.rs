//! Bootstrap configuration loading and root folder resolution
//!
//! Bootstrap settings come from a TOML file and cannot change while the
//! service runs. Runtime settings (API keys set through the web UI) live in
//! the database; see the server crate.
//!
//! # Root folder priority
//! 1. Command-line argument (highest priority)
//! 2. `MEMEFORGE_ROOT_FOLDER` environment variable
//! 3. `root_folder` in the TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "MEMEFORGE_ROOT_FOLDER";

/// Environment variable pointing at the TOML config file
pub const CONFIG_PATH_ENV: &str = "MEMEFORGE_CONFIG";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "memeforge.db";

/// File store directory inside the root folder
pub const FILES_DIR: &str = "files";

/// Image provider used by the background and character agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageProvider {
    #[default]
    Stability,
    OpenAi,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Bootstrap configuration loaded from `memeforge.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder for database and file store
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stability_api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub giphy_api_key: Option<String>,

    #[serde(default)]
    pub image_provider: ImageProvider,

    #[serde(default = "default_chat_model")]
    pub openai_chat_model: String,

    #[serde(default = "default_image_model")]
    pub openai_image_model: String,

    #[serde(default = "default_stability_engine")]
    pub stability_engine: String,

    /// TrueType font used for caption burn-in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption_font_path: Option<PathBuf>,

    #[serde(default = "default_template_ttl")]
    pub template_cache_ttl_secs: u64,

    #[serde(default = "default_gif_ttl")]
    pub gif_cache_ttl_secs: u64,

    /// Upper bound on creations running at the same time
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_creations: usize,

    #[serde(default = "default_event_capacity")]
    pub event_bus_capacity: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5780
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_image_model() -> String {
    "dall-e-3".to_string()
}

fn default_stability_engine() -> String {
    "stable-diffusion-xl-1024-v1-0".to_string()
}

fn default_template_ttl() -> u64 {
    3600
}

fn default_gif_ttl() -> u64 {
    600
}

fn default_max_concurrent() -> usize {
    2
}

fn default_event_capacity() -> usize {
    256
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            host: default_host(),
            port: default_port(),
            logging: LoggingConfig::default(),
            openai_api_key: None,
            stability_api_key: None,
            giphy_api_key: None,
            image_provider: ImageProvider::default(),
            openai_chat_model: default_chat_model(),
            openai_image_model: default_image_model(),
            stability_engine: default_stability_engine(),
            caption_font_path: None,
            template_cache_ttl_secs: default_template_ttl(),
            gif_cache_ttl_secs: default_gif_ttl(),
            max_concurrent_creations: default_max_concurrent(),
            event_bus_capacity: default_event_capacity(),
        }
    }
}

/// Locate the TOML config file
///
/// Explicit path → `MEMEFORGE_CONFIG` → `<config_dir>/memeforge/memeforge.toml`
pub fn default_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .map(|d| d.join("memeforge").join("memeforge.toml"))
        .unwrap_or_else(|| PathBuf::from("memeforge.toml"))
}

/// Load TOML config, falling back to defaults when the file doesn't exist
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        debug!("Config file not found, using defaults: {}", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    info!("Loaded config: {}", path.display());
    Ok(config)
}

/// Write TOML config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Resolves the root folder following the documented priority order
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(cli_arg: Option<PathBuf>, toml_root: Option<PathBuf>) -> Self {
        Self { cli_arg, toml_root }
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!("Root folder from command line: {}", path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                info!("Root folder from {}: {}", ROOT_FOLDER_ENV, path);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_root {
            info!("Root folder from TOML config: {}", path.display());
            return path.clone();
        }

        let path = default_root_folder();
        info!("Root folder (OS default): {}", path.display());
        path
    }
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("memeforge"))
        .unwrap_or_else(|| PathBuf::from("./memeforge_data"))
}

/// Creates the root folder layout on first run
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create root and file store directories if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        std::fs::create_dir_all(self.files_path())?;
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }

    pub fn files_path(&self) -> PathBuf {
        self.root_folder.join(FILES_DIR)
    }
}
