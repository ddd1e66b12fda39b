//! API key resolution for memeforge-server
//!
//! Keys are resolved per provider with Database → ENV → TOML priority at
//! startup and held in a shared [`ApiKeys`] store afterwards, so keys set via
//! the settings API take effect without a restart.

use memeforge_common::config::TomlConfig;
use memeforge_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// External provider that needs an API key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Stability,
    Giphy,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::OpenAi, Provider::Stability, Provider::Giphy];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Stability => "stability",
            Provider::Giphy => "giphy",
        }
    }

    /// Key in the `settings` table
    pub fn setting_key(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai_api_key",
            Provider::Stability => "stability_api_key",
            Provider::Giphy => "giphy_api_key",
        }
    }

    pub fn env_var(self) -> &'static str {
        match self {
            Provider::OpenAi => "MEMEFORGE_OPENAI_API_KEY",
            Provider::Stability => "MEMEFORGE_STABILITY_API_KEY",
            Provider::Giphy => "MEMEFORGE_GIPHY_API_KEY",
        }
    }

    fn toml_key(self, config: &TomlConfig) -> Option<&String> {
        match self {
            Provider::OpenAi => config.openai_api_key.as_ref(),
            Provider::Stability => config.stability_api_key.as_ref(),
            Provider::Giphy => config.giphy_api_key.as_ref(),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "stability" => Ok(Provider::Stability),
            "giphy" => Ok(Provider::Giphy),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Runtime API key store shared by the clients and the settings API
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    inner: Arc<RwLock<HashMap<Provider, String>>>,
}

impl ApiKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, provider: Provider) -> Option<String> {
        self.inner
            .read()
            .ok()
            .and_then(|keys| keys.get(&provider).cloned())
    }

    pub fn set(&self, provider: Provider, key: impl Into<String>) {
        if let Ok(mut keys) = self.inner.write() {
            keys.insert(provider, key.into());
        }
    }

    pub fn configured(&self, provider: Provider) -> bool {
        self.get(provider).is_some()
    }
}

/// Resolve every provider's key and return a populated store
///
/// Providers without a key are left unset; the features depending on them
/// report "not configured" when used.
pub async fn resolve_api_keys(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<ApiKeys> {
    let keys = ApiKeys::new();
    for provider in Provider::ALL {
        match resolve_api_key(db, toml_config, provider).await? {
            Some(key) => keys.set(provider, key),
            None => warn!(
                provider = %provider,
                "API key not configured (settings page, {} or TOML {})",
                provider.env_var(),
                provider.setting_key()
            ),
        }
    }
    Ok(keys)
}

/// Resolve a single provider's key
///
/// **Priority:** Database → ENV → TOML
pub async fn resolve_api_key(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
    provider: Provider,
) -> Result<Option<String>> {
    let db_key = crate::db::settings::get_api_key(db, provider)
        .await?
        .filter(|k| is_valid_key(k));
    let env_key = std::env::var(provider.env_var())
        .ok()
        .filter(|k| is_valid_key(k));
    let toml_key = provider
        .toml_key(toml_config)
        .filter(|k| is_valid_key(k))
        .cloned();

    let mut sources = Vec::new();
    if db_key.is_some() {
        sources.push("database");
    }
    if env_key.is_some() {
        sources.push("environment");
    }
    if toml_key.is_some() {
        sources.push("TOML");
    }

    if sources.len() > 1 {
        warn!(
            "{} API key found in multiple sources: {}. Using {} (highest priority).",
            provider,
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(source) = sources.first() {
        info!("{} API key loaded from {}", provider, source);
    }

    Ok(db_key.or(env_key).or(toml_key))
}

/// Non-empty, non-whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Write an API key back to the TOML file
///
/// Best effort: the database holds the authoritative copy, so a failed TOML
/// write is logged and swallowed.
pub fn sync_api_key_to_toml(provider: Provider, key: &str, toml_path: &Path) {
    let mut config = match memeforge_common::config::load_toml_config(toml_path) {
        Ok(config) => config,
        Err(e) => {
            warn!("TOML read failed, skipping key sync: {}", e);
            return;
        }
    };

    let key = Some(key.to_string());
    match provider {
        Provider::OpenAi => config.openai_api_key = key,
        Provider::Stability => config.stability_api_key = key,
        Provider::Giphy => config.giphy_api_key = key,
    }

    match memeforge_common::config::write_toml_config(&config, toml_path) {
        Ok(()) => info!("{} API key synced to TOML: {}", provider, toml_path.display()),
        Err(e) => warn!("TOML write failed (database write succeeded): {}", e),
    }
}

/// Parse a provider name coming from a request body
pub fn parse_provider(name: &str) -> Result<Provider> {
    name.parse::<Provider>().map_err(Error::InvalidInput)
}
