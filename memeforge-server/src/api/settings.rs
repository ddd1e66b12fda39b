//! Settings API endpoints
//!
//! GET /api/settings reports which providers have keys; POST
//! /api/settings/api_keys stores one. Keys are written to the database
//! (authoritative), applied to the running `ApiKeys` store and synced to the
//! TOML file when one is in use.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use memeforge_common::config::ImageProvider;

use crate::{
    config::{self, Provider},
    db,
    error::{ApiError, ApiResult},
    AppState,
};

#[derive(Debug, Serialize)]
pub struct ProviderStatus {
    pub provider: Provider,
    pub configured: bool,
}

/// GET /api/settings response
#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub image_provider: ImageProvider,
    pub providers: Vec<ProviderStatus>,
    pub max_concurrent_creations: usize,
    pub caption_font_loaded: bool,
}

/// POST /api/settings/api_keys request
#[derive(Debug, Deserialize)]
pub struct SetApiKeyRequest {
    /// "openai", "stability" or "giphy"
    pub provider: String,
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct SetApiKeyResponse {
    pub success: bool,
    pub message: String,
}

/// GET /api/settings
///
/// Never returns key values.
pub async fn get_settings(State(state): State<AppState>) -> Json<SettingsResponse> {
    let providers = Provider::ALL
        .iter()
        .map(|&provider| ProviderStatus {
            provider,
            configured: state.api_keys.configured(provider),
        })
        .collect();

    Json(SettingsResponse {
        image_provider: state.settings.image_provider,
        providers,
        max_concurrent_creations: state.settings.max_concurrent_creations,
        caption_font_loaded: state.compositor.has_font(),
    })
}

/// POST /api/settings/api_keys
///
/// **Errors:**
/// - 400 Bad Request: unknown provider, empty or whitespace-only key
/// - 500 Internal Server Error: database write failure
///
/// TOML write failures are logged and don't fail the request.
pub async fn set_api_key(
    State(state): State<AppState>,
    Json(payload): Json<SetApiKeyRequest>,
) -> ApiResult<Json<SetApiKeyResponse>> {
    let provider = config::parse_provider(&payload.provider)?;

    if !config::is_valid_key(&payload.api_key) {
        return Err(ApiError::BadRequest(
            "API key cannot be empty or whitespace-only".to_string(),
        ));
    }
    let key = payload.api_key.trim().to_string();

    db::settings::set_api_key(&state.db, provider, &key)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to save API key to database: {}", e)))?;

    state.api_keys.set(provider, key.clone());
    info!("{} API key configured via Web UI", provider);

    if let Some(toml_path) = state.settings.config_path.clone() {
        let sync = tokio::task::spawn_blocking(move || {
            config::sync_api_key_to_toml(provider, &key, &toml_path)
        });
        if let Err(e) = sync.await {
            tracing::warn!("TOML sync task failed: {}", e);
        }
    }

    Ok(Json(SetApiKeyResponse {
        success: true,
        message: format!("{} API key configured successfully", provider),
    }))
}

pub fn settings_routes() -> Router<AppState> {
    Router::new()
        .route("/api/settings", get(get_settings))
        .route("/api/settings/api_keys", post(set_api_key))
}
