//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the database cannot be queried
    pub status: String,
    pub module: String,
    pub version: String,
    pub git_hash: String,
    pub uptime_seconds: u64,
    /// Creations currently running
    pub active_creations: usize,
    /// Non-terminal creation rows in the database
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_active_creations: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let last_error = state.last_error.read().await.clone();
    let active_creations = state.cancellation_tokens.read().await.len();

    let stored_active_creations = match crate::db::creations::count_active_creations(&state.db).await {
        Ok(count) => Some(count),
        Err(e) => {
            warn!("Health check could not query database: {}", e);
            None
        }
    };
    let status = if stored_active_creations.is_some() { "ok" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        module: "memeforge".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        uptime_seconds,
        active_creations,
        stored_active_creations,
        last_error,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
