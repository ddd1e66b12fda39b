//! Template and GIF catalog endpoints

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::ApiResult,
    models::{GifEntry, MemeTemplate},
    AppState,
};

const DEFAULT_GIF_LIMIT: u32 = 25;
const MAX_GIF_LIMIT: u32 = 50;

#[derive(Debug, Serialize)]
pub struct TemplatesResponse {
    pub templates: Vec<MemeTemplate>,
    pub count: usize,
    /// Seconds since the list was fetched from the provider
    pub cache_age_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct GifQuery {
    pub q: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct GifsResponse {
    pub gifs: Vec<GifEntry>,
    /// Search text, absent for the trending list
    pub query: Option<String>,
}

/// GET /api/templates
pub async fn list_templates(State(state): State<AppState>) -> ApiResult<Json<TemplatesResponse>> {
    let templates = state.catalog.templates().await?;
    Ok(Json(templates_response(&state, &templates).await))
}

/// POST /api/templates/refresh
pub async fn refresh_templates(
    State(state): State<AppState>,
) -> ApiResult<Json<TemplatesResponse>> {
    let templates = state.catalog.refresh_templates().await?;
    tracing::info!(count = templates.len(), "Template catalog refreshed on request");
    Ok(Json(templates_response(&state, &templates).await))
}

async fn templates_response(state: &AppState, templates: &[MemeTemplate]) -> TemplatesResponse {
    TemplatesResponse {
        count: templates.len(),
        templates: templates.to_vec(),
        cache_age_secs: state
            .catalog
            .template_cache_age()
            .await
            .map(|age| age.as_secs()),
    }
}

/// GET /api/gifs?q=&limit=
///
/// Without `q` the cached trending list is returned.
pub async fn list_gifs(
    State(state): State<AppState>,
    Query(query): Query<GifQuery>,
) -> ApiResult<Json<GifsResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_GIF_LIMIT).clamp(1, MAX_GIF_LIMIT);
    let search = query
        .q
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty());

    let gifs = match &search {
        Some(q) => state.catalog.search_gifs(q, limit).await?,
        None => state.catalog.trending_gifs(limit as usize).await?,
    };

    Ok(Json(GifsResponse { gifs, query: search }))
}

pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/api/templates", get(list_templates))
        .route("/api/templates/refresh", post(refresh_templates))
        .route("/api/gifs", get(list_gifs))
}
