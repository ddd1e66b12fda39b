//! Stored meme API handlers
//!
//! POST /api/memes builds a template meme synchronously; generated memes are
//! inserted by the creation pipeline and only read or deleted here.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use memeforge_common::events::MemeEvent;

use crate::{
    compositor::CompositorError,
    db,
    error::{ApiError, ApiResult},
    models::{Caption, Meme, MemeKind},
    orchestrator::MEMES_DIR,
    storage::FileStore,
    AppState,
};

/// Longest accepted caption line, in characters
pub const MAX_TEXT_CHARS: usize = 200;
const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

/// POST /api/memes request
#[derive(Debug, Deserialize)]
pub struct CreateMemeRequest {
    pub template_id: String,
    #[serde(default)]
    pub top_text: String,
    #[serde(default)]
    pub bottom_text: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListMemesQuery {
    pub kind: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Meme record plus its image URL
#[derive(Debug, Serialize)]
pub struct MemeView {
    #[serde(flatten)]
    pub meme: Meme,
    pub image_url: String,
}

impl MemeView {
    pub fn new(meme: Meme, files: &FileStore) -> Self {
        Self {
            image_url: files.url_for(&meme.image_path),
            meme,
        }
    }
}

/// POST /api/memes
pub async fn create_meme(
    State(state): State<AppState>,
    Json(request): Json<CreateMemeRequest>,
) -> ApiResult<(StatusCode, Json<MemeView>)> {
    let caption = Caption::new(request.top_text.trim(), request.bottom_text.trim());
    if caption.is_empty() {
        return Err(ApiError::BadRequest(
            "top_text or bottom_text is required".to_string(),
        ));
    }
    if caption.top_text.chars().count() > MAX_TEXT_CHARS
        || caption.bottom_text.chars().count() > MAX_TEXT_CHARS
    {
        return Err(ApiError::BadRequest(format!(
            "Caption lines are limited to {} characters",
            MAX_TEXT_CHARS
        )));
    }

    let template = state
        .catalog
        .find_template(&request.template_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("Template not found: {}", request.template_id))
        })?;

    let source = state.image_fetcher.fetch(&template.url).await?;

    let compositor = state.compositor.clone();
    let burn_caption = caption.clone();
    let (png, width, height) =
        tokio::task::spawn_blocking(move || compositor.burn_caption_png(&source, &burn_caption))
            .await
            .map_err(|e| CompositorError::Task(e.to_string()))??;

    let stored = state.files.save(MEMES_DIR, "png", &png).await?;

    let title = request
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| template.name.clone());

    let meme = Meme {
        meme_id: Uuid::new_v4(),
        kind: MemeKind::Template,
        title,
        template_id: Some(template.id.clone()),
        creation_id: None,
        top_text: caption.top_text,
        bottom_text: caption.bottom_text,
        image_path: stored.relative_path,
        width,
        height,
        created_at: Utc::now(),
    };

    if let Err(e) = db::memes::insert_meme(&state.db, &meme).await {
        if let Err(cleanup) = state.files.delete(&meme.image_path).await {
            tracing::warn!(path = %meme.image_path, error = %cleanup, "Failed to remove orphaned meme image");
        }
        return Err(e.into());
    }

    tracing::info!(
        meme_id = %meme.meme_id,
        template_id = %template.id,
        "Template meme created"
    );

    let view = MemeView::new(meme, &state.files);
    state.event_bus.emit_lossy(MemeEvent::MemeCreated {
        meme_id: view.meme.meme_id,
        kind: MemeKind::Template,
        image_url: view.image_url.clone(),
        timestamp: Utc::now(),
    });

    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/memes
pub async fn list_memes(
    State(state): State<AppState>,
    Query(query): Query<ListMemesQuery>,
) -> ApiResult<Json<Vec<MemeView>>> {
    let kind = match query.kind.as_deref() {
        None | Some("") | Some("all") => None,
        Some(kind) => Some(kind.parse::<MemeKind>().map_err(ApiError::BadRequest)?),
    };
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let memes = db::memes::list_memes(&state.db, kind, limit, offset).await?;
    Ok(Json(
        memes
            .into_iter()
            .map(|m| MemeView::new(m, &state.files))
            .collect(),
    ))
}

/// GET /api/memes/:id
pub async fn get_meme(
    State(state): State<AppState>,
    Path(meme_id): Path<Uuid>,
) -> ApiResult<Json<MemeView>> {
    let meme = db::memes::load_meme(&state.db, meme_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Meme not found: {}", meme_id)))?;
    Ok(Json(MemeView::new(meme, &state.files)))
}

/// DELETE /api/memes/:id
///
/// The row is removed even if the image file can't be.
pub async fn delete_meme(
    State(state): State<AppState>,
    Path(meme_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let meme = db::memes::load_meme(&state.db, meme_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Meme not found: {}", meme_id)))?;

    if let Err(e) = state.files.delete(&meme.image_path).await {
        tracing::warn!(meme_id = %meme_id, path = %meme.image_path, error = %e, "Failed to delete meme image");
    }

    if !db::memes::delete_meme(&state.db, meme_id).await? {
        return Err(ApiError::NotFound(format!("Meme not found: {}", meme_id)));
    }

    tracing::info!(meme_id = %meme_id, "Meme deleted");
    state.event_bus.emit_lossy(MemeEvent::MemeDeleted {
        meme_id,
        timestamp: Utc::now(),
    });

    Ok(StatusCode::NO_CONTENT)
}

pub fn meme_routes() -> Router<AppState> {
    Router::new()
        .route("/api/memes", get(list_memes).post(create_meme))
        .route("/api/memes/:id", get(get_meme).delete(delete_meme))
}
