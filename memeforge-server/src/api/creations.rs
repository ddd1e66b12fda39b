//! Meme creation API handlers
//!
//! POST /api/creations, GET /api/creations, GET /api/creations/:id,
//! POST /api/creations/:id/cancel

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use memeforge_common::events::MemeEvent;

use crate::{
    db,
    error::{ApiError, ApiResult},
    models::{CreationStatus, CreationStep, MemeCreation},
    storage::FileStore,
    AppState,
};

/// Longest accepted concept, in characters
pub const MAX_CONCEPT_CHARS: usize = 500;
const DEFAULT_LIST_LIMIT: i64 = 20;
const MAX_LIST_LIMIT: i64 = 100;

/// POST /api/creations request
#[derive(Debug, Deserialize)]
pub struct StartCreationRequest {
    pub concept: String,
    #[serde(default)]
    pub style: Option<String>,
}

/// POST /api/creations response
#[derive(Debug, Serialize)]
pub struct StartCreationResponse {
    pub creation_id: Uuid,
    pub status: CreationStatus,
    pub step: CreationStep,
    pub created_at: DateTime<Utc>,
}

/// POST /api/creations/:id/cancel response
#[derive(Debug, Serialize)]
pub struct CancelCreationResponse {
    pub creation_id: Uuid,
    pub status: CreationStatus,
    /// True when a running pipeline was signalled; the final status follows
    /// as a `CreationCancelled` event
    pub cancel_requested: bool,
}

/// A creation record plus browser URLs for its images
#[derive(Debug, Serialize)]
pub struct CreationView {
    #[serde(flatten)]
    pub creation: MemeCreation,
    pub background_url: Option<String>,
    pub character_url: Option<String>,
    pub composite_url: Option<String>,
    pub image_url: Option<String>,
}

impl CreationView {
    pub fn new(creation: MemeCreation, files: &FileStore) -> Self {
        let url = |path: &Option<String>| path.as_deref().map(|p| files.url_for(p));
        Self {
            background_url: url(&creation.background_path),
            character_url: url(&creation.character_path),
            composite_url: url(&creation.composite_path),
            image_url: url(&creation.final_path),
            creation,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListCreationsQuery {
    pub limit: Option<i64>,
}

/// POST /api/creations
///
/// Records the creation and hands it to the orchestrator in the background.
/// Returns 202 Accepted before any provider is called.
pub async fn start_creation(
    State(state): State<AppState>,
    Json(request): Json<StartCreationRequest>,
) -> ApiResult<(StatusCode, Json<StartCreationResponse>)> {
    let concept = request.concept.trim().to_string();
    if concept.is_empty() {
        return Err(ApiError::BadRequest("Concept must not be empty".to_string()));
    }
    if concept.chars().count() > MAX_CONCEPT_CHARS {
        return Err(ApiError::BadRequest(format!(
            "Concept exceeds {} characters",
            MAX_CONCEPT_CHARS
        )));
    }
    let style = request
        .style
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let creation = MemeCreation::new(concept, style);
    let creation_id = creation.creation_id;
    let cancel = CancellationToken::new();

    {
        let mut tokens = state.cancellation_tokens.write().await;
        let limit = state.settings.max_concurrent_creations;
        if tokens.len() >= limit {
            return Err(ApiError::Conflict(format!(
                "{} creations already running (limit {})",
                tokens.len(),
                limit
            )));
        }
        tokens.insert(creation_id, cancel.clone());
    }

    if let Err(e) = db::creations::save_creation(&state.db, &creation).await {
        state.cancellation_tokens.write().await.remove(&creation_id);
        return Err(e.into());
    }

    tracing::info!(
        creation_id = %creation_id,
        concept = %creation.concept,
        "Creation accepted"
    );

    let response = StartCreationResponse {
        creation_id,
        status: creation.status,
        step: creation.step,
        created_at: creation.created_at,
    };

    let state_clone = state.clone();
    state.tasks.spawn(async move {
        run_creation(state_clone, creation, cancel).await;
    });

    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn run_creation(state: AppState, creation: MemeCreation, cancel: CancellationToken) {
    let creation_id = creation.creation_id;
    tracing::debug!(creation_id = %creation_id, "Background creation task started");

    if let Err(e) = state.orchestrator.run(creation, cancel).await {
        *state.last_error.write().await = Some(format!("Creation {}: {:#}", creation_id, e));
    }

    state.cancellation_tokens.write().await.remove(&creation_id);
}

/// GET /api/creations
pub async fn list_creations(
    State(state): State<AppState>,
    Query(query): Query<ListCreationsQuery>,
) -> ApiResult<Json<Vec<CreationView>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let creations = db::creations::list_creations(&state.db, limit).await?;

    Ok(Json(
        creations
            .into_iter()
            .map(|c| CreationView::new(c, &state.files))
            .collect(),
    ))
}

/// GET /api/creations/:id
pub async fn get_creation(
    State(state): State<AppState>,
    Path(creation_id): Path<Uuid>,
) -> ApiResult<Json<CreationView>> {
    let creation = load_or_404(&state, creation_id).await?;
    Ok(Json(CreationView::new(creation, &state.files)))
}

/// POST /api/creations/:id/cancel
///
/// Signals the running pipeline. A non-terminal row with no pipeline (left
/// over from a crash the startup sweep missed) is cancelled directly.
pub async fn cancel_creation(
    State(state): State<AppState>,
    Path(creation_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<CancelCreationResponse>)> {
    let mut creation = load_or_404(&state, creation_id).await?;

    if creation.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "Creation {} already {}",
            creation_id, creation.status
        )));
    }

    let token = state.cancellation_tokens.read().await.get(&creation_id).cloned();
    match token {
        Some(token) => {
            token.cancel();
            tracing::info!(creation_id = %creation_id, "Creation cancellation requested");
            Ok((
                StatusCode::ACCEPTED,
                Json(CancelCreationResponse {
                    creation_id,
                    status: creation.status,
                    cancel_requested: true,
                }),
            ))
        }
        None => {
            // the pipeline may have finished since the row was loaded
            if !db::creations::cancel_orphaned_creation(&state.db, creation_id).await? {
                let current = load_or_404(&state, creation_id).await?;
                return Err(ApiError::Conflict(format!(
                    "Creation {} already {}",
                    creation_id, current.status
                )));
            }
            creation.cancel();
            tracing::warn!(creation_id = %creation_id, "Cancelled creation with no running pipeline");
            state.event_bus.emit_lossy(MemeEvent::CreationCancelled {
                creation_id,
                timestamp: Utc::now(),
            });
            Ok((
                StatusCode::OK,
                Json(CancelCreationResponse {
                    creation_id,
                    status: creation.status,
                    cancel_requested: false,
                }),
            ))
        }
    }
}

async fn load_or_404(state: &AppState, creation_id: Uuid) -> ApiResult<MemeCreation> {
    db::creations::load_creation(&state.db, creation_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Creation not found: {}", creation_id)))
}

pub fn creation_routes() -> Router<AppState> {
    Router::new()
        .route("/api/creations", post(start_creation).get(list_creations))
        .route("/api/creations/:id", get(get_creation))
        .route("/api/creations/:id/cancel", post(cancel_creation))
}
