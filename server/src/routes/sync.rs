//! Sync endpoint routes.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};

use crate::auth::AuthUser;
use crate::db::StoredEntity;
use crate::error::{AppError, Result};
use crate::handlers::handle_sync;
use crate::AppState;
use sitesync_engine::{SyncRequest, SyncResponse};

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync", post(sync_handler))
        .route("/entities/{entity_id}", get(entity_handler))
}

/// POST /sync - Apply a batch of mutations.
async fn sync_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(request): Json<SyncRequest>,
) -> Result<Json<SyncResponse>> {
    let response = handle_sync(&state.ledger, request).await?;
    Ok(Json(response))
}

/// GET /entities/{entity_id} - Current server state of one entity.
async fn entity_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(entity_id): Path<String>,
) -> Result<Json<StoredEntity>> {
    match state.ledger.entity(&entity_id).await? {
        Some(entity) => Ok(Json(entity)),
        None => Err(AppError::EntityNotFound(entity_id)),
    }
}
