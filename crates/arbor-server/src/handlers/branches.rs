//! REST access to the shared branch store.
//!
//! Store calls take a blocking lock and may rewrite the snapshot file, so they
//! run on the blocking pool.

use std::sync::Arc;

use arbor_branches::{BranchStore, BranchTrie};
use arbor_engine::History;
use axum::{extract::State, http::StatusCode, Json};

use crate::error::ServerError;
use crate::state::AppState;

async fn with_store<T, F>(state: &AppState, f: F) -> Result<T, ServerError>
where
    T: Send + 'static,
    F: FnOnce(&BranchStore) -> T + Send + 'static,
{
    let branches = Arc::clone(&state.branches);
    tokio::task::spawn_blocking(move || f(&branches))
        .await
        .map_err(|e| ServerError::Internal(format!("branch store task failed: {e}")))
}

/// Extend a history prefix along the most recent stored branch.
pub async fn handle_search_branches(
    State(state): State<AppState>,
    Json(prefix): Json<History>,
) -> Result<Json<History>, ServerError> {
    with_store(&state, move |store| store.search_and_extend(&prefix))
        .await?
        .map(Json)
        .ok_or_else(|| ServerError::NotFound("no stored branch matches this prefix".to_string()))
}

/// Export the whole trie.
pub async fn handle_export_branches(
    State(state): State<AppState>,
) -> Result<Json<BranchTrie>, ServerError> {
    with_store(&state, BranchStore::snapshot).await.map(Json)
}

pub async fn handle_clear_branches(
    State(state): State<AppState>,
) -> Result<StatusCode, ServerError> {
    with_store(&state, BranchStore::clear).await??;
    Ok(StatusCode::NO_CONTENT)
}
