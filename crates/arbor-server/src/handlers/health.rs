//! Health check handler.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// Handle health check requests. Includes session utilization and branch store stats.
pub async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    let sessions: Vec<Value> = state
        .sessions
        .sessions()
        .into_iter()
        .map(|(id, entry)| {
            json!({
                "id": id,
                "mode": entry.mode.as_str(),
                "model": entry.model,
            })
        })
        .collect();

    Json(json!({
        "status": "ok",
        "sessions": {
            "active": state.sessions.active_count(),
            "max_concurrent": state.sessions.max_concurrent(),
            "available": state.sessions.available_permits(),
            "list": sessions,
        },
        "branches": {
            "nodes": state.branches.node_count(),
            "depth": state.branches.depth(),
            "persistent": state.branches.snapshot_path().is_some(),
        }
    }))
}
