//! Aggregate readiness report

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use super::management::summarize;
use super::AppState;

/// Build the status router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .with_state(state)
}

/// `GET /status`: ready when at least one node is registered and every
/// core component reports ready
async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let has_nodes = !state.registry.is_empty();
    let components_ready = state.distributor.is_ready()
        && state.sessions.is_ready()
        && state.bus.is_ready();
    let ready = has_nodes && components_ready;

    let message = if ready {
        "grid is ready"
    } else if !has_nodes {
        "no nodes registered"
    } else {
        "grid components are starting"
    };

    Json(serde_json::json!({
        "value": {
            "ready": ready,
            "message": message,
            "nodes": summarize(&state.registry),
        }
    }))
}
