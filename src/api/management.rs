//! Grid management routes under `/se/grid`
//!
//! `GET /se/grid/nodes` lists the fleet. `POST /se/grid/node/heartbeat`
//! is the HTTP ingress for node status snapshots: the body is validated
//! and published on the event bus, where the registry's subscription
//! picks it up — the same path a network-backed bus would take.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::AppState;
use crate::data::{Capabilities, NodeStatus};
use crate::events::Topic;
use crate::registry::NodeRegistry;

/// One slot in a node summary
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotSummary {
    pub slot_id: String,
    pub stereotype: Capabilities,
    pub busy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_started: Option<DateTime<Utc>>,
}

/// Node as reported by the management API
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub node_id: String,
    pub external_uri: String,
    pub max_sessions: usize,
    pub draining: bool,
    pub busy_slots: usize,
    pub slots: Vec<SlotSummary>,
}

/// Summarize the fleet for management and status responses
#[must_use]
pub fn summarize(registry: &NodeRegistry) -> Vec<NodeSummary> {
    let mut nodes: Vec<NodeSummary> = registry
        .snapshot()
        .into_iter()
        .map(|node| NodeSummary {
            busy_slots: node.busy_count(),
            node_id: node.node_id,
            external_uri: node.external_uri,
            max_sessions: node.max_sessions,
            draining: node.draining,
            slots: node
                .slots
                .into_iter()
                .map(|slot| SlotSummary {
                    slot_id: slot.slot_id,
                    stereotype: slot.stereotype,
                    busy: slot.busy,
                    last_started: slot.last_started,
                })
                .collect(),
        })
        .collect();
    nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
    nodes
}

/// Build the management router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/nodes", get(list_nodes))
        .route("/node/heartbeat", post(heartbeat))
        .with_state(state)
}

async fn list_nodes(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({"value": summarize(&state.registry)}))
}

async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    // Reject garbage here; secret checking stays in the registry.
    if let Err(e) = serde_json::from_value::<NodeStatus>(payload.clone()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "value": {
                    "error": "invalid argument",
                    "message": format!("malformed node status: {e}"),
                    "stacktrace": "",
                }
            })),
        );
    }
    state.bus.publish(Topic::NodeHeartbeat, payload);
    (StatusCode::OK, Json(serde_json::json!({"value": null})))
}
