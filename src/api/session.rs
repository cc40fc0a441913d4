//! Session endpoints: creation, deletion, and per-session forwarding
//!
//! The router is stateless with respect to sessions: creation and
//! deletion go through the distributor, everything else is looked up in
//! the session map and forwarded verbatim to the owning node.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, post};
use axum::{Json, Router};

use super::wire;
use super::AppState;
use crate::data::Dialect;
use crate::Error;

/// Build the session router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/session", post(create_session))
        .route("/session/{session_id}", any(session_root))
        .route("/session/{session_id}/{*rest}", any(session_subpath))
        .with_state(state)
}

/// `POST /session`: parse the dialect, hand the request to the
/// distributor, shape the reply for the caller's dialect
async fn create_session(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request = match wire::parse_new_session(&body) {
        Ok(request) => request,
        Err(e) => return wire::error_response(Dialect::W3c, &e),
    };
    let dialect = request.dialect;

    match state.distributor.new_session(request).await {
        Ok(session) => {
            (StatusCode::OK, Json(wire::created_body(&session))).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "new session refused");
            wire::error_response(dialect, &e)
        }
    }
}

/// `/session/{id}`: DELETE ends the session through the distributor,
/// anything else is forwarded to the owning node
async fn session_root(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method == Method::DELETE {
        return match state.distributor.delete_session(&session_id).await {
            Ok(()) => {
                (StatusCode::OK, Json(serde_json::json!({"value": null}))).into_response()
            }
            Err(e) => wire::error_response(Dialect::W3c, &e),
        };
    }
    let suffix = format!("/session/{session_id}");
    forward(&state, &session_id, &suffix, method, &headers, body).await
}

/// `/session/{id}/...`: forwarded verbatim
async fn session_subpath(
    State(state): State<Arc<AppState>>,
    Path((session_id, rest)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let suffix = format!("/session/{session_id}/{rest}");
    forward(&state, &session_id, &suffix, method, &headers, body).await
}

/// Look the session up and relay the request to its node, echoing the
/// node's status and body back to the caller
async fn forward(
    state: &AppState,
    session_id: &str,
    suffix: &str,
    method: Method,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let session = match state.sessions.get(session_id) {
        Ok(session) => session,
        Err(e) => return wire::error_response(Dialect::W3c, &e),
    };

    let url = format!("{}{}", session.node_uri, suffix);
    let mut request = state.proxy.request(method, &url).body(body);
    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        request = request.header(header::CONTENT_TYPE, content_type.clone());
    }

    match request.send().await {
        Ok(reply) => {
            let status = reply.status();
            let content_type = reply.headers().get(header::CONTENT_TYPE).cloned();
            let bytes = reply.bytes().await.unwrap_or_default();

            let mut response = axum::http::Response::builder().status(status);
            if let Some(content_type) = content_type {
                response = response.header(header::CONTENT_TYPE, content_type);
            }
            response
                .body(Body::from(bytes))
                .map_or_else(|_| StatusCode::BAD_GATEWAY.into_response(), |r| r.into_response())
        }
        Err(e) => {
            tracing::warn!(session_id, url = %url, error = %e, "failed to reach owning node");
            wire::error_response(
                Dialect::W3c,
                &Error::NodeUnreachable(format!("{}: {e}", session.node_uri)),
            )
        }
    }
}
