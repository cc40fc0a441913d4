//! Downstream dialect handling
//!
//! Two request/response shapes share the URL space: W3C
//! (`{"capabilities": {"alwaysMatch": ..., "firstMatch": [...]}}`) and
//! legacy (`{"desiredCapabilities": {...}}`). A body carrying both is
//! rejected rather than guessed. The dialect chosen here sticks to the
//! session for its lifetime.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use crate::data::{Capabilities, Dialect, Session};
use crate::distributor::NewSessionRequest;
use crate::{Error, Result};

/// Parse a `POST /session` body into an admitted request.
///
/// # Errors
///
/// `InvalidArgument` on malformed JSON, a non-object body, a mixed
/// dialect payload, or capability entries that are not objects.
pub fn parse_new_session(body: &[u8]) -> Result<NewSessionRequest> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| Error::InvalidArgument(format!("malformed JSON body: {e}")))?;
    let Value::Object(root) = value else {
        return Err(Error::InvalidArgument(
            "request body must be a JSON object".to_string(),
        ));
    };

    match (root.get("capabilities"), root.get("desiredCapabilities")) {
        (Some(_), Some(_)) => Err(Error::InvalidArgument(
            "mixed dialect payload: both 'capabilities' and 'desiredCapabilities' supplied"
                .to_string(),
        )),
        (Some(caps), None) => parse_w3c(caps),
        (None, Some(caps)) => Ok(NewSessionRequest {
            always_match: Capabilities::new(),
            first_match: vec![Capabilities::from_json(caps.clone())?],
            dialect: Dialect::Legacy,
        }),
        (None, None) => Err(Error::InvalidArgument(
            "neither 'capabilities' nor 'desiredCapabilities' supplied".to_string(),
        )),
    }
}

fn parse_w3c(caps: &Value) -> Result<NewSessionRequest> {
    let Value::Object(obj) = caps else {
        return Err(Error::InvalidArgument(
            "'capabilities' must be a JSON object".to_string(),
        ));
    };

    let always_match = match obj.get("alwaysMatch") {
        Some(value) => Capabilities::from_json(value.clone())?,
        None => Capabilities::new(),
    };

    let first_match = match obj.get("firstMatch") {
        // an absent firstMatch means "one empty alternative"
        None => vec![Capabilities::new()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| Capabilities::from_json(item.clone()))
            .collect::<Result<Vec<_>>>()?,
        Some(_) => {
            return Err(Error::InvalidArgument(
                "'firstMatch' must be an array".to_string(),
            ))
        }
    };

    Ok(NewSessionRequest {
        always_match,
        first_match,
        dialect: Dialect::W3c,
    })
}

/// Success body for a created session, shaped for its dialect
#[must_use]
pub fn created_body(session: &Session) -> Value {
    match session.dialect {
        Dialect::W3c => serde_json::json!({
            "value": {
                "sessionId": session.session_id,
                "capabilities": session.capabilities,
            }
        }),
        Dialect::Legacy => serde_json::json!({
            "status": 0,
            "sessionId": session.session_id,
            "value": session.capabilities,
        }),
    }
}

/// Failure body shaped for a dialect
#[must_use]
pub fn error_body(dialect: Dialect, error: &Error) -> Value {
    match dialect {
        Dialect::W3c => serde_json::json!({
            "value": {
                "error": error.wire_slug(),
                "message": error.to_string(),
                "stacktrace": "",
            }
        }),
        Dialect::Legacy => serde_json::json!({
            "status": error.legacy_status(),
            "value": {"message": error.to_string()},
        }),
    }
}

/// Full HTTP response for an error, in the given dialect
#[must_use]
pub fn error_response(dialect: Dialect, error: &Error) -> Response {
    let status = StatusCode::from_u16(error.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(error_body(dialect, error))).into_response()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        error_response(Dialect::W3c, &self)
    }
}
