//! Upstream RPCs the grid sends to nodes
//!
//! The distributor and health checker are written against the
//! [`NodeClient`] capability set only: `status`, `create_session`,
//! `delete_session`. The production implementation speaks HTTP with
//! reqwest; tests substitute a scripted implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::data::{Capabilities, NodeStatus};
use crate::{Error, Result};

/// What a node returns from a successful create-session call
#[derive(Debug, Clone)]
pub struct NodeSessionReply {
    pub session_id: String,
    /// Capabilities the node actually negotiated
    pub capabilities: Capabilities,
}

/// The operations the grid performs against a node
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// `GET {node}/status`
    async fn status(&self, node_uri: &str) -> Result<NodeStatus>;

    /// `POST {node}/session` with the chosen capability blob
    async fn create_session(
        &self,
        node_uri: &str,
        capabilities: &Capabilities,
    ) -> Result<NodeSessionReply>;

    /// `DELETE {node}/session/{id}`
    async fn delete_session(&self, node_uri: &str, session_id: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ValueEnvelope<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSessionValue {
    session_id: String,
    #[serde(default)]
    capabilities: Capabilities,
}

/// HTTP implementation of [`NodeClient`]
pub struct HttpNodeClient {
    http: reqwest::Client,
}

impl HttpNodeClient {
    /// Build a client whose calls are bounded by `rpc_timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(rpc_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(rpc_timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn status(&self, node_uri: &str) -> Result<NodeStatus> {
        let response = self
            .http
            .get(format!("{node_uri}/status"))
            .send()
            .await
            .map_err(|e| Error::NodeUnreachable(format!("{node_uri}: {e}")))?;
        let envelope: ValueEnvelope<NodeStatus> = response
            .error_for_status()
            .map_err(|e| Error::NodeUnreachable(format!("{node_uri}: {e}")))?
            .json()
            .await?;
        Ok(envelope.value)
    }

    async fn create_session(
        &self,
        node_uri: &str,
        capabilities: &Capabilities,
    ) -> Result<NodeSessionReply> {
        let body = serde_json::json!({
            "capabilities": {
                "alwaysMatch": capabilities,
                "firstMatch": [{}]
            }
        });
        let response = self
            .http
            .post(format!("{node_uri}/session"))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::NodeUnreachable(format!("{node_uri}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::SessionNotCreated(format!(
                "node {node_uri} refused session: {status} {body}"
            )));
        }

        let envelope: ValueEnvelope<CreatedSessionValue> = response.json().await?;
        Ok(NodeSessionReply {
            session_id: envelope.value.session_id,
            capabilities: envelope.value.capabilities,
        })
    }

    async fn delete_session(&self, node_uri: &str, session_id: &str) -> Result<()> {
        let response = self
            .http
            .delete(format!("{node_uri}/session/{session_id}"))
            .send()
            .await
            .map_err(|e| Error::NodeUnreachable(format!("{node_uri}: {e}")))?;
        response
            .error_for_status()
            .map_err(|e| Error::NodeUnreachable(format!("{node_uri}: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_session_value_parses_w3c_reply() {
        let envelope: ValueEnvelope<CreatedSessionValue> = serde_json::from_value(
            serde_json::json!({
                "value": {
                    "sessionId": "abc-123",
                    "capabilities": {"browserName": "chrome"}
                }
            }),
        )
        .unwrap();
        assert_eq!(envelope.value.session_id, "abc-123");
        assert_eq!(
            envelope.value.capabilities.get("browserName"),
            Some(&serde_json::json!("chrome"))
        );
    }

    #[test]
    fn missing_capabilities_default_to_empty() {
        let envelope: ValueEnvelope<CreatedSessionValue> =
            serde_json::from_value(serde_json::json!({"value": {"sessionId": "abc"}})).unwrap();
        assert!(envelope.value.capabilities.is_empty());
    }
}
