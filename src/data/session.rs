//! Session records owned by the session map

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::capabilities::Capabilities;

/// The request/response shape used with the caller, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    W3c,
    Legacy,
}

/// A live session and the node that owns it.
///
/// `node_id` is a back-reference, never an ownership claim: node records
/// live in the registry, and `SessionMap::list_by_node` answers the
/// reverse direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Opaque, unique fleet-wide, assigned at creation
    pub session_id: String,
    pub node_id: String,
    pub slot_id: String,
    /// Endpoint of the owning node, for request forwarding
    pub node_uri: String,
    /// Stereotype of the slot that hosts the session
    pub stereotype: Capabilities,
    /// Capabilities the node actually negotiated
    pub capabilities: Capabilities,
    pub started_at: DateTime<Utc>,
    pub dialect: Dialect,
}
