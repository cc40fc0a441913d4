//! Node status snapshots as they appear on the wire
//!
//! A node periodically emits a [`NodeStatus`] describing itself and its
//! slots; the same shape is returned by `GET {node}/status`. Snapshots
//! round-trip through the event bus without losing equality.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::capabilities::Capabilities;

/// One slot of a node status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotStatus {
    /// Unique within the owning node
    pub slot_id: String,
    /// What kinds of sessions the slot can host
    pub stereotype: Capabilities,
    /// When the slot last started a session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_started: Option<DateTime<Utc>>,
    /// Session currently hosted, if the slot is busy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// The message a node emits on registration and every heartbeat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    /// Opaque, unique, stable across heartbeats
    pub node_id: String,
    /// How the router reaches the node
    pub external_uri: String,
    /// Ceiling on concurrently busy slots
    pub max_sessions: usize,
    pub slots: Vec<SlotStatus>,
    /// Whether the node refuses new reservations
    #[serde(default)]
    pub draining: bool,
    /// Must match the grid's configured secret
    #[serde(default)]
    pub registration_secret: String,
}

impl NodeStatus {
    /// Number of slots currently hosting a session
    #[must_use]
    pub fn busy_count(&self) -> usize {
        self.slots.iter().filter(|s| s.session_id.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NodeStatus {
        NodeStatus {
            node_id: "node-7".to_string(),
            external_uri: "http://10.1.2.3:5555".to_string(),
            max_sessions: 2,
            slots: vec![
                SlotStatus {
                    slot_id: "a".to_string(),
                    stereotype: Capabilities::from_json(
                        serde_json::json!({"browserName": "chrome"}),
                    )
                    .unwrap(),
                    last_started: None,
                    session_id: Some("sess-1".to_string()),
                },
                SlotStatus {
                    slot_id: "b".to_string(),
                    stereotype: Capabilities::from_json(
                        serde_json::json!({"browserName": "firefox"}),
                    )
                    .unwrap(),
                    last_started: None,
                    session_id: None,
                },
            ],
            draining: false,
            registration_secret: "s3kret".to_string(),
        }
    }

    #[test]
    fn busy_count_counts_held_sessions() {
        assert_eq!(sample().busy_count(), 1);
    }

    #[test]
    fn json_round_trip_preserves_equality() {
        let status = sample();
        let json = serde_json::to_string(&status).unwrap();
        let back: NodeStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(status, back);
    }

    #[test]
    fn optional_fields_default() {
        let status: NodeStatus = serde_json::from_value(serde_json::json!({
            "nodeId": "n",
            "externalUri": "http://a:5555",
            "maxSessions": 1,
            "slots": []
        }))
        .unwrap();
        assert!(!status.draining);
        assert_eq!(status.registration_secret, "");
    }
}
