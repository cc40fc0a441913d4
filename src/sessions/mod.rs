//! Authoritative sessionId → node binding
//!
//! The session map exclusively owns [`Session`] records. Exactly one
//! record exists per live session; after a remove, lookups fail with
//! `NoSuchSession`. Calls are linearizable per session id: everything
//! goes through one readers-writer lock, and reads dominate.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::data::Session;
use crate::events::{publish_json, EventBus, Topic};
use crate::{Error, Result};

/// Payload published on `session.ended`
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnded {
    pub session_id: String,
    pub node_id: String,
}

/// Keyed container of live sessions
pub struct SessionMap {
    sessions: RwLock<HashMap<String, Session>>,
    bus: Arc<dyn EventBus>,
}

impl SessionMap {
    /// Create an empty session map
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Subscribe to `node.removed`: every session bound to the removed
    /// node is deleted, and `session.ended` is published for each.
    pub fn wire(self: &Arc<Self>) {
        let map = Arc::clone(self);
        self.bus.subscribe(
            Topic::NodeRemoved,
            Box::new(move |payload| {
                let Some(node_id) = payload.get("nodeId").and_then(|v| v.as_str()) else {
                    tracing::warn!("node.removed payload missing nodeId");
                    return;
                };
                map.remove_for_node(node_id);
            }),
        );
    }

    /// Insert a new binding.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateSession` if the session id is already bound.
    pub fn add(&self, session: Session) -> Result<()> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.session_id) {
            return Err(Error::DuplicateSession(session.session_id));
        }
        tracing::debug!(
            session_id = %session.session_id,
            node_id = %session.node_id,
            "session bound"
        );
        sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    /// Look up a session.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchSession` if the id is unknown.
    pub fn get(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::NoSuchSession(session_id.to_string()))
    }

    /// Remove a binding; idempotent. Returns whether a record was
    /// removed, publishing `session.ended` when one was.
    pub fn remove(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().remove(session_id);
        match removed {
            Some(session) => {
                publish_json(
                    &self.bus,
                    Topic::SessionEnded,
                    &SessionEnded {
                        session_id: session.session_id,
                        node_id: session.node_id,
                    },
                );
                true
            }
            None => false,
        }
    }

    /// All sessions currently bound to `node_id`
    #[must_use]
    pub fn list_by_node(&self, node_id: &str) -> Vec<Session> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.node_id == node_id)
            .cloned()
            .collect()
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Whether the map can serve lookups
    #[must_use]
    pub fn is_ready(&self) -> bool {
        true
    }

    fn remove_for_node(&self, node_id: &str) {
        let orphaned: Vec<Session> = {
            let mut sessions = self.sessions.write();
            let ids: Vec<String> = sessions
                .values()
                .filter(|s| s.node_id == node_id)
                .map(|s| s.session_id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        if !orphaned.is_empty() {
            tracing::info!(
                node_id = %node_id,
                count = orphaned.len(),
                "dropping sessions of removed node"
            );
        }
        for session in orphaned {
            publish_json(
                &self.bus,
                Topic::SessionEnded,
                &SessionEnded {
                    session_id: session.session_id,
                    node_id: session.node_id,
                },
            );
        }
    }
}
