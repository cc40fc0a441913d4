//! Admission, matching, placement, and capacity accounting
//!
//! The distributor turns a capability request into a created session or
//! a refusal. It holds no long-lived state of its own: node records stay
//! in the registry, session records in the session map, and the
//! distributor composes their locks in the order registry → session map.

pub mod janitor;
pub mod selector;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use crate::config::GridConfig;
use crate::data::{Capabilities, Dialect, Session};
use crate::events::{publish_json, EventBus, Topic};
use crate::node_client::NodeClient;
use crate::registry::{NodeRegistry, NodeView};
use crate::sessions::SessionMap;
use crate::{Error, Result};

pub use janitor::Janitor;
pub use selector::{select_slot, Candidate};

/// An admitted new-session request: alternatives the caller will accept
/// plus a single overlay merged into each
#[derive(Debug, Clone)]
pub struct NewSessionRequest {
    pub always_match: Capabilities,
    pub first_match: Vec<Capabilities>,
    /// Fixed for the lifetime of the session at creation time
    pub dialect: Dialect,
}

/// The placement engine
pub struct Distributor {
    registry: Arc<NodeRegistry>,
    sessions: Arc<SessionMap>,
    client: Arc<dyn NodeClient>,
    bus: Arc<dyn EventBus>,
    config: GridConfig,
    informational: HashSet<String>,
}

impl Distributor {
    #[must_use]
    pub fn new(
        registry: Arc<NodeRegistry>,
        sessions: Arc<SessionMap>,
        client: Arc<dyn NodeClient>,
        bus: Arc<dyn EventBus>,
        config: GridConfig,
    ) -> Self {
        let informational = config.informational_keys.iter().cloned().collect();
        Self {
            registry,
            sessions,
            client,
            bus,
            config,
            informational,
        }
    }

    /// Whether the distributor can place sessions
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.bus.is_ready() && self.sessions.is_ready() && self.registry.is_ready()
    }

    /// Place a new session, bounded end-to-end by `new_session_timeout`.
    ///
    /// # Errors
    ///
    /// `SessionNotCreated` when no alternative could be placed,
    /// `InvalidArgument` on conflicting capability overlays, `Timeout`
    /// when the overall deadline expires.
    pub async fn new_session(&self, request: NewSessionRequest) -> Result<Session> {
        let deadline = self.config.new_session_timeout;
        match tokio::time::timeout(deadline, self.place(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "new session request exceeded {}s",
                deadline.as_secs()
            ))),
        }
    }

    async fn place(&self, request: NewSessionRequest) -> Result<Session> {
        if request.first_match.is_empty() {
            return Err(Error::SessionNotCreated(
                "no capabilities supplied".to_string(),
            ));
        }

        let mut alternatives = Vec::with_capacity(request.first_match.len());
        for alternative in &request.first_match {
            alternatives.push(alternative.merge_overlay(&request.always_match)?);
        }

        let mut last_refusal: Option<Error> = None;
        for capabilities in &alternatives {
            match self.try_alternative(capabilities, request.dialect).await {
                Ok(Some(session)) => return Ok(session),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "session creation attempt failed, trying next alternative");
                    last_refusal = Some(e);
                }
            }
        }

        Err(Error::SessionNotCreated(match last_refusal {
            Some(e) => format!("no slot matched (last failure: {e})"),
            None => "no slot matched".to_string(),
        }))
    }

    /// Try to place one merged alternative. `Ok(None)` means no capacity
    /// matched; an `Err` means a node accepted a reservation and then
    /// the creation failed on it.
    async fn try_alternative(
        &self,
        capabilities: &Capabilities,
        dialect: Dialect,
    ) -> Result<Option<Session>> {
        for attempt in 1..=self.config.max_placement_attempts {
            let fleet = self.matchable_nodes();
            let Some(candidate) = select_slot(&fleet, capabilities, &self.informational) else {
                return Ok(None);
            };
            if !self.registry.reserve(&candidate.node_id, &candidate.slot_id) {
                tracing::debug!(
                    node_id = %candidate.node_id,
                    slot_id = %candidate.slot_id,
                    attempt,
                    "lost reservation race, resampling"
                );
                continue;
            }
            return self
                .create_on_node(candidate, capabilities, dialect)
                .await
                .map(Some);
        }
        Ok(None)
    }

    /// Registry snapshot filtered to nodes eligible for placement:
    /// not draining, heartbeat within the staleness deadline
    fn matchable_nodes(&self) -> Vec<NodeView> {
        self.registry
            .snapshot()
            .into_iter()
            .filter(|n| !n.draining && n.last_heartbeat.elapsed() <= self.config.unhealthy_after)
            .collect()
    }

    async fn create_on_node(
        &self,
        candidate: Candidate,
        capabilities: &Capabilities,
        dialect: Dialect,
    ) -> Result<Session> {
        let created = tokio::time::timeout(
            self.config.node_rpc_timeout,
            self.client.create_session(&candidate.node_uri, capabilities),
        )
        .await;

        let reply = match created {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                self.registry.release(&candidate.node_id, &candidate.slot_id);
                return Err(e);
            }
            Err(_) => {
                self.registry.release(&candidate.node_id, &candidate.slot_id);
                return Err(Error::Timeout(format!(
                    "node {} did not answer create-session within {}s",
                    candidate.node_uri,
                    self.config.node_rpc_timeout.as_secs()
                )));
            }
        };

        let session = Session {
            session_id: reply.session_id,
            node_id: candidate.node_id.clone(),
            slot_id: candidate.slot_id.clone(),
            node_uri: candidate.node_uri,
            stereotype: capabilities.clone(),
            capabilities: reply.capabilities,
            started_at: Utc::now(),
            dialect,
        };

        self.registry
            .confirm(&candidate.node_id, &candidate.slot_id, &session.session_id);
        if let Err(e) = self.sessions.add(session.clone()) {
            self.registry.release(&candidate.node_id, &candidate.slot_id);
            return Err(e);
        }

        tracing::info!(
            session_id = %session.session_id,
            node_id = %session.node_id,
            "session created"
        );
        publish_json(&self.bus, Topic::SessionStarted, &session);
        Ok(session)
    }

    /// Delete a session: forward to the owning node, then drop the
    /// binding and free the slot. A node that is already gone does not
    /// keep the binding alive.
    ///
    /// # Errors
    ///
    /// `NoSuchSession` if the id is not bound.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let session = self.sessions.get(session_id)?;

        let forwarded = tokio::time::timeout(
            self.config.node_rpc_timeout,
            self.client.delete_session(&session.node_uri, session_id),
        )
        .await;
        match forwarded {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(
                    session_id,
                    node_id = %session.node_id,
                    error = %e,
                    "node did not acknowledge delete, dropping binding anyway"
                );
            }
            Err(_) => {
                tracing::warn!(
                    session_id,
                    node_id = %session.node_id,
                    "delete-session RPC timed out, dropping binding anyway"
                );
            }
        }

        self.sessions.remove(session_id);
        self.registry.release_session(&session.node_id, session_id);
        Ok(())
    }
}
