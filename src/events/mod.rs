//! Topic-addressed pub/sub carrying node and session lifecycle events
//!
//! Publishing is best-effort and fire-and-forget: the bus does not
//! persist, and a publish returns as soon as the payload has been handed
//! to the bus. Components receive the bus as an explicit `Arc<dyn
//! EventBus>` dependency at construction; there is no global instance.
//!
//! [`LocalBus`] is the in-process implementation using direct callback
//! dispatch. The trait leaves room for a network-backed bus carrying the
//! same JSON payloads.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Topics used by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// A node status snapshot arrived (registration or heartbeat)
    NodeHeartbeat,
    /// A draining node released its last busy slot
    NodeDrainComplete,
    /// A registration was discarded (bad secret)
    NodeRejected,
    /// A node was evicted from the registry
    NodeRemoved,
    /// A session was created and bound
    SessionStarted,
    /// A session ended (explicit delete or owning node gone)
    SessionEnded,
}

impl Topic {
    /// Wire name of the topic
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NodeHeartbeat => "node.heartbeat",
            Self::NodeDrainComplete => "node.drain-complete",
            Self::NodeRejected => "node.rejected",
            Self::NodeRemoved => "node.removed",
            Self::SessionStarted => "session.started",
            Self::SessionEnded => "session.ended",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscriber callback. Handlers may run concurrently for different
/// payloads and must be idempotent-safe. A handler must not take the
/// lock of the component that published the event it is handling.
pub type Handler = Box<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Fire-and-forget pub/sub over JSON payloads
pub trait EventBus: Send + Sync {
    /// Hand a payload to the bus. Never blocks beyond the hand-off;
    /// delivery failures are the bus's problem, not the publisher's.
    fn publish(&self, topic: Topic, payload: serde_json::Value);

    /// Register a handler invoked for every payload on `topic`
    fn subscribe(&self, topic: Topic, handler: Handler);

    /// Whether the bus is able to carry events
    fn is_ready(&self) -> bool {
        true
    }
}

/// In-process bus: subscribers are invoked inline on the publisher's
/// task, in subscription order. Per-topic publish order is therefore
/// observed exactly; there is no cross-topic ordering.
#[derive(Default)]
pub struct LocalBus {
    handlers: RwLock<HashMap<Topic, Vec<Handler>>>,
}

impl LocalBus {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventBus for LocalBus {
    fn publish(&self, topic: Topic, payload: serde_json::Value) {
        tracing::trace!(topic = %topic, "publishing event");
        // Handlers may themselves publish; a recursive read keeps that
        // from deadlocking against a queued writer.
        let handlers = self.handlers.read_recursive();
        if let Some(subscribers) = handlers.get(&topic) {
            for handler in subscribers {
                handler(&payload);
            }
        }
    }

    fn subscribe(&self, topic: Topic, handler: Handler) {
        self.handlers.write().entry(topic).or_default().push(handler);
    }
}

/// Publish a serializable payload, logging and suppressing encode
/// failures (publishing is best-effort by contract).
pub fn publish_json<T: Serialize>(bus: &Arc<dyn EventBus>, topic: Topic, payload: &T) {
    match serde_json::to_value(payload) {
        Ok(value) => bus.publish(topic, value),
        Err(e) => tracing::warn!(topic = %topic, error = %e, "failed to encode event payload"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::data::{NodeStatus, SlotStatus};
    use crate::Capabilities;

    #[test]
    fn delivers_to_matching_topic_only() {
        let bus = LocalBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        bus.subscribe(
            Topic::NodeRemoved,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.publish(Topic::NodeHeartbeat, serde_json::json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        bus.publish(Topic::NodeRemoved, serde_json::json!({}));
        bus.publish(Topic::NodeRemoved, serde_json::json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handler_may_republish() {
        let bus = Arc::new(LocalBus::new());
        let ended = Arc::new(AtomicUsize::new(0));

        let inner = bus.clone();
        bus.subscribe(
            Topic::NodeRemoved,
            Box::new(move |_| {
                inner.publish(Topic::SessionEnded, serde_json::json!({}));
            }),
        );
        let counter = ended.clone();
        bus.subscribe(
            Topic::SessionEnded,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.publish(Topic::NodeRemoved, serde_json::json!({}));
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn node_status_round_trips_through_bus() {
        let status = NodeStatus {
            node_id: "n1".to_string(),
            external_uri: "http://10.0.0.7:5555".to_string(),
            max_sessions: 2,
            slots: vec![SlotStatus {
                slot_id: "s1".to_string(),
                stereotype: Capabilities::from_json(
                    serde_json::json!({"browserName": "chrome"}),
                )
                .unwrap(),
                last_started: None,
                session_id: None,
            }],
            draining: false,
            registration_secret: String::new(),
        };

        let bus = LocalBus::new();
        let seen: Arc<parking_lot::Mutex<Option<NodeStatus>>> =
            Arc::new(parking_lot::Mutex::new(None));
        let sink = seen.clone();
        bus.subscribe(
            Topic::NodeHeartbeat,
            Box::new(move |payload| {
                *sink.lock() = serde_json::from_value(payload.clone()).ok();
            }),
        );

        bus.publish(Topic::NodeHeartbeat, serde_json::to_value(&status).unwrap());
        assert_eq!(seen.lock().as_ref(), Some(&status));
    }

    #[test]
    fn topic_wire_names() {
        assert_eq!(Topic::NodeHeartbeat.as_str(), "node.heartbeat");
        assert_eq!(Topic::NodeDrainComplete.as_str(), "node.drain-complete");
        assert_eq!(Topic::SessionEnded.as_str(), "session.ended");
    }
}
