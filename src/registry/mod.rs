//! Fleet directory: known nodes, their slots, health, drain state
//!
//! The registry exclusively owns node records. Registration arrives as
//! `node.heartbeat` snapshots on the event bus; the distributor sees the
//! fleet through [`NodeRegistry::snapshot`] and claims capacity through
//! [`NodeRegistry::reserve`]. All lifecycle events are published after
//! the registry lock has been released, so handlers may read the
//! registry without deadlocking.

pub mod health;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::GridConfig;
use crate::data::{Capabilities, NodeStatus};
use crate::events::{EventBus, Topic};

pub use health::HealthChecker;

/// Payload published on `node.removed`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRemoved {
    pub node_id: String,
    pub external_uri: String,
}

/// State of one slot
#[derive(Debug, Clone, PartialEq)]
pub enum SlotState {
    Idle,
    /// Claimed for an in-flight session creation; bounded by the
    /// node-creation timeout and reclaimed by the janitor past that
    Reserved { since: Instant },
    Busy { session_id: String },
}

impl SlotState {
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

#[derive(Debug, Clone)]
struct Slot {
    slot_id: String,
    stereotype: Capabilities,
    last_started: Option<DateTime<Utc>>,
    state: SlotState,
}

#[derive(Debug)]
struct NodeRecord {
    node_id: String,
    external_uri: String,
    max_sessions: usize,
    draining: bool,
    slots: Vec<Slot>,
    last_heartbeat: Instant,
    probe_failures: u32,
}

impl NodeRecord {
    fn from_status(status: &NodeStatus, now: Instant) -> Self {
        let mut record = Self {
            node_id: status.node_id.clone(),
            external_uri: status.external_uri.clone(),
            max_sessions: status.max_sessions,
            draining: status.draining,
            slots: Vec::new(),
            last_heartbeat: now,
            probe_failures: 0,
        };
        record.apply_update(status, now);
        record
    }

    /// Replace this record's view of the node from a fresh snapshot.
    ///
    /// The node is authoritative for busy/idle, but it cannot know about
    /// an in-flight reservation yet: a locally Reserved slot that the
    /// snapshot still reports idle stays Reserved.
    fn apply_update(&mut self, status: &NodeStatus, now: Instant) {
        let mut slots = Vec::with_capacity(status.slots.len());
        for incoming in &status.slots {
            let local = self.slots.iter().find(|s| s.slot_id == incoming.slot_id);
            let state = match (&incoming.session_id, local.map(|s| &s.state)) {
                (Some(session_id), _) => SlotState::Busy {
                    session_id: session_id.clone(),
                },
                (None, Some(SlotState::Reserved { since })) => {
                    SlotState::Reserved { since: *since }
                }
                (None, _) => SlotState::Idle,
            };
            slots.push(Slot {
                slot_id: incoming.slot_id.clone(),
                stereotype: incoming.stereotype.clone(),
                last_started: incoming
                    .last_started
                    .or_else(|| local.and_then(|s| s.last_started)),
                state,
            });
        }
        self.slots = slots;
        self.external_uri.clone_from(&status.external_uri);
        self.max_sessions = status.max_sessions;
        self.draining = status.draining;
        self.last_heartbeat = now;
        self.probe_failures = 0;
    }

    /// Slots that are not idle (reserved slots count against capacity)
    fn busy_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.state.is_idle()).count()
    }

    fn view(&self) -> NodeView {
        NodeView {
            node_id: self.node_id.clone(),
            external_uri: self.external_uri.clone(),
            max_sessions: self.max_sessions,
            draining: self.draining,
            last_heartbeat: self.last_heartbeat,
            slots: self
                .slots
                .iter()
                .map(|s| SlotView {
                    slot_id: s.slot_id.clone(),
                    stereotype: s.stereotype.clone(),
                    busy: !s.state.is_idle(),
                    last_started: s.last_started,
                })
                .collect(),
        }
    }
}

/// Consistent per-node view handed to the distributor
#[derive(Debug, Clone)]
pub struct NodeView {
    pub node_id: String,
    pub external_uri: String,
    pub max_sessions: usize,
    pub draining: bool,
    pub last_heartbeat: Instant,
    pub slots: Vec<SlotView>,
}

impl NodeView {
    #[must_use]
    pub fn busy_count(&self) -> usize {
        self.slots.iter().filter(|s| s.busy).count()
    }
}

/// One slot within a [`NodeView`]
#[derive(Debug, Clone)]
pub struct SlotView {
    pub slot_id: String,
    pub stereotype: Capabilities,
    pub busy: bool,
    pub last_started: Option<DateTime<Utc>>,
}

type PendingEvents = Vec<(Topic, serde_json::Value)>;

/// Directory of registered nodes
pub struct NodeRegistry {
    nodes: RwLock<HashMap<String, NodeRecord>>,
    secret: String,
    unhealthy_after: Duration,
    bus: Arc<dyn EventBus>,
}

impl NodeRegistry {
    #[must_use]
    pub fn new(config: &GridConfig, bus: Arc<dyn EventBus>) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            secret: config.registration_secret.clone(),
            unhealthy_after: config.unhealthy_after,
            bus,
        }
    }

    /// Subscribe to `node.heartbeat` snapshots on the bus
    pub fn wire(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        self.bus.subscribe(
            Topic::NodeHeartbeat,
            Box::new(move |payload| {
                match serde_json::from_value::<NodeStatus>(payload.clone()) {
                    Ok(status) => registry.handle_heartbeat(status),
                    Err(e) => tracing::warn!(error = %e, "discarding malformed node.heartbeat"),
                }
            }),
        );
    }

    /// Process a registration or heartbeat snapshot
    pub fn handle_heartbeat(&self, status: NodeStatus) {
        if status.registration_secret != self.secret {
            tracing::error!(
                uri = %status.external_uri,
                "node sent wrong registration secret, not registered"
            );
            self.bus.publish(
                Topic::NodeRejected,
                serde_json::json!({"externalUri": status.external_uri}),
            );
            return;
        }

        let now = Instant::now();
        let mut pending: PendingEvents = Vec::new();
        {
            let mut nodes = self.nodes.write();
            if nodes.contains_key(&status.node_id) {
                tracing::debug!(node_id = %status.node_id, "heartbeat update");
                if let Some(record) = nodes.get_mut(&status.node_id) {
                    record.apply_update(&status, now);
                }
            } else {
                // A URI match with a different node id means the node
                // restarted: drop the stale record before inserting.
                let previous = nodes
                    .values()
                    .find(|n| n.external_uri == status.external_uri)
                    .map(|n| n.node_id.clone());
                if let Some(old_id) = previous {
                    if let Some(old) = nodes.remove(&old_id) {
                        tracing::info!(
                            uri = %old.external_uri,
                            old_node_id = %old_id,
                            "removing old node, a new one is registering with the same URI"
                        );
                        push_removed(&mut pending, &old);
                    }
                }
                tracing::info!(
                    node_id = %status.node_id,
                    uri = %status.external_uri,
                    slots = status.slots.len(),
                    "node registered"
                );
                nodes.insert(status.node_id.clone(), NodeRecord::from_status(&status, now));
            }
            drain_if_complete(&mut nodes, &status.node_id, &mut pending);
        }
        self.flush(pending);
    }

    /// A consistent view of the fleet, taken under a read guard
    #[must_use]
    pub fn snapshot(&self) -> Vec<NodeView> {
        self.nodes.read().values().map(NodeRecord::view).collect()
    }

    /// Atomically flip a single slot Idle → Reserved. Fails when the
    /// slot is no longer idle, the node is draining or at capacity, or
    /// either id is unknown.
    #[must_use]
    pub fn reserve(&self, node_id: &str, slot_id: &str) -> bool {
        let mut nodes = self.nodes.write();
        let Some(record) = nodes.get_mut(node_id) else {
            return false;
        };
        if record.draining || record.busy_count() >= record.max_sessions {
            return false;
        }
        let Some(slot) = record.slots.iter_mut().find(|s| s.slot_id == slot_id) else {
            return false;
        };
        if !slot.state.is_idle() {
            return false;
        }
        slot.state = SlotState::Reserved {
            since: Instant::now(),
        };
        true
    }

    /// Flip a Reserved slot to Busy once the node confirmed creation
    pub fn confirm(&self, node_id: &str, slot_id: &str, session_id: &str) {
        let mut nodes = self.nodes.write();
        let slot = nodes
            .get_mut(node_id)
            .and_then(|r| r.slots.iter_mut().find(|s| s.slot_id == slot_id));
        match slot {
            Some(slot) => {
                slot.state = SlotState::Busy {
                    session_id: session_id.to_string(),
                };
                slot.last_started = Some(Utc::now());
            }
            None => {
                // node evicted while the session was being created; the
                // removal cascade already cleaned up after it
                tracing::warn!(node_id, slot_id, "confirm on unknown node/slot");
            }
        }
    }

    /// Return a slot to Idle (failed creation or ended session)
    pub fn release(&self, node_id: &str, slot_id: &str) {
        let mut pending = Vec::new();
        {
            let mut nodes = self.nodes.write();
            if let Some(record) = nodes.get_mut(node_id) {
                if let Some(slot) = record.slots.iter_mut().find(|s| s.slot_id == slot_id) {
                    slot.state = SlotState::Idle;
                }
            }
            drain_if_complete(&mut nodes, node_id, &mut pending);
        }
        self.flush(pending);
    }

    /// Release whichever slot hosts `session_id`
    pub fn release_session(&self, node_id: &str, session_id: &str) {
        let mut pending = Vec::new();
        {
            let mut nodes = self.nodes.write();
            if let Some(record) = nodes.get_mut(node_id) {
                let held = record.slots.iter_mut().find(|s| {
                    matches!(&s.state, SlotState::Busy { session_id: held } if held == session_id)
                });
                if let Some(slot) = held {
                    slot.state = SlotState::Idle;
                }
            }
            drain_if_complete(&mut nodes, node_id, &mut pending);
        }
        self.flush(pending);
    }

    /// Remove a node outright, publishing `node.removed`
    pub fn evict(&self, node_id: &str, reason: &str) -> bool {
        let mut pending = Vec::new();
        let evicted = {
            let mut nodes = self.nodes.write();
            match nodes.remove(node_id) {
                Some(record) => {
                    tracing::warn!(node_id, reason, uri = %record.external_uri, "evicting node");
                    push_removed(&mut pending, &record);
                    true
                }
                None => false,
            }
        };
        self.flush(pending);
        evicted
    }

    /// Reclaim reservations older than `max_age`; returns how many were
    /// released
    pub fn release_expired(&self, max_age: Duration) -> usize {
        let mut pending = Vec::new();
        let mut released = 0;
        {
            let mut nodes = self.nodes.write();
            let ids: Vec<String> = nodes.keys().cloned().collect();
            for record in nodes.values_mut() {
                for slot in &mut record.slots {
                    if let SlotState::Reserved { since } = slot.state {
                        if since.elapsed() >= max_age {
                            tracing::warn!(
                                node_id = %record.node_id,
                                slot_id = %slot.slot_id,
                                "releasing orphaned reservation"
                            );
                            slot.state = SlotState::Idle;
                            released += 1;
                        }
                    }
                }
            }
            for node_id in ids {
                drain_if_complete(&mut nodes, &node_id, &mut pending);
            }
        }
        self.flush(pending);
        released
    }

    /// Nodes whose last heartbeat is older than the staleness deadline
    #[must_use]
    pub fn stale_nodes(&self) -> Vec<(String, String)> {
        self.nodes
            .read()
            .values()
            .filter(|n| n.last_heartbeat.elapsed() > self.unhealthy_after)
            .map(|n| (n.node_id.clone(), n.external_uri.clone()))
            .collect()
    }

    /// Record a failed health probe; returns the consecutive count
    pub fn record_probe_failure(&self, node_id: &str) -> u32 {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(node_id) {
            Some(record) => {
                record.probe_failures += 1;
                record.probe_failures
            }
            None => 0,
        }
    }

    /// Number of registered nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Whether the registry can accept registrations
    #[must_use]
    pub fn is_ready(&self) -> bool {
        true
    }

    fn flush(&self, pending: PendingEvents) {
        for (topic, payload) in pending {
            self.bus.publish(topic, payload);
        }
    }
}

fn push_removed(pending: &mut PendingEvents, record: &NodeRecord) {
    match serde_json::to_value(NodeRemoved {
        node_id: record.node_id.clone(),
        external_uri: record.external_uri.clone(),
    }) {
        Ok(payload) => pending.push((Topic::NodeRemoved, payload)),
        Err(e) => tracing::warn!(error = %e, "failed to encode node.removed"),
    }
}

/// A draining node whose busy-slot count reached zero is done: publish
/// `node.drain-complete`, then evict.
fn drain_if_complete(
    nodes: &mut HashMap<String, NodeRecord>,
    node_id: &str,
    pending: &mut PendingEvents,
) {
    let complete = nodes
        .get(node_id)
        .is_some_and(|r| r.draining && r.busy_count() == 0);
    if !complete {
        return;
    }
    if let Some(record) = nodes.remove(node_id) {
        tracing::info!(node_id, uri = %record.external_uri, "drain complete");
        pending.push((
            Topic::NodeDrainComplete,
            serde_json::json!({"nodeId": record.node_id}),
        ));
        push_removed(pending, &record);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::data::SlotStatus;
    use crate::events::LocalBus;

    fn chrome() -> Capabilities {
        Capabilities::from_json(serde_json::json!({"browserName": "chrome"})).unwrap()
    }

    fn status(node_id: &str, uri: &str, slots: usize) -> NodeStatus {
        NodeStatus {
            node_id: node_id.to_string(),
            external_uri: uri.to_string(),
            max_sessions: slots,
            slots: (0..slots)
                .map(|i| SlotStatus {
                    slot_id: format!("slot-{i}"),
                    stereotype: chrome(),
                    last_started: None,
                    session_id: None,
                })
                .collect(),
            draining: false,
            registration_secret: String::new(),
        }
    }

    fn counting_bus(topic: Topic) -> (Arc<LocalBus>, Arc<AtomicUsize>) {
        let bus = Arc::new(LocalBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        bus.subscribe(
            topic,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (bus, count)
    }

    fn registry_with(bus: Arc<LocalBus>) -> NodeRegistry {
        NodeRegistry::new(&GridConfig::default(), bus as Arc<dyn EventBus>)
    }

    #[test]
    fn registers_and_lists() {
        let registry = registry_with(Arc::new(LocalBus::new()));
        registry.handle_heartbeat(status("n1", "http://a:5555", 2));
        assert_eq!(registry.len(), 1);
        let view = &registry.snapshot()[0];
        assert_eq!(view.node_id, "n1");
        assert_eq!(view.slots.len(), 2);
        assert_eq!(view.busy_count(), 0);
    }

    #[test]
    fn wrong_secret_rejected() {
        let (bus, rejected) = counting_bus(Topic::NodeRejected);
        let config = GridConfig {
            registration_secret: "s3kret".to_string(),
            ..GridConfig::default()
        };
        let registry = NodeRegistry::new(&config, bus as Arc<dyn EventBus>);

        registry.handle_heartbeat(status("n1", "http://a:5555", 1));
        assert!(registry.is_empty());
        assert_eq!(rejected.load(Ordering::SeqCst), 1);

        let mut ok = status("n1", "http://a:5555", 1);
        ok.registration_secret = "s3kret".to_string();
        registry.handle_heartbeat(ok);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn same_uri_new_id_evicts_old_node() {
        let (bus, removed) = counting_bus(Topic::NodeRemoved);
        let registry = registry_with(bus);

        registry.handle_heartbeat(status("old", "http://a:5555", 1));
        registry.handle_heartbeat(status("new", "http://a:5555", 1));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot()[0].node_id, "new");
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reserve_takes_exactly_one_winner() {
        let registry = Arc::new(registry_with(Arc::new(LocalBus::new())));
        registry.handle_heartbeat(status("n1", "http://a:5555", 1));

        let successes: usize = std::thread::scope(|scope| {
            (0..8)
                .map(|_| {
                    let registry = Arc::clone(&registry);
                    scope.spawn(move || usize::from(registry.reserve("n1", "slot-0")))
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|h| h.join().expect("reserve thread"))
                .sum()
        });
        assert_eq!(successes, 1);
    }

    #[test]
    fn reserve_respects_draining() {
        let registry = registry_with(Arc::new(LocalBus::new()));
        let mut draining = status("n1", "http://a:5555", 2);
        draining.draining = true;
        draining.slots[0].session_id = Some("s-held".to_string());
        registry.handle_heartbeat(draining);

        assert!(!registry.reserve("n1", "slot-1"));
    }

    #[test]
    fn reserve_respects_max_sessions() {
        let registry = registry_with(Arc::new(LocalBus::new()));
        let mut over = status("n1", "http://a:5555", 2);
        over.max_sessions = 1;
        registry.handle_heartbeat(over);

        assert!(registry.reserve("n1", "slot-0"));
        assert!(!registry.reserve("n1", "slot-1"));
    }

    #[test]
    fn confirm_then_release_cycle() {
        let registry = registry_with(Arc::new(LocalBus::new()));
        registry.handle_heartbeat(status("n1", "http://a:5555", 1));

        assert!(registry.reserve("n1", "slot-0"));
        registry.confirm("n1", "slot-0", "sess-1");
        assert_eq!(registry.snapshot()[0].busy_count(), 1);

        registry.release_session("n1", "sess-1");
        assert_eq!(registry.snapshot()[0].busy_count(), 0);
        assert!(registry.reserve("n1", "slot-0"));
    }

    #[test]
    fn heartbeat_keeps_inflight_reservation() {
        let registry = registry_with(Arc::new(LocalBus::new()));
        registry.handle_heartbeat(status("n1", "http://a:5555", 2));
        assert!(registry.reserve("n1", "slot-0"));

        // node's snapshot lags behind the reservation
        registry.handle_heartbeat(status("n1", "http://a:5555", 2));
        assert_eq!(registry.snapshot()[0].busy_count(), 1);
        assert!(!registry.reserve("n1", "slot-0"));
    }

    #[test]
    fn heartbeat_clears_ended_session() {
        let registry = registry_with(Arc::new(LocalBus::new()));
        let mut busy = status("n1", "http://a:5555", 1);
        busy.slots[0].session_id = Some("sess-1".to_string());
        registry.handle_heartbeat(busy);
        assert_eq!(registry.snapshot()[0].busy_count(), 1);

        // the node reports the slot idle again
        registry.handle_heartbeat(status("n1", "http://a:5555", 1));
        assert_eq!(registry.snapshot()[0].busy_count(), 0);
    }

    #[test]
    fn drain_completes_when_last_session_releases() {
        let (bus, drained) = counting_bus(Topic::NodeDrainComplete);
        let registry = registry_with(bus);

        registry.handle_heartbeat(status("n1", "http://a:5555", 1));
        assert!(registry.reserve("n1", "slot-0"));
        registry.confirm("n1", "slot-0", "sess-1");

        let mut draining = status("n1", "http://a:5555", 1);
        draining.draining = true;
        draining.slots[0].session_id = Some("sess-1".to_string());
        registry.handle_heartbeat(draining);
        assert_eq!(registry.len(), 1);
        assert_eq!(drained.load(Ordering::SeqCst), 0);

        registry.release_session("n1", "sess-1");
        assert_eq!(drained.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn idle_draining_node_evicted_immediately() {
        let (bus, drained) = counting_bus(Topic::NodeDrainComplete);
        let registry = registry_with(bus);

        let mut draining = status("n1", "http://a:5555", 1);
        draining.draining = true;
        registry.handle_heartbeat(draining);

        assert!(registry.is_empty());
        assert_eq!(drained.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expired_reservations_are_reclaimed() {
        let registry = registry_with(Arc::new(LocalBus::new()));
        registry.handle_heartbeat(status("n1", "http://a:5555", 2));
        assert!(registry.reserve("n1", "slot-0"));

        assert_eq!(registry.release_expired(Duration::ZERO), 1);
        assert_eq!(registry.snapshot()[0].busy_count(), 0);

        // busy slots are not touched
        assert!(registry.reserve("n1", "slot-1"));
        registry.confirm("n1", "slot-1", "sess-1");
        assert_eq!(registry.release_expired(Duration::ZERO), 0);
        assert_eq!(registry.snapshot()[0].busy_count(), 1);
    }

    #[test]
    fn evict_publishes_removed() {
        let (bus, removed) = counting_bus(Topic::NodeRemoved);
        let registry = registry_with(bus);
        registry.handle_heartbeat(status("n1", "http://a:5555", 1));

        assert!(registry.evict("n1", "test"));
        assert!(!registry.evict("n1", "test"));
        assert!(registry.is_empty());
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn probe_failures_reset_on_heartbeat() {
        let registry = registry_with(Arc::new(LocalBus::new()));
        registry.handle_heartbeat(status("n1", "http://a:5555", 1));

        assert_eq!(registry.record_probe_failure("n1"), 1);
        assert_eq!(registry.record_probe_failure("n1"), 2);
        registry.handle_heartbeat(status("n1", "http://a:5555", 1));
        assert_eq!(registry.record_probe_failure("n1"), 1);
    }
}
