//! Slot selection: scoring and deterministic tie-breaking
//!
//! The score of a candidate node is
//! `(has busy slots ? 0 : 1_000_000) - busy_count`, so an untouched node
//! beats every partially-loaded one, and among loaded nodes the emptier
//! wins. Ties break by fewest busy slots, then least-recently-used slot,
//! then smallest node id. The order is frozen; changing it silently
//! reshuffles placements under load.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::data::Capabilities;
use crate::registry::NodeView;

const UNTOUCHED_NODE_SCORE: i64 = 1_000_000;

/// A slot the distributor may try to reserve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub node_id: String,
    pub slot_id: String,
    pub node_uri: String,
}

#[derive(Debug)]
struct Ranked {
    score: i64,
    busy: usize,
    last_started: Option<DateTime<Utc>>,
    candidate: Candidate,
}

fn rank(a: &Ranked, b: &Ranked) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| a.busy.cmp(&b.busy))
        // a never-used slot sorts before any used one
        .then_with(|| match (a.last_started, b.last_started) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => x.cmp(&y),
        })
        .then_with(|| a.candidate.node_id.cmp(&b.candidate.node_id))
        .then_with(|| a.candidate.slot_id.cmp(&b.candidate.slot_id))
}

/// Pick the best idle slot able to serve `request`, or `None` when no
/// node in `nodes` has one. Callers pass a pre-filtered view (healthy,
/// not draining).
#[must_use]
pub fn select_slot(
    nodes: &[NodeView],
    request: &Capabilities,
    informational: &HashSet<String>,
) -> Option<Candidate> {
    let mut candidates: Vec<Ranked> = Vec::new();
    for node in nodes {
        let busy = node.busy_count();
        let base = if busy > 0 { 0 } else { UNTOUCHED_NODE_SCORE };
        let score = base - busy as i64;
        for slot in &node.slots {
            if slot.busy || !slot.stereotype.satisfies(request, informational) {
                continue;
            }
            candidates.push(Ranked {
                score,
                busy,
                last_started: slot.last_started,
                candidate: Candidate {
                    node_id: node.node_id.clone(),
                    slot_id: slot.slot_id.clone(),
                    node_uri: node.external_uri.clone(),
                },
            });
        }
    }
    candidates.sort_by(rank);
    candidates.into_iter().next().map(|r| r.candidate)
}
