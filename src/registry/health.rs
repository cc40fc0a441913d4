//! Periodic node health checks
//!
//! Only stale nodes are probed: a node heartbeating on schedule never
//! sees probe traffic. A stale node is polled with `GET /status`; a
//! successful probe is treated as a fresh heartbeat, and three
//! consecutive failures evict the node.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::node_client::NodeClient;
use crate::registry::NodeRegistry;

/// Consecutive probe failures before a stale node is evicted
const MAX_PROBE_FAILURES: u32 = 3;

/// Health-check scheduler for the node registry
pub struct HealthChecker {
    registry: Arc<NodeRegistry>,
    client: Arc<dyn NodeClient>,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthChecker {
    #[must_use]
    pub fn new(
        registry: Arc<NodeRegistry>,
        client: Arc<dyn NodeClient>,
        interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            client,
            interval,
            probe_timeout,
        }
    }

    /// Run the sweep on a periodic timer until the task is aborted
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }

    /// Probe every stale node once
    pub async fn sweep(&self) {
        for (node_id, uri) in self.registry.stale_nodes() {
            let probe = tokio::time::timeout(self.probe_timeout, self.client.status(&uri)).await;
            match probe {
                Ok(Ok(status)) => {
                    tracing::debug!(node_id = %node_id, "stale node answered status probe");
                    self.registry.handle_heartbeat(status);
                }
                Ok(Err(e)) => {
                    tracing::warn!(node_id = %node_id, uri = %uri, error = %e, "health probe failed");
                    self.fail(&node_id);
                }
                Err(_) => {
                    tracing::warn!(node_id = %node_id, uri = %uri, "health probe timed out");
                    self.fail(&node_id);
                }
            }
        }
    }

    fn fail(&self, node_id: &str) {
        let failures = self.registry.record_probe_failure(node_id);
        if failures >= MAX_PROBE_FAILURES {
            self.registry.evict(node_id, "failed health checks");
        }
    }
}
