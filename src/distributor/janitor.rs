//! Orphan-reservation sweep
//!
//! A reservation normally resolves quickly: the create call succeeds
//! (slot goes Busy) or fails (slot is released). If the requesting task
//! dies between the two, the slot would leak in Reserved forever; the
//! janitor reclaims any reservation older than the node-creation
//! deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::registry::NodeRegistry;

/// Periodic sweep returning overdue reservations to Idle
pub struct Janitor {
    registry: Arc<NodeRegistry>,
    interval: Duration,
    reservation_timeout: Duration,
}

impl Janitor {
    #[must_use]
    pub fn new(
        registry: Arc<NodeRegistry>,
        interval: Duration,
        reservation_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            interval,
            reservation_timeout,
        }
    }

    /// Run the sweep on a periodic timer until the task is aborted
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }

    /// One pass over the fleet
    pub fn sweep(&self) {
        let released = self.registry.release_expired(self.reservation_timeout);
        if released > 0 {
            tracing::info!(released, "janitor reclaimed orphaned reservations");
        }
    }
}
