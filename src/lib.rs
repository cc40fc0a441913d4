//! Grid gateway - control plane for a pool of browser-driver nodes
//!
//! This library implements the grid's core: admission and placement of
//! new sessions, the authoritative session→node map, node registration
//! and health, and per-request routing to owning nodes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      Callers                          │
//! │   POST /session  │  /session/{id}/...  │  /status    │
//! └───────────────────────┬──────────────────────────────┘
//!                         │
//! ┌───────────────────────▼──────────────────────────────┐
//! │                      Router                           │
//! │   new session → Distributor │ known session → proxy  │
//! └───────┬──────────────────────────────┬───────────────┘
//!         │                              │
//! ┌───────▼────────┐            ┌────────▼───────┐
//! │  Distributor    │◄──────────►│  Session Map   │
//! │  match + place  │            │  id → node     │
//! └───────┬────────┘            └────────▲───────┘
//!         │                              │ node.removed
//! ┌───────▼────────┐            ┌────────┴───────┐
//! │  Node Registry  │───events──►│   Event Bus    │
//! │  fleet + health │            │  pub/sub       │
//! └───────┬────────┘            └────────────────┘
//!         │ HTTP
//! ┌───────▼──────────────────────────────────────────────┐
//! │          Nodes (browser-driver workers)               │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod data;
pub mod distributor;
pub mod error;
pub mod events;
pub mod node_client;
pub mod registry;
pub mod sessions;

pub use api::{AppState, GridServer};
pub use config::GridConfig;
pub use data::{Capabilities, Dialect, NodeStatus, Session, SlotStatus};
pub use distributor::{Distributor, Janitor, NewSessionRequest};
pub use error::{Error, Result};
pub use events::{EventBus, LocalBus, Topic};
pub use node_client::{HttpNodeClient, NodeClient, NodeSessionReply};
pub use registry::{HealthChecker, NodeRegistry};
pub use sessions::SessionMap;
