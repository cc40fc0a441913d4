//! Configuration for the grid gateway
//!
//! Values are layered: compiled defaults, then an optional TOML file,
//! then CLI flags / environment (applied by `main`).

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Grid gateway configuration
#[derive(Debug, Clone)]
pub struct GridConfig {
    /// Port the router listens on
    pub port: u16,

    /// Value a node must present when registering; mismatches are
    /// logged and the registration is rejected
    pub registration_secret: String,

    /// Cadence of expected node heartbeats
    pub heartbeat_interval: Duration,

    /// Staleness threshold before a node becomes eligible for eviction.
    /// Defaults to three heartbeat intervals.
    pub unhealthy_after: Duration,

    /// End-to-end budget for one new-session request
    pub new_session_timeout: Duration,

    /// Per-call budget for upstream node RPCs; also bounds how long a
    /// slot may stay reserved before the janitor reclaims it
    pub node_rpc_timeout: Duration,

    /// Per-call budget for node status probes
    pub health_probe_timeout: Duration,

    /// Retry ceiling for lost-race reservations
    pub max_placement_attempts: u32,

    /// Frequency of the orphan-reservation sweep
    pub janitor_interval: Duration,

    /// Capability keys treated as informational: a key missing from a
    /// slot stereotype does not fail the match
    pub informational_keys: Vec<String>,
}

impl Default for GridConfig {
    fn default() -> Self {
        let heartbeat_interval = Duration::from_secs(30);
        Self {
            port: 4444,
            registration_secret: String::new(),
            heartbeat_interval,
            unhealthy_after: heartbeat_interval * 3,
            new_session_timeout: Duration::from_secs(300),
            node_rpc_timeout: Duration::from_secs(180),
            health_probe_timeout: Duration::from_secs(10),
            max_placement_attempts: 3,
            janitor_interval: Duration::from_secs(30),
            informational_keys: Vec::new(),
        }
    }
}

/// On-disk TOML shape; every field optional so partial files work
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct GridConfigFile {
    port: Option<u16>,
    registration_secret: Option<String>,
    heartbeat_interval_secs: Option<u64>,
    unhealthy_after_secs: Option<u64>,
    new_session_timeout_secs: Option<u64>,
    node_rpc_timeout_secs: Option<u64>,
    health_probe_timeout_secs: Option<u64>,
    max_placement_attempts: Option<u32>,
    janitor_interval_secs: Option<u64>,
    informational_keys: Option<Vec<String>>,
}

impl GridConfig {
    /// Load configuration, overlaying the TOML file at `path` (when
    /// given) onto the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a
    /// value is out of range.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = path {
            let raw = std::fs::read_to_string(path)?;
            let file: GridConfigFile = toml::from_str(&raw)?;
            config.apply_file(&file);
        }
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: &GridConfigFile) {
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(secret) = &file.registration_secret {
            self.registration_secret.clone_from(secret);
        }
        if let Some(secs) = file.heartbeat_interval_secs {
            self.heartbeat_interval = Duration::from_secs(secs);
            // keep the 3x relationship unless explicitly overridden below
            self.unhealthy_after = self.heartbeat_interval * 3;
        }
        if let Some(secs) = file.unhealthy_after_secs {
            self.unhealthy_after = Duration::from_secs(secs);
        }
        if let Some(secs) = file.new_session_timeout_secs {
            self.new_session_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.node_rpc_timeout_secs {
            self.node_rpc_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.health_probe_timeout_secs {
            self.health_probe_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = file.max_placement_attempts {
            self.max_placement_attempts = attempts;
        }
        if let Some(secs) = file.janitor_interval_secs {
            self.janitor_interval = Duration::from_secs(secs);
        }
        if let Some(keys) = &file.informational_keys {
            self.informational_keys.clone_from(keys);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_placement_attempts == 0 {
            return Err(Error::Config(
                "max_placement_attempts must be at least 1".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(Error::Config(
                "heartbeat_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
