//! Error types for the grid gateway

use thiserror::Error;

/// Result type alias for grid operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the grid gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Matching failed, every alternative was exhausted, or the chosen
    /// node refused to start the session
    #[error("session not created: {0}")]
    SessionNotCreated(String),

    /// The referenced session id is unknown (ended, never existed, or
    /// cleaned up after its node disappeared)
    #[error("no such session: {0}")]
    NoSuchSession(String),

    /// A session with the same id is already bound
    #[error("duplicate session: {0}")]
    DuplicateSession(String),

    /// Malformed request body or capabilities violating the schema
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An upstream node RPC failed at the transport level. Surfaced only
    /// on explicit operations against that node; eviction is left to the
    /// health loop.
    #[error("node unreachable: {0}")]
    NodeUnreachable(String),

    /// A core deadline expired
    #[error("timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// W3C error slug sent in the `error` field of failure bodies
    #[must_use]
    pub fn wire_slug(&self) -> &'static str {
        match self {
            Self::SessionNotCreated(_) => "session not created",
            Self::NoSuchSession(_) => "invalid session id",
            Self::InvalidArgument(_) => "invalid argument",
            Self::Timeout(_) => "timeout",
            _ => "unknown error",
        }
    }

    /// Legacy-dialect numeric status code for this error
    #[must_use]
    pub fn legacy_status(&self) -> i64 {
        match self {
            Self::SessionNotCreated(_) => 33,
            Self::NoSuchSession(_) => 6,
            Self::Timeout(_) => 21,
            _ => 13,
        }
    }

    /// HTTP status code this error maps to at the router boundary
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NoSuchSession(_) => 404,
            Self::InvalidArgument(_) => 400,
            _ => 500,
        }
    }
}
