//! HTTP surface of the grid gateway
//!
//! Routes are built per module and merged here, the way the rest of the
//! state is threaded: one shared [`AppState`] behind an `Arc`, no
//! globals.

pub mod management;
pub mod session;
pub mod status;
pub mod wire;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::GridConfig;
use crate::distributor::Distributor;
use crate::events::EventBus;
use crate::registry::NodeRegistry;
use crate::sessions::SessionMap;
use crate::Result;

/// Shared state for API handlers
pub struct AppState {
    pub config: GridConfig,
    pub bus: Arc<dyn EventBus>,
    pub registry: Arc<NodeRegistry>,
    pub sessions: Arc<SessionMap>,
    pub distributor: Arc<Distributor>,
    /// Client used to relay per-session traffic to owning nodes
    pub proxy: reqwest::Client,
}

/// Build the full router with all routes and layers
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(session::router(state.clone()))
        .merge(status::router(state.clone()))
        .nest("/se/grid", management::router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// The grid's HTTP server
pub struct GridServer {
    state: Arc<AppState>,
}

impl GridServer {
    #[must_use]
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Run the server until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails to bind or serving fails.
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.state.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind {addr}: {e}")))?;

        tracing::info!(port = self.state.config.port, "grid gateway listening");

        let router = router(self.state);
        axum::serve(listener, router)
            .await
            .map_err(|e| crate::Error::Config(format!("server error: {e}")))?;
        Ok(())
    }

    /// Run the server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
