//! Shared test utilities

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use grid_gateway::{
    AppState, Capabilities, Distributor, Error, EventBus, GridConfig, LocalBus, NodeClient,
    NodeRegistry, NodeSessionReply, NodeStatus, Result, SessionMap, SlotStatus,
};

/// Node client whose answers are scripted by the test
pub struct ScriptedNodeClient {
    fail_create: AtomicBool,
    pub creates: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl ScriptedNodeClient {
    #[must_use]
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self {
            fail_create: AtomicBool::new(false),
            creates: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        })
    }

    /// Make subsequent create-session calls fail
    pub fn refuse_creates(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl NodeClient for ScriptedNodeClient {
    async fn status(&self, node_uri: &str) -> Result<NodeStatus> {
        Err(Error::NodeUnreachable(node_uri.to_string()))
    }

    async fn create_session(
        &self,
        node_uri: &str,
        capabilities: &Capabilities,
    ) -> Result<NodeSessionReply> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::SessionNotCreated(format!("node {node_uri} refused")));
        }
        Ok(NodeSessionReply {
            session_id: uuid::Uuid::new_v4().to_string(),
            capabilities: capabilities.clone(),
        })
    }

    async fn delete_session(&self, _node_uri: &str, _session_id: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A fully wired grid behind an axum router, with no background tasks
pub struct TestGrid {
    pub router: axum::Router,
    pub registry: Arc<NodeRegistry>,
    pub sessions: Arc<SessionMap>,
    pub node_client: Arc<ScriptedNodeClient>,
}

#[must_use]
pub fn grid() -> TestGrid {
    grid_with_config(GridConfig::default())
}

#[must_use]
pub fn grid_with_config(config: GridConfig) -> TestGrid {
    let node_client = ScriptedNodeClient::accepting();
    let bus: Arc<dyn EventBus> = Arc::new(LocalBus::new());

    let registry = Arc::new(NodeRegistry::new(&config, bus.clone()));
    registry.wire();

    let sessions = Arc::new(SessionMap::new(bus.clone()));
    sessions.wire();

    let distributor = Arc::new(Distributor::new(
        registry.clone(),
        sessions.clone(),
        node_client.clone(),
        bus.clone(),
        config.clone(),
    ));

    let state = Arc::new(AppState {
        config,
        bus,
        registry: registry.clone(),
        sessions: sessions.clone(),
        distributor,
        proxy: reqwest::Client::new(),
    });

    TestGrid {
        router: grid_gateway::api::router(state),
        registry,
        sessions,
        node_client,
    }
}

/// A node status snapshot with `slots` identical chrome slots
#[must_use]
pub fn chrome_node(node_id: &str, uri: &str, slots: usize) -> NodeStatus {
    node_with_stereotype(node_id, uri, slots, serde_json::json!({"browserName": "chrome"}))
}

#[must_use]
pub fn node_with_stereotype(
    node_id: &str,
    uri: &str,
    slots: usize,
    stereotype: serde_json::Value,
) -> NodeStatus {
    NodeStatus {
        node_id: node_id.to_string(),
        external_uri: uri.to_string(),
        max_sessions: slots,
        slots: (0..slots)
            .map(|i| SlotStatus {
                slot_id: format!("slot-{i}"),
                stereotype: Capabilities::from_json(stereotype.clone()).expect("stereotype"),
                last_started: None,
                session_id: None,
            })
            .collect(),
        draining: false,
        registration_secret: String::new(),
    }
}

/// Send a request through the router and decode the JSON body
pub async fn send(
    router: axum::Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };

    let response = router.oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, value)
}

/// Register a node through the heartbeat ingress route
pub async fn register(router: axum::Router, status: &NodeStatus) {
    let (code, _) = send(
        router,
        "POST",
        "/se/grid/node/heartbeat",
        Some(serde_json::to_value(status).expect("status json")),
    )
    .await;
    assert_eq!(code, StatusCode::OK, "heartbeat ingress failed");
}

/// A W3C new-session body asking for one browser
#[must_use]
pub fn w3c_request(browser: &str) -> serde_json::Value {
    serde_json::json!({
        "capabilities": {
            "alwaysMatch": {"browserName": browser}
        }
    })
}
