//! Reusable test helpers for relay integration tests.
//!
//! Provides `TestApp` for driving the full axum router with
//! `tower::ServiceExt::oneshot`, `spawn_test_server` for a real listener, and
//! `spawn_receiver` for a downstream HTTP bot that records what it is sent.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::{Json, Router};
use http_body_util::BodyExt;
use relay_server::api::{create_router, AppState, BOT_ID_HEADER, PLATFORM_USER_AGENT};
use relay_server::config::Config;
use relay_server::store::{Blacklist, MemoryStore};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tower::ServiceExt;

// ============================================================================
// Test App
// ============================================================================

/// A test application wrapping the full axum router.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

impl TestApp {
    /// Build an app over the given registrations with the test config.
    pub fn new(store: MemoryStore) -> Self {
        Self::build(store, Config::default_for_test(), Blacklist::default())
    }

    /// Build an app with a custom config (for timeout testing).
    pub fn with_config(store: MemoryStore, config: Config) -> Self {
        Self::build(store, config, Blacklist::default())
    }

    /// Build an app that refuses the given caller IPs.
    pub fn with_blacklist(store: MemoryStore, config: Config, ips: &[&str]) -> Self {
        let blacklist = Blacklist::in_memory(ips.iter().map(|ip| (*ip).to_owned()));
        Self::build(store, config, blacklist)
    }

    fn build(store: MemoryStore, config: Config, blacklist: Blacklist) -> Self {
        let state = AppState::new(config, Arc::new(store), blacklist)
            .expect("Failed to build app state");
        let router = create_router(state.clone());
        Self { router, state }
    }

    /// Send a request through the router via `tower::ServiceExt::oneshot`.
    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot request failed")
    }
}

/// Build a platform callback with the legitimate user-agent.
pub fn callback(bot_id: &str, body: &Value) -> Request<Body> {
    callback_with(Some(bot_id), PLATFORM_USER_AGENT, body)
}

/// Build a callback with arbitrary identity headers.
pub fn callback_with(bot_id: Option<&str>, user_agent: &str, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/")
        .header("user-agent", user_agent)
        .header("content-type", "application/json");
    if let Some(bot_id) = bot_id {
        builder = builder.header(BOT_ID_HEADER, bot_id);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("Failed to build request")
}

/// Collect a response body.
pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes()
}

// ============================================================================
// Test Server
// ============================================================================

/// A running test server bound to a random port.
pub struct TestServer {
    /// Server address (127.0.0.1:PORT).
    pub addr: SocketAddr,
    /// Base URL for HTTP requests (e.g., `http://127.0.0.1:12345`).
    pub url: String,
    /// Handle to the server task for cleanup.
    _handle: JoinHandle<()>,
}

/// Spawn a real HTTP server on a random port.
pub async fn spawn_test_server(router: Router) -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local addr");
    let url = format!("http://{addr}");

    let handle = tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("Test server failed");
    });

    TestServer {
        addr,
        url,
        _handle: handle,
    }
}

// ============================================================================
// Downstream receivers
// ============================================================================

/// One request seen by a receiver.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Recorded {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("Recorded body is not JSON")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// How a receiver answers.
#[derive(Debug, Clone)]
pub struct ReceiverBehavior {
    /// Status for event deliveries.
    pub status: StatusCode,
    /// Body for `/sign` calls.
    pub sign_reply: Value,
    /// Delay before answering anything.
    pub delay: Duration,
}

impl Default for ReceiverBehavior {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            sign_reply: serde_json::json!({ "status": "ok", "message": "SIG" }),
            delay: Duration::ZERO,
        }
    }
}

#[derive(Clone)]
struct ReceiverState {
    behavior: ReceiverBehavior,
    hits: Arc<Mutex<Vec<Recorded>>>,
}

/// A downstream HTTP bot recording every request it receives.
pub struct Receiver {
    pub server: TestServer,
    hits: Arc<Mutex<Vec<Recorded>>>,
}

impl Receiver {
    pub fn url(&self) -> &str {
        &self.server.url
    }

    pub async fn hits(&self) -> Vec<Recorded> {
        self.hits.lock().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.hits.lock().await.len()
    }
}

/// Spawn a receiver with the given behavior.
pub async fn spawn_receiver(behavior: ReceiverBehavior) -> Receiver {
    let hits = Arc::new(Mutex::new(Vec::new()));
    let router = Router::new().fallback(record).with_state(ReceiverState {
        behavior,
        hits: hits.clone(),
    });

    Receiver {
        server: spawn_test_server(router).await,
        hits,
    }
}

/// Spawn a receiver answering `200` to everything.
pub async fn spawn_ok_receiver() -> Receiver {
    spawn_receiver(ReceiverBehavior::default()).await
}

async fn record(
    State(state): State<ReceiverState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    state.hits.lock().await.push(Recorded {
        path: uri.path().to_owned(),
        headers,
        body,
    });
    tokio::time::sleep(state.behavior.delay).await;

    if uri.path() == "/sign" {
        (StatusCode::OK, Json(state.behavior.sign_reply.clone())).into_response()
    } else {
        state.behavior.status.into_response()
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
