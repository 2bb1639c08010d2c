//! API Router and Application State
//!
//! Central routing configuration and shared state.

pub mod webhook;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::ConnectInfo,
    http::{Extensions, HeaderMap},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::{
    config::Config,
    correlation::CorrelationHub,
    dispatch::Dispatcher,
    error::RelayError,
    gateway::{self, ConnectionRegistry},
    store::{Blacklist, RegistrationStore},
};

/// Header carrying the bot id on inbound calls and duplex connections.
pub const BOT_ID_HEADER: &str = "x-bot-appid";

/// Exact `user-agent` the platform sends with every callback.
pub const PLATFORM_USER_AGENT: &str = "QQBot-Callback";

/// Client address set by a reverse proxy.
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Live duplex connections
    pub registry: Arc<ConnectionRegistry>,
    /// Handshake signing and event fanout
    pub dispatcher: Arc<Dispatcher>,
    /// Refused caller IPs
    pub blacklist: Arc<Blacklist>,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        config: Config,
        store: Arc<dyn RegistrationStore>,
        blacklist: Blacklist,
    ) -> Result<Self, RelayError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("relay-server/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let registry = Arc::new(ConnectionRegistry::new(store.clone(), CorrelationHub::new()));
        let dispatcher = Arc::new(Dispatcher::new(
            store,
            registry.clone(),
            http,
            config.delivery_timeout,
            config.sign_timeout,
        ));

        Ok(Self {
            config: Arc::new(config),
            registry,
            dispatcher,
            blacklist: Arc::new(blacklist),
        })
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check + webhook ingress
        .route("/", get(ping).post(webhook::webhook))
        // Duplex connections
        .route("/webhook", get(gateway::handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct PingResponse {
    code: u8,
}

/// Health check endpoint.
async fn ping() -> Json<PingResponse> {
    Json(PingResponse { code: 0 })
}

/// Caller IP: the socket peer, or `x-real-ip` when the relay sits behind a
/// trusted proxy that sets it.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions, trust_real_ip: bool) -> String {
    trust_real_ip
        .then(|| header_str(headers, REAL_IP_HEADER))
        .flatten()
        .map(str::to_owned)
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".into())
}

/// A header as `&str`, when present and valid UTF-8.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
