//! Event Dispatch
//!
//! Handshake signing and event fanout towards the receivers registered for a
//! bot id. Request targets are reached over HTTP, duplex slots through the
//! connection registry.

pub mod fanout;
pub mod signature;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;

use crate::gateway::ConnectionRegistry;
use crate::store::RegistrationStore;

pub use fanout::FanoutSummary;

/// `op` of the platform's signature handshake.
pub const HANDSHAKE_OP: u64 = 13;

/// One authenticated inbound callback.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub bot_id: String,
    /// Body exactly as received, forwarded verbatim to request targets.
    pub raw_body: Bytes,
    /// Parsed body; always an object with a numeric `op`.
    pub body: Value,
}

impl InboundEvent {
    /// Numeric `op`. Integral floats such as `13.0` count as integers.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn op(&self) -> Option<u64> {
        let op = self.body.get("op")?;
        op.as_u64().or_else(|| {
            op.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        })
    }

    #[must_use]
    pub fn is_handshake(&self) -> bool {
        self.op() == Some(HANDSHAKE_OP)
    }

    /// `(event_ts, plain_token)` of a handshake body, when both are non-empty strings.
    #[must_use]
    pub fn handshake_params(&self) -> Option<(&str, &str)> {
        let d = self.body.get("d")?;
        let event_ts = d.get("event_ts")?.as_str().filter(|s| !s.is_empty())?;
        let plain_token = d.get("plain_token")?.as_str().filter(|s| !s.is_empty())?;
        Some((event_ts, plain_token))
    }
}

/// Delivers handshakes and events to downstream receivers.
pub struct Dispatcher {
    store: Arc<dyn RegistrationStore>,
    registry: Arc<ConnectionRegistry>,
    http: reqwest::Client,
    delivery_timeout: Duration,
    sign_timeout: Duration,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        store: Arc<dyn RegistrationStore>,
        registry: Arc<ConnectionRegistry>,
        http: reqwest::Client,
        delivery_timeout: Duration,
        sign_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            http,
            delivery_timeout,
            sign_timeout,
        }
    }
}
