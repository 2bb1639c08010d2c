//! Event Fanout
//!
//! Concurrent delivery of one event to every receiver of a bot. Duplex pushes
//! are submitted first, then every HTTP delivery is started and awaited
//! together. A failed target only lowers `succeeded`; nothing is retried.

use axum::http::{
    header::{AUTHORIZATION, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING},
    HeaderMap, HeaderValue,
};
use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::{Dispatcher, InboundEvent};
use crate::error::RelayError;
use crate::gateway::protocol::OutboundCall;
use crate::store::RequestTarget;

/// Outcome of one fanout round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanoutSummary {
    /// HTTP deliveries answered with a success status.
    pub succeeded: usize,
    /// HTTP deliveries issued.
    pub attempted: usize,
    /// Duplex pushes submitted to a live connection.
    pub pushed: usize,
}

impl Dispatcher {
    /// Deliver an event to every request target and every live duplex slot of its bot.
    #[instrument(skip_all, fields(bot_id = %event.bot_id))]
    pub async fn fanout(
        &self,
        event: &InboundEvent,
        headers: &HeaderMap,
    ) -> Result<FanoutSummary, RelayError> {
        let registration = self
            .store
            .registration(&event.bot_id)
            .ok_or_else(|| RelayError::RegistrationMissing(event.bot_id.clone()))?;

        let forwarded = forwarded_headers(headers);

        let mut pushed = 0;
        for (slot, connection) in self.registry.live_connections(&event.bot_id) {
            let id = self.registry.hub().next_id();
            match OutboundCall::push(id, &event.body).encode() {
                Ok(text) => {
                    if connection.send(text) {
                        pushed += 1;
                    } else {
                        debug!(slot = slot.index, "Duplex slot closed before push");
                    }
                }
                Err(e) => error!(slot = slot.index, error = %e, "Failed to encode push"),
            }
        }

        let deliveries = registration
            .request_targets
            .iter()
            .map(|target| self.deliver(target, &forwarded, event.raw_body.clone()));
        let results = join_all(deliveries).await;

        let summary = FanoutSummary {
            succeeded: results.iter().filter(|delivered| **delivered).count(),
            attempted: results.len(),
            pushed,
        };

        info!(
            succeeded = summary.succeeded,
            attempted = summary.attempted,
            pushed = summary.pushed,
            "Push result"
        );
        Ok(summary)
    }

    /// POST the raw event body to one request target.
    async fn deliver(&self, target: &RequestTarget, headers: &HeaderMap, body: Bytes) -> bool {
        let result = self
            .http
            .post(&target.url)
            .headers(headers.clone())
            .header(AUTHORIZATION, target.shared_secret.as_str())
            .timeout(self.delivery_timeout)
            .body(body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(url = %target.url, status = resp.status().as_u16(), "Delivery rejected");
                false
            }
            Err(e) => {
                warn!(
                    url = %target.url,
                    timeout = e.is_timeout(),
                    error = %e,
                    "Delivery failed"
                );
                false
            }
        }
    }
}

/// Platform headers forwarded with each delivery, minus hop-by-hop headers and
/// the inbound credential.
fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in [HOST, CONTENT_LENGTH, CONNECTION, TRANSFER_ENCODING, AUTHORIZATION] {
        forwarded.remove(name);
    }
    forwarded
        .entry(CONTENT_TYPE)
        .or_insert(HeaderValue::from_static("application/json"));
    forwarded
}
