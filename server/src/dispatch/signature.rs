//! Handshake Signature Coordination
//!
//! The platform verifies a callback endpoint by sending `op = 13` with an
//! `event_ts` and `plain_token`; the relay answers with a signature computed by
//! the bot. The bot's first HTTP target signs at `<url>/sign`; bots with only
//! duplex slots sign through a correlated "sign" call on any live connection.

use axum::http::header::{AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, instrument};

use super::Dispatcher;
use crate::api::{BOT_ID_HEADER, PLATFORM_USER_AGENT};
use crate::error::RelayError;
use crate::gateway::protocol::OutboundCall;
use crate::gateway::LiveConnection;
use crate::store::RequestTarget;

/// Status an HTTP signer returns on failure.
const STATUS_ERROR: &str = "error";

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    event_ts: &'a str,
    plain_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    status: String,
    #[serde(default)]
    message: String,
}

impl Dispatcher {
    /// Obtain the handshake signature for a bot.
    #[instrument(skip(self, plain_token))]
    pub async fn sign(
        &self,
        bot_id: &str,
        event_ts: &str,
        plain_token: &str,
    ) -> Result<String, RelayError> {
        let registration = self
            .store
            .registration(bot_id)
            .ok_or_else(|| RelayError::RegistrationMissing(bot_id.to_owned()))?;

        if let Some(signer) = registration.signer() {
            info!(url = %signer.url, "[http][sign] Requesting signature");
            return self.sign_http(signer, bot_id, event_ts, plain_token).await;
        }

        let Some((slot, connection)) = self.registry.live_connections(bot_id).into_iter().next()
        else {
            return Err(RelayError::RegistrationMissing(format!(
                "{bot_id} has no HTTP signer and no live duplex connection"
            )));
        };

        info!(slot = slot.index, "[ws][sign] Requesting signature");
        self.sign_duplex(&connection, bot_id, event_ts, plain_token)
            .await
    }

    async fn sign_http(
        &self,
        signer: &RequestTarget,
        bot_id: &str,
        event_ts: &str,
        plain_token: &str,
    ) -> Result<String, RelayError> {
        let url = format!("{}/sign", signer.url.trim_end_matches('/'));

        let response = self
            .http
            .post(&url)
            .header(USER_AGENT, PLATFORM_USER_AGENT)
            .header(BOT_ID_HEADER, bot_id)
            .header(AUTHORIZATION, signer.shared_secret.as_str())
            .timeout(self.sign_timeout)
            .json(&SignRequest {
                event_ts,
                plain_token,
            })
            .send()
            .await
            .map_err(|e| {
                error!(url = %url, error = %e, "[sign][http] Signer unreachable, check the bot");
                RelayError::Signature(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(
                url = %url,
                status = status.as_u16(),
                "[sign][http] Signer returned an error status"
            );
            return Err(RelayError::Signature(format!("signer returned HTTP {status}")));
        }

        let body: SignResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Signature(format!("invalid signer response: {e}")))?;

        if body.status == STATUS_ERROR {
            error!(url = %url, message = %body.message, "[sign][http] Signer reported failure");
            return Err(RelayError::Signature(body.message));
        }
        non_empty(body.message)
    }

    async fn sign_duplex(
        &self,
        connection: &LiveConnection,
        bot_id: &str,
        event_ts: &str,
        plain_token: &str,
    ) -> Result<String, RelayError> {
        let pending = self.registry.hub().open(connection.id, self.sign_timeout);
        let text = OutboundCall::sign(pending.id(), bot_id, event_ts, plain_token).encode()?;

        if !connection.send(text) {
            // The pending entry is left to its own deadline.
            return Err(RelayError::Connection(format!(
                "connection {} closed before sign request",
                connection.id
            )));
        }

        match pending.wait().await {
            Ok(Value::String(signature)) => non_empty(signature),
            Ok(other) => Err(RelayError::Signature(format!(
                "unexpected signature payload: {other}"
            ))),
            Err(RelayError::Rejected { message, .. }) => Err(RelayError::Signature(message)),
            Err(e) => Err(e),
        }
    }
}

fn non_empty(signature: String) -> Result<String, RelayError> {
    if signature.is_empty() {
        Err(RelayError::Signature("signer returned an empty signature".into()))
    } else {
        Ok(signature)
    }
}
