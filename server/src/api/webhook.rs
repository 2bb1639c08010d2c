//! Webhook Ingress
//!
//! Single entry point for platform callbacks. Every call is answered with
//! `200`: illegitimate calls are logged and acknowledged empty so the platform
//! never retries them, handshakes get `{plain_token, signature}`, and events are
//! acknowledged once their HTTP deliveries have settled.

use axum::{
    body::{to_bytes, Bytes},
    extract::{Request, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use super::{client_ip, header_str, AppState, BOT_ID_HEADER, PLATFORM_USER_AGENT};
use crate::dispatch::InboundEvent;
use crate::error::RelayError;
use crate::observability::preview;

/// Largest inbound body accepted.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Handshake answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub plain_token: String,
    pub signature: String,
}

/// What the ingress answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressOutcome {
    /// Full handshake body; replaces the empty acknowledgment.
    Handshake(HandshakeResponse),
    /// Empty `200`.
    Acknowledge,
}

impl IntoResponse for IngressOutcome {
    fn into_response(self) -> Response {
        match self {
            Self::Handshake(body) => (StatusCode::OK, Json(body)).into_response(),
            Self::Acknowledge => StatusCode::OK.into_response(),
        }
    }
}

/// POST / handler.
pub async fn webhook(State(state): State<AppState>, request: Request) -> IngressOutcome {
    let (parts, body) = request.into_parts();
    let ip = client_ip(&parts.headers, &parts.extensions, state.config.trust_real_ip);

    let raw_body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(ip = %ip, error = %e, "Failed to read webhook body");
            return IngressOutcome::Acknowledge;
        }
    };

    handle(&state, &parts.headers, raw_body, &ip).await
}

/// Authenticate, classify and act on one callback.
pub async fn handle(
    state: &AppState,
    headers: &HeaderMap,
    raw_body: Bytes,
    ip: &str,
) -> IngressOutcome {
    if state.blacklist.contains(ip) {
        warn!(ip = %ip, "Callback from blacklisted IP ignored");
        return IngressOutcome::Acknowledge;
    }

    let event = match classify(headers, raw_body.clone()) {
        Ok(event) => event,
        Err(e) => {
            error!(ip = %ip, error = %e, body = %preview(&raw_body), "Fake event");
            return IngressOutcome::Acknowledge;
        }
    };

    if event.is_handshake() {
        return handshake(state, &event)
            .await
            .map_or(IngressOutcome::Acknowledge, IngressOutcome::Handshake);
    }

    info!(bot_id = %event.bot_id, body = %preview(&event.raw_body), "Push event");
    if let Err(e) = state.dispatcher.fanout(&event, headers).await {
        error!(bot_id = %event.bot_id, error = %e, "Push stopped");
    }
    IngressOutcome::Acknowledge
}

/// Check the identity headers and parse the body into an [`InboundEvent`].
pub fn classify(headers: &HeaderMap, raw_body: Bytes) -> Result<InboundEvent, RelayError> {
    let bot_id = header_str(headers, BOT_ID_HEADER)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| RelayError::Auth(format!("missing {BOT_ID_HEADER} header")))?;

    if header_str(headers, USER_AGENT.as_str()) != Some(PLATFORM_USER_AGENT) {
        return Err(RelayError::Auth("unexpected user-agent".into()));
    }

    let body: Value = serde_json::from_slice(&raw_body)
        .map_err(|e| RelayError::Auth(format!("body is not JSON: {e}")))?;
    if !body.get("op").is_some_and(Value::is_number) {
        return Err(RelayError::Auth("body has no numeric op".into()));
    }

    Ok(InboundEvent {
        bot_id: bot_id.to_owned(),
        raw_body,
        body,
    })
}

/// Answer a handshake. Every failure is logged here and yields `None`.
async fn handshake(state: &AppState, event: &InboundEvent) -> Option<HandshakeResponse> {
    let Some((event_ts, plain_token)) = event.handshake_params() else {
        error!(
            bot_id = %event.bot_id,
            body = %preview(&event.raw_body),
            "Body error: event_ts or plain_token missing"
        );
        return None;
    };

    info!(bot_id = %event.bot_id, "Handshake received");
    match state.dispatcher.sign(&event.bot_id, event_ts, plain_token).await {
        Ok(signature) => Some(HandshakeResponse {
            plain_token: plain_token.to_owned(),
            signature,
        }),
        Err(e) => {
            error!(bot_id = %event.bot_id, error = %e, "Handshake failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(bot_id: Option<&'static str>, user_agent: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(bot_id) = bot_id {
            headers.insert(BOT_ID_HEADER, HeaderValue::from_static(bot_id));
        }
        headers.insert(USER_AGENT, HeaderValue::from_static(user_agent));
        headers
    }

    #[test]
    fn legitimate_call_is_classified() {
        let event = classify(
            &headers(Some("A"), PLATFORM_USER_AGENT),
            Bytes::from_static(br#"{"op":0,"d":{}}"#),
        )
        .unwrap();
        assert_eq!(event.bot_id, "A");
        assert_eq!(event.op(), Some(0));
    }

    #[test]
    fn illegitimate_calls_are_auth_errors() {
        let body = Bytes::from_static(br#"{"op":0}"#);
        let cases = [
            classify(&headers(None, PLATFORM_USER_AGENT), body.clone()),
            classify(&headers(Some(""), PLATFORM_USER_AGENT), body.clone()),
            classify(&headers(Some("A"), "curl/8.0"), body.clone()),
            classify(&headers(Some("A"), "QQBot-Callback/2"), body),
            classify(
                &headers(Some("A"), PLATFORM_USER_AGENT),
                Bytes::from_static(br#"{"op":"13"}"#),
            ),
            classify(
                &headers(Some("A"), PLATFORM_USER_AGENT),
                Bytes::from_static(b"not json"),
            ),
            classify(
                &headers(Some("A"), PLATFORM_USER_AGENT),
                Bytes::from_static(b"[1,2]"),
            ),
        ];

        for result in cases {
            assert!(matches!(result, Err(RelayError::Auth(_))), "{result:?}");
        }
    }
}
