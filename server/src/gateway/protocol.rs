//! Duplex Wire Protocol
//!
//! Outbound: `{"action": "sign" | "push", "correlation_id": n, "params": {...}}`.
//! Inbound replies: `{"correlation_id": n, "data": {"status": ..., "message" | "payload": ...}}`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::correlation::ReplyData;

/// Kind of an outbound duplex call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Compute a handshake signature; answered with a correlated reply.
    Sign,
    /// Deliver an event; fire-and-forget.
    Push,
}

/// Parameters of an outbound call.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CallParams<'a> {
    Sign {
        appid: &'a str,
        event_ts: &'a str,
        plain_token: &'a str,
    },
    Push {
        body: &'a Value,
    },
}

/// A message sent to a duplex client.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundCall<'a> {
    pub action: Action,
    pub correlation_id: u64,
    pub params: CallParams<'a>,
}

impl<'a> OutboundCall<'a> {
    #[must_use]
    pub const fn sign(
        correlation_id: u64,
        appid: &'a str,
        event_ts: &'a str,
        plain_token: &'a str,
    ) -> Self {
        Self {
            action: Action::Sign,
            correlation_id,
            params: CallParams::Sign {
                appid,
                event_ts,
                plain_token,
            },
        }
    }

    #[must_use]
    pub const fn push(correlation_id: u64, body: &'a Value) -> Self {
        Self {
            action: Action::Push,
            correlation_id,
            params: CallParams::Push { body },
        }
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A message received from a duplex client.
#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    #[serde(default, deserialize_with = "correlation_id")]
    pub correlation_id: Option<u64>,
    #[serde(default)]
    pub data: Option<ReplyData>,
}

impl InboundMessage {
    /// Decode a text frame. Returns `None` for undecodable frames and for
    /// messages that carry no correlation id.
    #[must_use]
    pub fn decode_reply(text: &str) -> Option<(u64, ReplyData)> {
        let message: Self = serde_json::from_str(text).ok()?;
        let id = message.correlation_id?;
        let data = message
            .data
            .unwrap_or_else(|| ReplyData::error("reply carried no data"));
        Some((id, data))
    }
}

/// Accept correlation ids sent either as numbers or as numeric strings.
fn correlation_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}
