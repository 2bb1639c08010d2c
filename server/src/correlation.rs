//! Correlation Hub
//!
//! Request/response matching for RPC-style calls over duplex connections.
//! Every outbound call is tagged with a process-wide id; a tracked call gets a
//! one-shot waiter and a deadline timer and is bound to the connection it was
//! sent on. Whichever of reply or deadline arrives first removes the entry and
//! settles the waiter; the other finds nothing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::RelayError;

/// Deadline for a correlated "sign" call.
pub const SIGN_TIMEOUT: Duration = Duration::from_secs(6);

/// Status value marking a successful reply.
const STATUS_OK: &str = "ok";

/// The `data` member of an inbound reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyData {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ReplyData {
    #[must_use]
    pub fn ok(message: impl Into<Value>) -> Self {
        Self {
            status: STATUS_OK.into(),
            message: Some(message.into()),
            payload: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<Value>) -> Self {
        Self {
            status: "error".into(),
            message: Some(message.into()),
            payload: None,
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// The reply value: `message`, else `payload`, else null.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.message.or(self.payload).unwrap_or(Value::Null)
    }

    fn describe(self) -> String {
        match self.into_value() {
            Value::String(text) => text,
            Value::Null => "no message".into(),
            other => other.to_string(),
        }
    }
}

type Settle = oneshot::Sender<Result<Value, RelayError>>;

struct PendingCall {
    /// Connection the call was sent on; only its replies settle the call.
    connection: Uuid,
    resolver: Settle,
    deadline: Option<AbortHandle>,
}

/// Owner of every in-flight correlated call.
#[derive(Default)]
pub struct CorrelationHub {
    next_id: AtomicU64,
    pending: DashMap<u64, PendingCall>,
}

impl CorrelationHub {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Allocate the next correlation id without tracking a waiter.
    ///
    /// Used for fire-and-forget "push" calls; replies to these ids are dropped.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a tracked call on `connection` that expires after `timeout`.
    pub fn open(self: &Arc<Self>, connection: Uuid, timeout: Duration) -> PendingReply {
        let id = self.next_id();
        let (resolver, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingCall {
                connection,
                resolver,
                deadline: None,
            },
        );

        let hub: Weak<Self> = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(hub) = hub.upgrade() {
                hub.expire(id);
            }
        });

        // A reply may already have settled the call.
        match self.pending.get_mut(&id) {
            Some(mut call) => call.deadline = Some(timer.abort_handle()),
            None => timer.abort(),
        }

        PendingReply { id, rx }
    }

    /// Settle a tracked call with a reply that arrived on connection `from`.
    ///
    /// Returns `false` when no call with this id is pending on that connection
    /// (already expired, already resolved, an untracked push, or a reply from
    /// another connection). A reply from another connection leaves the call
    /// pending.
    pub fn resolve(&self, id: u64, from: Uuid, reply: ReplyData) -> bool {
        let Some((_, call)) = self.pending.remove_if(&id, |_, call| call.connection == from) else {
            debug!(
                correlation_id = id,
                connection_id = %from,
                "Dropping reply with no pending call on this connection"
            );
            return false;
        };

        if let Some(deadline) = call.deadline {
            deadline.abort();
        }

        let outcome = if reply.is_ok() {
            Ok(reply.into_value())
        } else {
            Err(RelayError::Rejected {
                id,
                message: reply.describe(),
            })
        };
        // The waiter may have been dropped by its caller.
        let _ = call.resolver.send(outcome);
        true
    }

    /// Time out a tracked call. Invoked by its deadline timer.
    pub fn expire(&self, id: u64) -> bool {
        let Some((_, call)) = self.pending.remove(&id) else {
            return false;
        };

        warn!(correlation_id = id, "Correlated call timed out");
        let _ = call.resolver.send(Err(RelayError::CorrelationTimeout(id)));
        true
    }

    /// Number of calls still awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Awaitable handle for one tracked call.
#[derive(Debug)]
pub struct PendingReply {
    id: u64,
    rx: oneshot::Receiver<Result<Value, RelayError>>,
}

impl PendingReply {
    /// Correlation id to tag the outbound message with.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the reply or the deadline.
    pub async fn wait(self) -> Result<Value, RelayError> {
        self.rx.await.unwrap_or_else(|_| {
            Err(RelayError::Connection(format!(
                "correlated call {} dropped without a reply",
                self.id
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn conn() -> Uuid {
        Uuid::now_v7()
    }

    #[tokio::test(start_paused = true)]
    async fn reply_fulfils_waiter() {
        let hub = CorrelationHub::new();
        let connection = conn();
        let pending = hub.open(connection, SIGN_TIMEOUT);
        let id = pending.id();

        assert!(hub.resolve(id, connection, ReplyData::ok("SIG")));
        assert_eq!(pending.wait().await.unwrap(), Value::String("SIG".into()));
        assert_eq!(hub.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn payload_is_used_when_message_is_absent() {
        let hub = CorrelationHub::new();
        let connection = conn();
        let pending = hub.open(connection, SIGN_TIMEOUT);
        let reply = ReplyData {
            status: "ok".into(),
            message: None,
            payload: Some(Value::String("from-payload".into())),
        };

        hub.resolve(pending.id(), connection, reply);
        assert_eq!(pending.wait().await.unwrap(), "from-payload");
    }

    #[tokio::test(start_paused = true)]
    async fn error_status_rejects_waiter() {
        let hub = CorrelationHub::new();
        let connection = conn();
        let pending = hub.open(connection, SIGN_TIMEOUT);
        let id = pending.id();

        hub.resolve(id, connection, ReplyData::error("bad secret"));
        match pending.wait().await {
            Err(RelayError::Rejected { id: rejected, message }) => {
                assert_eq!(rejected, id);
                assert_eq!(message, "bad secret");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_call_times_out_and_late_reply_is_ignored() {
        let hub = CorrelationHub::new();
        let connection = conn();
        let started = Instant::now();
        let pending = hub.open(connection, SIGN_TIMEOUT);
        let id = pending.id();

        let err = pending.wait().await.unwrap_err();
        assert!(matches!(err, RelayError::CorrelationTimeout(timed_out) if timed_out == id));
        assert!(started.elapsed() >= SIGN_TIMEOUT);

        assert!(!hub.resolve(id, connection, ReplyData::ok("late")));
        assert!(!hub.expire(id));
        assert_eq!(hub.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resolved_call_is_not_expired_later() {
        let hub = CorrelationHub::new();
        let connection = conn();
        let pending = hub.open(connection, SIGN_TIMEOUT);
        let id = pending.id();

        assert!(hub.resolve(id, connection, ReplyData::ok("SIG")));
        tokio::time::advance(SIGN_TIMEOUT * 2).await;
        tokio::task::yield_now().await;

        assert!(!hub.expire(id));
        assert_eq!(pending.wait().await.unwrap(), "SIG");
    }

    #[tokio::test]
    async fn ids_increase_and_pushes_are_untracked() {
        let hub = CorrelationHub::new();
        let first = hub.next_id();
        let connection = conn();
        let second = hub.open(connection, SIGN_TIMEOUT).id();
        let third = hub.next_id();

        assert!(first >= 1);
        assert!(first < second && second < third);
        assert!(!hub.resolve(third, connection, ReplyData::ok("ignored")));
    }

    #[tokio::test(start_paused = true)]
    async fn reply_from_other_connection_is_ignored() {
        let hub = CorrelationHub::new();
        let target = conn();
        let pending = hub.open(target, SIGN_TIMEOUT);
        let id = pending.id();

        assert!(!hub.resolve(id, conn(), ReplyData::ok("FORGED")));
        assert_eq!(hub.pending_count(), 1);

        assert!(hub.resolve(id, target, ReplyData::ok("SIG")));
        assert_eq!(pending.wait().await.unwrap(), "SIG");
    }
}
