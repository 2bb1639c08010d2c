//! Registration Store
//!
//! Static per-bot registrations: HTTP request targets and WebSocket duplex slots.
//! Registrations are immutable once loaded; live connection state is kept by
//! [`crate::gateway::registry::ConnectionRegistry`].

pub mod blacklist;
pub mod file;

use std::collections::HashMap;

use thiserror::Error;

pub use blacklist::Blacklist;
pub use file::RelayFile;

/// A downstream receiver reached with one-shot HTTP calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    /// Delivery URL. Handshakes are signed at `<url>/sign`.
    pub url: String,
    /// Sent as the `authorization` header on every call.
    pub shared_secret: String,
}

/// A downstream receiver reached over a long-lived WebSocket connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplexSlot {
    pub bot_id: String,
    /// Credential a connecting client must present to claim this slot.
    pub shared_secret: String,
}

/// Everything registered for one bot id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    pub request_targets: Vec<RequestTarget>,
    pub duplex_slots: Vec<DuplexSlot>,
}

impl Registration {
    /// The designated handshake signer: the first request target, if any.
    #[must_use]
    pub fn signer(&self) -> Option<&RequestTarget> {
        self.request_targets.first()
    }
}

/// Read access to registrations by bot id.
pub trait RegistrationStore: Send + Sync {
    /// Look up the registration for a bot id.
    fn registration(&self, bot_id: &str) -> Option<&Registration>;
}

/// In-memory registration store built once at startup.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    registrations: HashMap<String, Registration>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an HTTP request target for a bot.
    #[must_use]
    pub fn with_request_target(
        mut self,
        bot_id: impl Into<String>,
        url: impl Into<String>,
        shared_secret: impl Into<String>,
    ) -> Self {
        self.registrations
            .entry(bot_id.into())
            .or_default()
            .request_targets
            .push(RequestTarget {
                url: url.into(),
                shared_secret: shared_secret.into(),
            });
        self
    }

    /// Register a WebSocket duplex slot for a bot.
    #[must_use]
    pub fn with_duplex_slot(
        mut self,
        bot_id: impl Into<String>,
        shared_secret: impl Into<String>,
    ) -> Self {
        let bot_id = bot_id.into();
        self.registrations
            .entry(bot_id.clone())
            .or_default()
            .duplex_slots
            .push(DuplexSlot {
                bot_id,
                shared_secret: shared_secret.into(),
            });
        self
    }

    /// Number of registered bot ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

impl RegistrationStore for MemoryStore {
    fn registration(&self, bot_id: &str) -> Option<&Registration> {
        self.registrations.get(bot_id)
    }
}

/// Errors loading or persisting store files.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_groups_entries_by_bot() {
        let store = MemoryStore::new()
            .with_request_target("A", "http://a1", "s1")
            .with_request_target("A", "http://a2", "s2")
            .with_duplex_slot("A", "ws-secret")
            .with_duplex_slot("B", "other");

        assert_eq!(store.len(), 2);
        let a = store.registration("A").unwrap();
        assert_eq!(a.request_targets.len(), 2);
        assert_eq!(a.duplex_slots.len(), 1);
        assert_eq!(a.duplex_slots[0].bot_id, "A");
        assert!(store.registration("Z").is_none());
    }

    #[test]
    fn first_request_target_signs() {
        let store = MemoryStore::new()
            .with_request_target("A", "http://first", "s1")
            .with_request_target("A", "http://second", "s2");
        let signer = store.registration("A").and_then(Registration::signer).unwrap();
        assert_eq!(signer.url, "http://first");

        let ws_only = MemoryStore::new().with_duplex_slot("C", "secret");
        assert!(ws_only.registration("C").unwrap().signer().is_none());
    }
}
