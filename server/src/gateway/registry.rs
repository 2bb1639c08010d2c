//! Connection Registry
//!
//! Authenticates duplex clients against the registration store and tracks which
//! live connection currently occupies each duplex slot.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::protocol::InboundMessage;
use crate::correlation::CorrelationHub;
use crate::error::RelayError;
use crate::observability::redact;
use crate::store::RegistrationStore;

/// Identifies one duplex slot: a bot id and the slot's position in its registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub bot_id: String,
    pub index: usize,
}

/// Send side of an attached duplex connection.
#[derive(Debug, Clone)]
pub struct LiveConnection {
    /// Unique per accepted connection.
    pub id: Uuid,
    /// Peer address, for logging.
    pub ip: String,
    tx: mpsc::UnboundedSender<String>,
}

impl LiveConnection {
    /// Wrap the sender feeding a connection's write task.
    #[must_use]
    pub fn new(ip: impl Into<String>, tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            ip: ip.into(),
            tx,
        }
    }

    /// Queue a text frame. Returns `false` once the write task has stopped.
    pub fn send(&self, text: String) -> bool {
        self.tx.send(text).is_ok()
    }
}

/// Live connection state for every duplex slot.
pub struct ConnectionRegistry {
    store: Arc<dyn RegistrationStore>,
    hub: Arc<CorrelationHub>,
    live: DashMap<SlotKey, LiveConnection>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn RegistrationStore>, hub: Arc<CorrelationHub>) -> Self {
        Self {
            store,
            hub,
            live: DashMap::new(),
        }
    }

    #[must_use]
    pub const fn hub(&self) -> &Arc<CorrelationHub> {
        &self.hub
    }

    /// Find the slot a connecting client may claim.
    ///
    /// The first slot of the bot whose shared secret matches wins.
    pub fn authenticate(
        &self,
        bot_id: Option<&str>,
        secret: Option<&str>,
    ) -> Result<SlotKey, RelayError> {
        let (Some(bot_id), Some(secret)) = (
            bot_id.filter(|s| !s.is_empty()),
            secret.filter(|s| !s.is_empty()),
        ) else {
            return Err(RelayError::Auth(
                "missing x-bot-appid or authorization header".into(),
            ));
        };

        let registration = self
            .store
            .registration(bot_id)
            .ok_or_else(|| RelayError::RegistrationMissing(bot_id.to_owned()))?;

        registration
            .duplex_slots
            .iter()
            .position(|slot| slot.bot_id == bot_id && secrets_match(&slot.shared_secret, secret))
            .map(|index| SlotKey {
                bot_id: bot_id.to_owned(),
                index,
            })
            .ok_or_else(|| {
                RelayError::RegistrationMissing(format!(
                    "{bot_id}: no duplex slot matches token {}",
                    redact(secret)
                ))
            })
    }

    /// Bind a live connection to a slot, replacing any previous occupant.
    pub fn attach(&self, slot: SlotKey, connection: LiveConnection) {
        let id = connection.id;
        if let Some(previous) = self.live.insert(slot.clone(), connection) {
            warn!(
                bot_id = %slot.bot_id,
                slot = slot.index,
                previous = %previous.id,
                current = %id,
                "Duplex slot taken over by a new connection"
            );
        }
    }

    /// Clear a slot, but only if `connection_id` still occupies it.
    pub fn detach(&self, slot: &SlotKey, connection_id: Uuid) -> bool {
        self.live
            .remove_if(slot, |_, current| current.id == connection_id)
            .is_some()
    }

    /// The connection occupying a slot, if any.
    #[must_use]
    pub fn connection(&self, slot: &SlotKey) -> Option<LiveConnection> {
        self.live.get(slot).map(|entry| entry.value().clone())
    }

    /// Every occupied slot of a bot, in registration order.
    #[must_use]
    pub fn live_connections(&self, bot_id: &str) -> Vec<(SlotKey, LiveConnection)> {
        let Some(registration) = self.store.registration(bot_id) else {
            return Vec::new();
        };

        (0..registration.duplex_slots.len())
            .filter_map(|index| {
                let slot = SlotKey {
                    bot_id: bot_id.to_owned(),
                    index,
                };
                self.connection(&slot).map(|connection| (slot, connection))
            })
            .collect()
    }

    /// Total number of attached connections.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Route a text frame received on connection `from`.
    ///
    /// Only frames carrying a correlation id reach the hub, and they settle
    /// only calls that were sent on the same connection.
    pub fn route_inbound(&self, from: Uuid, text: &str) -> bool {
        match InboundMessage::decode_reply(text) {
            Some((id, data)) => self.hub.resolve(id, from, data),
            None => {
                debug!("Ignoring duplex frame without correlation id");
                false
            }
        }
    }
}

/// Compare secrets without short-circuiting on the first differing byte.
fn secrets_match(expected: &str, presented: &str) -> bool {
    expected.len() == presented.len()
        && expected
            .as_bytes()
            .iter()
            .zip(presented.as_bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
