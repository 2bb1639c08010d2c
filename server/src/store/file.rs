//! Registration File
//!
//! JSON file holding the listen address and every bot registration. A file with
//! default values is written when none exists.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{MemoryStore, StoreError};

/// On-disk registration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayFile {
    /// Listen port (default: 7777)
    pub port: u16,
    /// Listen host (default: 0.0.0.0)
    pub host: String,
    /// HTTP receivers
    #[serde(default)]
    pub http: Vec<HttpEntry>,
    /// WebSocket receivers
    #[serde(default)]
    pub ws: Vec<WsEntry>,
}

/// An HTTP receiver entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpEntry {
    /// Bot id the receiver serves.
    pub appid: String,
    /// Inbound token, kept for file compatibility.
    #[serde(default)]
    pub token: String,
    /// Delivery URL.
    pub push: String,
    /// Credential sent with every delivery.
    pub push_token: String,
}

/// A WebSocket receiver entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsEntry {
    pub appid: String,
    /// Credential the connecting client presents.
    pub token: String,
}

impl Default for RelayFile {
    fn default() -> Self {
        Self {
            port: 7777,
            host: "0.0.0.0".into(),
            http: Vec::new(),
            ws: Vec::new(),
        }
    }
}

impl RelayFile {
    /// `host:port` to bind the listener to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Build the in-memory registration store, preserving entry order per bot.
    #[must_use]
    pub fn to_store(&self) -> MemoryStore {
        let store = self.ws.iter().fold(MemoryStore::new(), |store, entry| {
            store.with_duplex_slot(&entry.appid, &entry.token)
        });

        self.http.iter().fold(store, |store, entry| {
            store.with_request_target(&entry.appid, &entry.push, &entry.push_token)
        })
    }
}

/// Read a JSON file, or write `default` to it and return that when it is absent.
pub fn load_or_create<T>(path: &Path, default: T) -> Result<T, StoreError>
where
    T: Serialize + DeserializeOwned,
{
    let display = path.display().to_string();

    if path.exists() {
        let data = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: display.clone(),
            source,
        })?;
        return serde_json::from_str(&data).map_err(|source| StoreError::Parse {
            path: display,
            source,
        });
    }

    write_json(path, &default)?;
    info!(path = %path.display(), "Created default file");
    Ok(default)
}

/// Pretty-print a value to a JSON file.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let display = path.display().to_string();
    let data = serde_json::to_string_pretty(value).map_err(|source| StoreError::Parse {
        path: display.clone(),
        source,
    })?;
    fs::write(path, data).map_err(|source| StoreError::Io {
        path: display,
        source,
    })
}
