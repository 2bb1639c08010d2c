//! Caller IP blacklist, persisted as a JSON array.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use dashmap::DashSet;
use tracing::info;

use super::file::{load_or_create, write_json};
use super::StoreError;

/// Set of caller IPs whose calls and connections are refused.
#[derive(Debug, Default)]
pub struct Blacklist {
    path: Option<PathBuf>,
    ips: DashSet<String>,
    /// Held across insert, snapshot and write so the file never regresses.
    persist: Mutex<()>,
}

impl Blacklist {
    /// Load the blacklist file, creating an empty one when absent.
    pub fn load_or_create(path: &Path) -> Result<Self, StoreError> {
        let ips: Vec<String> = load_or_create(path, Vec::new())?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            ips: ips.into_iter().collect(),
            persist: Mutex::default(),
        })
    }

    /// A blacklist that is never written to disk.
    #[must_use]
    pub fn in_memory(ips: impl IntoIterator<Item = String>) -> Self {
        Self {
            path: None,
            ips: ips.into_iter().collect(),
            persist: Mutex::default(),
        }
    }

    #[must_use]
    pub fn contains(&self, ip: &str) -> bool {
        self.ips.contains(ip)
    }

    /// Add an IP and persist the whole list.
    pub fn insert(&self, ip: impl Into<String>) -> Result<bool, StoreError> {
        let ip = ip.into();
        let _persist = self.persist.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.ips.insert(ip.clone()) {
            return Ok(false);
        }
        info!(ip = %ip, "IP blacklisted");

        if let Some(path) = &self.path {
            let mut all: Vec<String> = self.ips.iter().map(|entry| entry.key().clone()).collect();
            all.sort();
            write_json(path, &all)?;
        }
        Ok(true)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ips.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }
}
