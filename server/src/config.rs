//! Server Configuration
//!
//! Process settings loaded from environment variables. Bot registrations live
//! in the registration file named here, see [`crate::store::file`].

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::correlation::SIGN_TIMEOUT;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Registration file (default: config.json)
    pub registration_path: PathBuf,

    /// IP blacklist file (default: blacklist.json)
    pub blacklist_path: PathBuf,

    /// Timeout for each HTTP fanout delivery (default: 2s)
    pub delivery_timeout: Duration,

    /// Deadline for a handshake signature (default: 6s)
    pub sign_timeout: Duration,

    /// Overrides `host:port` from the registration file when set
    pub bind_address: Option<String>,

    /// Take the caller IP from `x-real-ip` instead of the socket peer
    /// (default: false). Only enable behind a proxy that overwrites the header.
    pub trust_real_ip: bool,

    /// Log output format (default: pretty)
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("pretty") | Err(_) => LogFormat::Pretty,
            Ok(other) => bail!("LOG_FORMAT must be \"json\" or \"pretty\", got {other:?}"),
        };

        Ok(Self {
            registration_path: env::var("RELAY_CONFIG_PATH")
                .unwrap_or_else(|_| "config.json".into())
                .into(),
            blacklist_path: env::var("RELAY_BLACKLIST_PATH")
                .unwrap_or_else(|_| "blacklist.json".into())
                .into(),
            delivery_timeout: env_millis("RELAY_DELIVERY_TIMEOUT_MS")
                .unwrap_or(Duration::from_secs(2)),
            sign_timeout: env_millis("RELAY_SIGN_TIMEOUT_MS").unwrap_or(SIGN_TIMEOUT),
            bind_address: env::var("RELAY_BIND_ADDRESS").ok(),
            trust_real_ip: env::var("RELAY_TRUST_REAL_IP")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            log_format,
        })
    }

    /// Create a default configuration for testing.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            registration_path: "config.json".into(),
            blacklist_path: "blacklist.json".into(),
            delivery_timeout: Duration::from_secs(2),
            sign_timeout: SIGN_TIMEOUT,
            bind_address: Some("127.0.0.1:0".into()),
            trust_real_ip: false,
            log_format: LogFormat::Pretty,
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}
