//! Relay Error Types

use thiserror::Error;

/// Errors raised while authenticating, signing or relaying a callback.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing or invalid identity headers, malformed body or blacklisted caller.
    #[error("Illegitimate call: {0}")]
    Auth(String),

    /// Unknown bot id, or no duplex slot matches the presented credential.
    #[error("Unregistered bot: {0}")]
    RegistrationMissing(String),

    /// The signer reported a failure or could not be reached.
    #[error("Signature failed: {0}")]
    Signature(String),

    /// No reply arrived before the correlation deadline.
    #[error("Correlated call {0} timed out")]
    CorrelationTimeout(u64),

    /// The peer answered a correlated call with a failure status.
    #[error("Correlated call {id} rejected: {message}")]
    Rejected { id: u64, message: String },

    /// The duplex connection went away before a message could be submitted.
    #[error("Duplex connection unavailable: {0}")]
    Connection(String),

    /// Outbound message encoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client construction failed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
