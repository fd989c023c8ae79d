//! Error types.

use std::path::PathBuf;
use std::time::Duration;

use sudolikeaboss_protocol::ItemError;
use thiserror::Error;

use crate::transport::TransportError;

/// Result type for helper operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can end a run.
///
/// Every variant is terminal for the run; nothing here is retried internally.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration loaded but holds an unusable value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reading or writing the state file failed.
    #[error("state file {path}: {source}")]
    StateIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The state file exists but cannot be used. Never regenerated silently.
    #[error("state file {path} is corrupt: {reason}")]
    StateCorrupt { path: PathBuf, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The helper answered a handshake step with the wrong action.
    #[error("unexpected response to {step}: expected {expected}, got {actual}")]
    UnexpectedResponse {
        step: &'static str,
        expected: &'static str,
        actual: String,
    },

    /// A message could not be decoded as JSON of the expected shape.
    #[error("failed to decode {context}: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A required field was absent from a handshake payload.
    #[error("{step} response is missing `{field}`")]
    MissingField {
        step: &'static str,
        field: &'static str,
    },

    #[error("invalid base64 in `{field}`: {source}")]
    Base64 {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    /// The helper's M3 does not prove knowledge of the shared secret.
    #[error("invalid M3: {actual} (actual) != {expected} (expected)")]
    InvalidM3 { actual: String, expected: String },

    /// An encrypted payload failed authentication.
    #[error("invalid HMAC")]
    InvalidHmac,

    #[error("invalid padding: {0}")]
    Padding(&'static str),

    #[error("cipher error: {0}")]
    Cipher(String),

    /// The system random source failed.
    #[error("secure random source failed: {0}")]
    Random(String),

    #[error(transparent)]
    Item(#[from] ItemError),

    /// The overall deadline elapsed before the fetch completed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The background fetch task panicked or was cancelled.
    #[error("fetch task failed: {0}")]
    Task(String),
}

impl Error {
    /// M3 or HMAC mismatch: wrong secret or tampering.
    pub fn is_verification_failure(&self) -> bool {
        matches!(self, Error::InvalidM3 { .. } | Error::InvalidHmac)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    pub(crate) fn decode(context: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| Error::Decode { context, source }
    }

    pub(crate) fn base64(field: &'static str) -> impl FnOnce(base64::DecodeError) -> Self {
        move |source| Error::Base64 { field, source }
    }
}
