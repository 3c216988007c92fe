//! The `error` module defines the error types shared across `chat-relay`.
//!
//! Store backends report `StoreError`; the delivery engine wraps those into
//! `SubmitError` for its callers. `ClientError` covers the WebSocket client.

use thiserror::Error;

/// Errors raised by a message store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store cannot be reached. Terminal for subscriptions.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A read failed in a way that may succeed on retry.
    #[error("transient store failure: {0}")]
    Transient(String),

    /// A stored entry could not be decoded.
    #[error("corrupt entry at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether a subscription should stop instead of retrying.
    pub fn is_permanent(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        match e {
            sled::Error::Io(io) => match io.kind() {
                std::io::ErrorKind::Interrupted
                | std::io::ErrorKind::WouldBlock
                | std::io::ErrorKind::TimedOut => StoreError::Transient(io.to_string()),
                _ => StoreError::Unavailable(io.to_string()),
            },
            sled::Error::Corruption { at, .. } => StoreError::Corrupt {
                key: at.map(|p| format!("{p:?}")).unwrap_or_default(),
                reason: "sled reported corruption".to_string(),
            },
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors returned by the delivery engine to its callers.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("recipient must not be empty")]
    InvalidRecipient,

    #[error("sender must not be empty")]
    InvalidSender,

    #[error("timestamp {0} is out of range")]
    InvalidTimestamp(i64),

    #[error("store failure: {0}")]
    StoreFailure(#[from] StoreError),

    #[error("operation not supported by the {0} backend")]
    Unsupported(&'static str),
}

/// Errors raised by `RelayClient`.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("invalid frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("server error: {0}")]
    Server(String),

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("connection closed")]
    Closed,
}
