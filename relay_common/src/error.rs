//! Error types shared between client and server.
//!
//! The `RelayError` enum unifies common failure cases for I/O, serialization,
//! channel communication, subscription validation and internal logic, allowing
//! crates to propagate a single error type.
use std::io;
use std::sync::PoisonError;

use thiserror::Error;

/// Unified error type shared by client and server.
#[derive(Error, Debug)]
pub enum RelayError {
    /// I/O error originating from the standard library or sockets.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic formatting/validation error with a human-readable message.
    #[error("Format error: {0}")]
    Format(String),

    /// Failure while encoding/decoding JSON via serde_json.
    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Channel send failed (e.g., receiver dropped); contains a short context string.
    #[error("Channel send failed: {0}")]
    ChannelSend(String),

    /// Error indicating a poisoned mutex/lock was encountered.
    #[error("Mutex Lock Poisoned: {0}")]
    MutexLock(String),

    /// A subscription request named no symbols, a malformed symbol, or a symbol
    /// outside the served catalog.
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    /// The upstream feed has permanently stopped; no new sessions are served.
    #[error("Upstream feed stopped: {0}")]
    FeedStopped(String),

    /// The upstream feed was started twice or used before it was started.
    #[error("Feed lifecycle error: {0}")]
    FeedLifecycle(String),
}

impl<T> From<PoisonError<T>> for RelayError {
    fn from(err: PoisonError<T>) -> Self {
        RelayError::MutexLock(err.to_string())
    }
}
