//! Upstream live-feed boundary.
//!
//! The vendor session is an external collaborator. The relay only needs a way to
//! open it for a symbol set and read raw records from it:
//! - `LiveFeed`: opens a connection for a dataset, schema and symbol set.
//! - `FeedHandle`: the open connection, a channel of `FeedMessage`s plus optional
//!   incremental resubscription.
//!
//! `manager` owns the single connection and drives it, `backoff` paces reconnects,
//! `simulated` is an in-process vendor used by the binary.

use std::collections::BTreeSet;

use crossbeam_channel::Receiver;
use thiserror::Error;

pub mod backoff;
pub mod manager;
pub mod simulated;

/// Undecoded vendor record: its record type name plus the JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Vendor record type (e.g., `MBP1Msg`, `SymbolMappingMsg`).
    pub record_type: String,
    /// Record fields as delivered by the vendor.
    pub body: serde_json::Value,
}

impl RawEvent {
    /// Creates a raw event.
    pub fn new(record_type: &str, body: serde_json::Value) -> Self {
        RawEvent {
            record_type: record_type.to_string(),
            body,
        }
    }
}

/// What an open feed connection yields.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// A market record.
    Record(RawEvent),
    /// The connection dropped; the manager should reconnect.
    Disconnected(String),
    /// The vendor refused the session; retrying will not help.
    Rejected(String),
}

/// Failures reported by the upstream collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    /// Transient failure (network, timeout, vendor restart).
    #[error("upstream disconnected: {0}")]
    Disconnected(String),

    /// Permanent failure such as an authentication error.
    #[error("upstream rejected the session: {0}")]
    Rejected(String),

    /// The connection cannot change its symbols in place.
    #[error("incremental resubscription is not supported")]
    Unsupported,
}

/// An open upstream connection.
pub trait FeedHandle: Send {
    /// Records and connection-level signals, in vendor order. The channel closing
    /// counts as a disconnect.
    fn events(&self) -> &Receiver<FeedMessage>;

    /// Switches the live subscription to exactly `symbols` without reconnecting.
    fn update_symbols(&mut self, symbols: &BTreeSet<String>) -> Result<(), FeedError> {
        let _ = symbols;
        Err(FeedError::Unsupported)
    }

    /// Closes the connection. Must be idempotent.
    fn close(&mut self);
}

/// Capability to open the vendor's live feed.
pub trait LiveFeed: Send + 'static {
    /// Connection type produced by [`LiveFeed::open`].
    type Handle: FeedHandle;

    /// Opens a connection streaming `symbols` from `dataset` in `schema`.
    fn open(
        &mut self,
        dataset: &str,
        schema: &str,
        symbols: &BTreeSet<String>,
    ) -> Result<Self::Handle, FeedError>;
}
