//! Canonical quote model and the events written to subscribers.
//!
//! A `QuoteUpdate` is the normalized top-of-book for one symbol. Subscribers
//! receive a newline-delimited JSON stream of `StreamEvent`s: price events,
//! feed status notifications and a terminal error event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::RelayError;

/// Top-of-book quote for a single symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteUpdate {
    /// Symbol identifier (e.g., `ES.FUT`).
    pub symbol: String,
    /// Vendor event timestamp in nanoseconds since the UNIX epoch, written as a string.
    #[serde(rename = "timestamp", with = "ns_string")]
    pub ts_event: u64,
    /// Best bid price.
    pub bid_price: Option<f64>,
    /// Best ask price.
    pub ask_price: Option<f64>,
    /// Size resting at the best bid.
    pub bid_size: Option<u32>,
    /// Size resting at the best ask.
    pub ask_size: Option<u32>,
    /// Wall-clock time the relay received the event.
    pub received_at: DateTime<Utc>,
}

impl QuoteUpdate {
    /// Creates an update with prices only, stamped as received now.
    pub fn new(symbol: &str, ts_event: u64, bid_price: Option<f64>, ask_price: Option<f64>) -> Self {
        QuoteUpdate {
            symbol: symbol.to_string(),
            ts_event,
            bid_price,
            ask_price,
            bid_size: None,
            ask_size: None,
            received_at: Utc::now(),
        }
    }

    /// Sets the bid and ask sizes.
    pub fn with_sizes(mut self, bid_size: Option<u32>, ask_size: Option<u32>) -> Self {
        self.bid_size = bid_size;
        self.ask_size = ask_size;
        self
    }

    /// `true` when at least one side carries a price. Updates without any price are noise.
    pub fn has_price(&self) -> bool {
        self.bid_price.is_some() || self.ask_price.is_some()
    }
}

/// Lifecycle state of the upstream feed, also reported to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FeedStatus {
    /// Not connected yet, or nothing to stream.
    Idle,
    /// Connected and delivering records.
    Streaming,
    /// Connection lost; retrying with backoff. Last-known quotes may be stale.
    Reconnecting,
    /// Terminal; the feed will not reconnect.
    Stopped,
}

/// One line of the downstream stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamEvent {
    /// Price data for one symbol.
    Quote(QuoteUpdate),
    /// Upstream state change.
    Status {
        /// New feed state.
        status: FeedStatus,
        /// Time the relay observed the change.
        timestamp: DateTime<Utc>,
    },
    /// Fatal condition; the server closes the connection right after.
    Error {
        /// Human-readable reason.
        error: String,
    },
}

impl StreamEvent {
    /// Builds an error event from any displayable reason.
    pub fn error(reason: impl ToString) -> Self {
        StreamEvent::Error {
            error: reason.to_string(),
        }
    }

    /// Builds a status event stamped now.
    pub fn status(status: FeedStatus) -> Self {
        StreamEvent::Status {
            status,
            timestamp: Utc::now(),
        }
    }

    /// Encode the event as a single JSON line terminated by `\n`.
    pub fn to_json_line(&self) -> Result<Vec<u8>, RelayError> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    /// Decode one line produced by [`Self::to_json_line`].
    pub fn from_json_line(line: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

/// Serializes nanosecond timestamps as decimal strings so 64-bit values survive
/// JSON consumers that parse numbers as doubles.
mod ns_string {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}
