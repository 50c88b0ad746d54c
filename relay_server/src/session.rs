//! Subscriber sessions.
//!
//! A session is opened for a fixed symbol set and yields, in order: the
//! last-known quote of every requested symbol that has one, a `reconnecting`
//! status if the upstream is currently down, then live events from its private
//! queue. It ends when it is closed, when the upstream stops, or after an error
//! event. Dropping the stream unregisters the session.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io::Write;
use std::sync::Arc;

use log::{info, warn};
use relay_common::symbols::{ensure_in_catalog, parse_symbol_list};
use relay_common::{FeedStatus, QuoteUpdate, RelayError, Result, StreamEvent};

use crate::queue::SessionQueue;
use crate::registry::{SessionId, SubscriptionRegistry};

/// Lazily produced events of one subscriber.
pub struct SessionStream {
    id: SessionId,
    symbols: BTreeSet<String>,
    registry: Arc<SubscriptionRegistry>,
    queue: Arc<SessionQueue>,
    pending: VecDeque<StreamEvent>,
    snapshot_marks: HashMap<String, QuoteUpdate>,
    finished: bool,
}

impl SessionStream {
    /// Registers a session for `symbols` and seeds it with their last-known quotes.
    pub fn open(registry: &Arc<SubscriptionRegistry>, symbols: BTreeSet<String>) -> Result<Self> {
        if symbols.is_empty() {
            return Err(RelayError::InvalidSubscription(
                "no symbols requested".to_string(),
            ));
        }
        let id = registry.next_session_id();
        let subscription = registry.join(id, symbols)?;

        let mut pending: VecDeque<StreamEvent> = subscription
            .snapshot
            .iter()
            .cloned()
            .map(StreamEvent::Quote)
            .collect();
        if subscription.feed_status == FeedStatus::Reconnecting {
            pending.push_back(StreamEvent::status(FeedStatus::Reconnecting));
        }
        let snapshot_marks = subscription
            .snapshot
            .into_iter()
            .map(|update| (update.symbol.clone(), update))
            .collect();

        Ok(Self {
            id,
            symbols: subscription.symbols,
            registry: Arc::clone(registry),
            queue: subscription.queue,
            pending,
            snapshot_marks,
            finished: false,
        })
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Subscribed symbols.
    pub fn symbols(&self) -> &BTreeSet<String> {
        &self.symbols
    }

    /// Updates discarded because this session fell behind.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    /// Handle that can close this session from another thread.
    pub fn closer(&self) -> SessionCloser {
        SessionCloser {
            id: self.id,
            queue: Arc::clone(&self.queue),
            registry: Arc::clone(&self.registry),
        }
    }

    /// Unregister and release the queue.
    pub fn close(self) {
        drop(self);
    }

    fn release(&mut self) {
        self.queue.close();
        if let Err(e) = self.registry.leave(self.id) {
            warn!("Session {} failed to unregister: {}", self.id, e);
        }
    }
}

impl Iterator for SessionStream {
    type Item = StreamEvent;

    fn next(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        loop {
            let Some(event) = self.queue.recv() else {
                self.finished = true;
                return None;
            };
            if let StreamEvent::Quote(update) = &event {
                // The snapshot may already hold the first live update.
                if let Some(mark) = self.snapshot_marks.remove(&update.symbol) {
                    if mark == *update {
                        continue;
                    }
                }
            }
            if is_terminal(&event) {
                self.finished = true;
            }
            return Some(event);
        }
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.release();
    }
}

fn is_terminal(event: &StreamEvent) -> bool {
    matches!(
        event,
        StreamEvent::Error { .. }
            | StreamEvent::Status {
                status: FeedStatus::Stopped,
                ..
            }
    )
}

/// Cross-thread close signal for one session.
#[derive(Clone)]
pub struct SessionCloser {
    id: SessionId,
    queue: Arc<SessionQueue>,
    registry: Arc<SubscriptionRegistry>,
}

impl SessionCloser {
    /// Ends the session promptly, even if its consumer is blocked waiting.
    pub fn close(&self) {
        self.queue.close();
        if let Err(e) = self.registry.leave(self.id) {
            warn!("Session {} failed to unregister: {}", self.id, e);
        }
    }
}

/// Parses a raw request line and opens a session for it.
pub fn open_request(
    registry: &Arc<SubscriptionRegistry>,
    request: &str,
    catalog_only: bool,
) -> Result<SessionStream> {
    let symbols = parse_symbol_list(request)?;
    if catalog_only {
        ensure_in_catalog(&symbols)?;
    }
    SessionStream::open(registry, symbols)
}

/// What a finished session delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Session identifier.
    pub session_id: SessionId,
    /// Events written to the transport.
    pub delivered: u64,
    /// Updates discarded for this session.
    pub dropped: u64,
}

/// Drain `stream` into `writer` as newline-delimited JSON, flushing every event.
///
/// A write failure ends only this session; it is logged and returned.
pub fn deliver<W: Write>(mut stream: SessionStream, writer: &mut W) -> Result<SessionSummary> {
    let mut delivered = 0;
    while let Some(event) = stream.next() {
        let line = event.to_json_line()?;
        if let Err(e) = writer.write_all(&line).and_then(|_| writer.flush()) {
            warn!(
                "Session {} transport failed after {} events: {}",
                stream.id(),
                delivered,
                e
            );
            return Err(RelayError::Io(e));
        }
        delivered += 1;
    }

    let summary = SessionSummary {
        session_id: stream.id(),
        delivered,
        dropped: stream.dropped(),
    };
    info!(
        "Session {} finished: {} events delivered, {} dropped",
        summary.session_id, summary.delivered, summary.dropped
    );
    Ok(summary)
}

/// Write a single error event; used when a session cannot be opened.
pub fn reject<W: Write>(writer: &mut W, error: &RelayError) -> Result<()> {
    writer.write_all(&StreamEvent::error(error).to_json_line()?)?;
    writer.flush()?;
    Ok(())
}
