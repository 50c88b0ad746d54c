//! Live subscriptions and the desired symbol union.
//!
//! Every join and leave takes the registry lock, updates the symbol index,
//! recomputes the union and, when it changed, hands the new union to the
//! `DesiredSymbolsSink` before releasing the lock. That lock is the single point
//! that orders union updates. New sessions read their snapshot under the same
//! lock, so a snapshot can never be newer than a live update still on its way to
//! that session.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use relay_common::{FeedStatus, QuoteUpdate, RelayError, Result};

use crate::queue::SessionQueue;
use crate::state_table::SymbolStateTable;

/// Identifier of a subscriber session.
pub type SessionId = u64;

/// Receives the desired symbol union whenever it changes.
pub trait DesiredSymbolsSink: Send + Sync {
    /// Called with the new union, in change order.
    fn update_desired_symbols(&self, symbols: BTreeSet<String>) -> Result<()>;
}

/// A registered session.
pub struct Subscription {
    /// Session identifier.
    pub session_id: SessionId,
    /// Symbols the session receives; fixed for its lifetime.
    pub symbols: BTreeSet<String>,
    /// The session's private queue.
    pub queue: Arc<SessionQueue>,
    /// Last-known quotes for `symbols` at join time.
    pub snapshot: Vec<QuoteUpdate>,
    /// Upstream state at join time.
    pub feed_status: FeedStatus,
}

struct Registered {
    symbols: BTreeSet<String>,
    queue: Arc<SessionQueue>,
}

struct RegistryInner {
    sessions: HashMap<SessionId, Registered>,
    by_symbol: HashMap<String, HashMap<SessionId, Arc<SessionQueue>>>,
    union: BTreeSet<String>,
    feed_status: FeedStatus,
}

/// Session -> wanted symbols, plus the reverse index the router reads.
pub struct SubscriptionRegistry {
    inner: Mutex<RegistryInner>,
    next_id: AtomicU64,
    table: Arc<SymbolStateTable>,
    sink: Arc<dyn DesiredSymbolsSink>,
    queue_capacity: usize,
}

impl SubscriptionRegistry {
    /// Creates an empty registry. Each session gets a queue of `queue_capacity`.
    pub fn new(
        table: Arc<SymbolStateTable>,
        sink: Arc<dyn DesiredSymbolsSink>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                sessions: HashMap::new(),
                by_symbol: HashMap::new(),
                union: BTreeSet::new(),
                feed_status: FeedStatus::Idle,
            }),
            next_id: AtomicU64::new(1),
            table,
            sink,
            queue_capacity,
        }
    }

    /// Allocates a fresh session identifier.
    pub fn next_session_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers `session_id` for `symbols` and returns its queue and snapshot.
    pub fn join(&self, session_id: SessionId, symbols: BTreeSet<String>) -> Result<Subscription> {
        if symbols.is_empty() {
            return Err(RelayError::InvalidSubscription(
                "no symbols requested".to_string(),
            ));
        }

        let mut inner = self.inner.lock()?;
        if inner.feed_status == FeedStatus::Stopped {
            return Err(RelayError::FeedStopped(
                "the upstream feed is no longer running".to_string(),
            ));
        }
        if inner.sessions.contains_key(&session_id) {
            return Err(RelayError::Format(format!(
                "session {} is already registered",
                session_id
            )));
        }

        let queue = Arc::new(SessionQueue::new(self.queue_capacity));
        for symbol in &symbols {
            inner
                .by_symbol
                .entry(symbol.clone())
                .or_default()
                .insert(session_id, Arc::clone(&queue));
        }
        inner.sessions.insert(
            session_id,
            Registered {
                symbols: symbols.clone(),
                queue: Arc::clone(&queue),
            },
        );

        let snapshot = self.table.snapshot(&symbols)?;
        let feed_status = inner.feed_status;
        self.publish_union(&mut inner);
        info!(
            "Session {} joined for {:?} ({} live sessions)",
            session_id,
            symbols,
            inner.sessions.len()
        );

        Ok(Subscription {
            session_id,
            symbols,
            queue,
            snapshot,
            feed_status,
        })
    }

    /// Removes `session_id` and closes its queue. Returns `false` if it was not registered.
    pub fn leave(&self, session_id: SessionId) -> Result<bool> {
        let mut inner = self.inner.lock()?;
        let Some(registered) = inner.sessions.remove(&session_id) else {
            return Ok(false);
        };
        registered.queue.close();

        for symbol in &registered.symbols {
            if let Some(sessions) = inner.by_symbol.get_mut(symbol) {
                sessions.remove(&session_id);
                if sessions.is_empty() {
                    inner.by_symbol.remove(symbol);
                }
            }
        }
        self.publish_union(&mut inner);
        info!(
            "Session {} left ({} live sessions)",
            session_id,
            inner.sessions.len()
        );
        Ok(true)
    }

    fn publish_union(&self, inner: &mut RegistryInner) {
        let union: BTreeSet<String> = inner.by_symbol.keys().cloned().collect();
        if union == inner.union {
            return;
        }
        debug!("Desired symbols changed: {:?} -> {:?}", inner.union, union);
        inner.union = union.clone();
        if inner.feed_status == FeedStatus::Stopped {
            return;
        }
        if let Err(e) = self.sink.update_desired_symbols(union) {
            warn!("Failed to forward desired symbols upstream: {}", e);
        }
    }

    /// Queues of the sessions that want `symbol`.
    pub fn sessions_for(&self, symbol: &str) -> Result<Vec<Arc<SessionQueue>>> {
        let inner = self.inner.lock()?;
        Ok(inner
            .by_symbol
            .get(symbol)
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Records the upstream state and returns every live session's queue, so the
    /// caller can notify them. Sessions joining afterwards see the new state.
    pub fn set_feed_status(&self, status: FeedStatus) -> Result<Vec<Arc<SessionQueue>>> {
        let mut inner = self.inner.lock()?;
        inner.feed_status = status;
        Ok(inner
            .sessions
            .values()
            .map(|registered| Arc::clone(&registered.queue))
            .collect())
    }

    /// Upstream state as last recorded.
    pub fn feed_status(&self) -> Result<FeedStatus> {
        Ok(self.inner.lock()?.feed_status)
    }

    /// Union of all live sessions' symbols.
    pub fn desired_symbols(&self) -> Result<BTreeSet<String>> {
        Ok(self.inner.lock()?.union.clone())
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> Result<usize> {
        Ok(self.inner.lock()?.sessions.len())
    }
}
