//! Process-scoped wiring of the relay components.
//!
//! `Relay::start` builds the state table, registry, router and feed manager and
//! starts the feed worker; dropping the `Relay` (or calling `shutdown`) stops the
//! upstream connection and ends every session.

use std::collections::BTreeSet;
use std::sync::Arc;

use relay_common::{FeedStatus, Result};

use crate::config::RelayConfig;
use crate::feed::LiveFeed;
use crate::feed::manager::FeedManager;
use crate::registry::SubscriptionRegistry;
use crate::router::FanoutRouter;
use crate::session::SessionStream;
use crate::state_table::SymbolStateTable;

/// A running relay.
pub struct Relay {
    table: Arc<SymbolStateTable>,
    registry: Arc<SubscriptionRegistry>,
    feed: FeedManager,
}

impl Relay {
    /// Wire the components together and start streaming from `feed`.
    pub fn start<F: LiveFeed>(feed: F, config: &RelayConfig) -> Result<Self> {
        let table = Arc::new(SymbolStateTable::new());
        let mut manager = FeedManager::new(config.feed.clone());
        let registry = Arc::new(SubscriptionRegistry::new(
            Arc::clone(&table),
            Arc::new(manager.control()),
            config.queue_capacity,
        ));
        let router = FanoutRouter::new(Arc::clone(&registry));
        manager.start(feed, Arc::clone(&table), router, registry.desired_symbols()?)?;

        Ok(Self {
            table,
            registry,
            feed: manager,
        })
    }

    /// Open a subscriber session for `symbols`.
    pub fn open_session(&self, symbols: BTreeSet<String>) -> Result<SessionStream> {
        SessionStream::open(&self.registry, symbols)
    }

    /// Subscription registry, for transports that open sessions themselves.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Last-known quotes.
    pub fn table(&self) -> &Arc<SymbolStateTable> {
        &self.table
    }

    /// Upstream connection state.
    pub fn feed_status(&self) -> Result<FeedStatus> {
        self.feed.status()
    }

    /// Stop the upstream connection; open sessions end with a `stopped` status.
    pub fn shutdown(mut self) {
        self.feed.stop();
    }
}
