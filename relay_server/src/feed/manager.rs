//! Owner of the single upstream connection.
//!
//! `FeedManager` is the handle the rest of the process holds; the connection
//! itself lives on a dedicated worker thread that moves through
//! `Idle -> Streaming <-> Reconnecting -> Stopped`:
//!
//! - **Idle**: nothing is wanted; no connection is open.
//! - **Streaming**: records are normalized, written to the state table and
//!   routed to sessions. A change of desired symbols is applied in place when the
//!   connection supports it, otherwise the connection is reopened.
//! - **Reconnecting**: the connection failed; the worker waits out a jittered
//!   exponential backoff, then reopens with whatever symbols are desired by then.
//!   The state table keeps its (now stale) entries.
//! - **Stopped**: terminal. Reached on `stop()` (sessions end with a `stopped`
//!   status) or on a vendor rejection (sessions end with an error event).
//!
//! Every wait on the worker is a `select!` that also listens on the command
//! channel, so `stop()` takes effect while the worker is blocked.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, after, never, select, tick, unbounded};
use log::{debug, error, info, warn};
use relay_common::{FeedStatus, RelayError, Result};

use crate::feed::backoff::Backoff;
use crate::feed::{FeedError, FeedHandle, FeedMessage, LiveFeed, RawEvent};
use crate::normalizer::QuoteNormalizer;
use crate::registry::DesiredSymbolsSink;
use crate::router::FanoutRouter;
use crate::state_table::SymbolStateTable;

/// Default vendor dataset (CME Globex).
pub const DEFAULT_DATASET: &str = "GLBX.MDP3";
/// Default schema: market by price, top level.
pub const DEFAULT_SCHEMA: &str = "mbp-1";

/// Tunables of the feed worker.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Vendor dataset.
    pub dataset: String,
    /// Vendor schema.
    pub schema: String,
    /// First reconnect delay ceiling.
    pub backoff_base: Duration,
    /// Largest reconnect delay ceiling.
    pub backoff_cap: Duration,
    /// How long a symbol nobody wants keeps its state entry. `None` keeps it forever.
    pub retention: Option<Duration>,
    /// Period of the state table eviction sweep.
    pub eviction_interval: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            dataset: DEFAULT_DATASET.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            retention: Some(Duration::from_secs(600)),
            eviction_interval: Duration::from_secs(30),
        }
    }
}

enum FeedCommand {
    Desired(BTreeSet<String>),
    Stop,
}

/// Cloneable sender of desired-symbol changes; the registry's sink.
#[derive(Clone)]
pub struct FeedControl {
    commands: Sender<FeedCommand>,
}

impl DesiredSymbolsSink for FeedControl {
    fn update_desired_symbols(&self, symbols: BTreeSet<String>) -> Result<()> {
        self.commands
            .send(FeedCommand::Desired(symbols))
            .map_err(|e| RelayError::ChannelSend(format!("feed worker is gone: {}", e)))
    }
}

/// Handle to the upstream connection owner.
pub struct FeedManager {
    settings: FeedSettings,
    commands_tx: Sender<FeedCommand>,
    commands_rx: Option<Receiver<FeedCommand>>,
    status: Arc<RwLock<FeedStatus>>,
    worker: Option<JoinHandle<()>>,
}

impl FeedManager {
    /// Creates an idle manager; nothing connects until [`Self::start`].
    pub fn new(settings: FeedSettings) -> Self {
        let (commands_tx, commands_rx) = unbounded();
        Self {
            settings,
            commands_tx,
            commands_rx: Some(commands_rx),
            status: Arc::new(RwLock::new(FeedStatus::Idle)),
            worker: None,
        }
    }

    /// Sink for the subscription registry.
    pub fn control(&self) -> FeedControl {
        FeedControl {
            commands: self.commands_tx.clone(),
        }
    }

    /// Current worker state.
    pub fn status(&self) -> Result<FeedStatus> {
        Ok(*self.status.read()?)
    }

    /// Spawns the worker, connecting to `initial_symbols` if there are any.
    pub fn start<F: LiveFeed>(
        &mut self,
        feed: F,
        table: Arc<SymbolStateTable>,
        router: FanoutRouter,
        initial_symbols: BTreeSet<String>,
    ) -> Result<()> {
        let Some(commands) = self.commands_rx.take() else {
            return Err(RelayError::FeedLifecycle(
                "feed manager was already started or stopped".to_string(),
            ));
        };
        let worker = FeedWorker {
            feed,
            backoff: Backoff::new(self.settings.backoff_base, self.settings.backoff_cap),
            settings: self.settings.clone(),
            table,
            router,
            commands,
            status: Arc::clone(&self.status),
            desired: initial_symbols,
            normalizer: QuoteNormalizer::new(),
        };
        let handle = thread::Builder::new()
            .name("upstream-feed".to_string())
            .spawn(move || worker.run())?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Converge the upstream subscription to exactly `symbols`.
    pub fn update_desired_symbols(&self, symbols: BTreeSet<String>) -> Result<()> {
        self.control().update_desired_symbols(symbols)
    }

    /// Close the connection, stop reconnecting and wait for the worker to exit.
    pub fn stop(&mut self) {
        let _ = self.commands_tx.send(FeedCommand::Stop);
        match self.worker.take() {
            Some(worker) => {
                if worker.join().is_err() {
                    error!("Upstream feed worker panicked");
                }
            }
            None => {
                self.commands_rx = None;
                match self.status.write() {
                    Ok(mut status) => *status = FeedStatus::Stopped,
                    Err(e) => error!("Failed to record feed stop: {}", e),
                }
            }
        }
    }
}

impl Drop for FeedManager {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Shutdown {
    Requested,
    Rejected(String),
}

enum StreamEnd {
    Shutdown(Shutdown),
    Reopen,
    Disconnected(String),
}

struct FeedWorker<F: LiveFeed> {
    feed: F,
    settings: FeedSettings,
    backoff: Backoff,
    table: Arc<SymbolStateTable>,
    router: FanoutRouter,
    commands: Receiver<FeedCommand>,
    status: Arc<RwLock<FeedStatus>>,
    desired: BTreeSet<String>,
    normalizer: QuoteNormalizer,
}

impl<F: LiveFeed> FeedWorker<F> {
    fn run(mut self) {
        info!(
            "Upstream feed worker started ({} / {})",
            self.settings.dataset, self.settings.schema
        );
        let shutdown = self.drive();
        self.set_status(FeedStatus::Stopped);
        let notified = match shutdown {
            Shutdown::Requested => {
                info!("Upstream feed stopped");
                self.router.close_all()
            }
            Shutdown::Rejected(reason) => {
                error!("Upstream rejected the session, giving up: {}", reason);
                self.router.fail_all(&reason)
            }
        };
        if let Err(e) = notified {
            error!("Failed to notify sessions of feed stop: {}", e);
        }
    }

    fn drive(&mut self) -> Shutdown {
        loop {
            if self.desired.is_empty() {
                self.transition(FeedStatus::Idle);
                if let Some(shutdown) = self.wait_idle() {
                    return shutdown;
                }
                continue;
            }

            match self.feed.open(&self.settings.dataset, &self.settings.schema, &self.desired) {
                Ok(handle) => {
                    info!("Upstream connected for {} symbols", self.desired.len());
                    self.backoff.reset();
                    self.normalizer.reset();
                    self.transition(FeedStatus::Streaming);
                    match self.stream(handle) {
                        StreamEnd::Shutdown(shutdown) => return shutdown,
                        StreamEnd::Reopen => continue,
                        StreamEnd::Disconnected(reason) => {
                            warn!("Upstream disconnected: {}", reason);
                        }
                    }
                }
                Err(FeedError::Rejected(reason)) => return Shutdown::Rejected(reason),
                Err(e) => warn!("Upstream connect failed: {}", e),
            }

            self.transition(FeedStatus::Reconnecting);
            if let Some(shutdown) = self.wait_backoff() {
                return shutdown;
            }
        }
    }

    fn stream(&mut self, mut handle: F::Handle) -> StreamEnd {
        let commands = self.commands.clone();
        let events = handle.events().clone();
        let sweep = self.sweep_ticker();

        let end = loop {
            select! {
                recv(commands) -> command => match command {
                    Ok(FeedCommand::Desired(symbols)) => {
                        if symbols == self.desired {
                            continue;
                        }
                        self.desired = symbols;
                        if self.desired.is_empty() {
                            break StreamEnd::Reopen;
                        }
                        match handle.update_symbols(&self.desired) {
                            Ok(()) => info!("Upstream resubscribed to {} symbols", self.desired.len()),
                            Err(FeedError::Rejected(reason)) => {
                                break StreamEnd::Shutdown(Shutdown::Rejected(reason));
                            }
                            Err(e) => {
                                debug!("Reopening upstream for new symbol set: {}", e);
                                break StreamEnd::Reopen;
                            }
                        }
                    }
                    Ok(FeedCommand::Stop) | Err(_) => break StreamEnd::Shutdown(Shutdown::Requested),
                },
                recv(events) -> message => match message {
                    Ok(FeedMessage::Record(raw)) => self.handle_record(&raw),
                    Ok(FeedMessage::Disconnected(reason)) => break StreamEnd::Disconnected(reason),
                    Ok(FeedMessage::Rejected(reason)) => {
                        break StreamEnd::Shutdown(Shutdown::Rejected(reason));
                    }
                    Err(_) => break StreamEnd::Disconnected("event stream closed".to_string()),
                },
                recv(sweep) -> _ => self.sweep(),
            }
        };
        handle.close();
        end
    }

    fn wait_idle(&mut self) -> Option<Shutdown> {
        let commands = self.commands.clone();
        let sweep = self.sweep_ticker();
        loop {
            select! {
                recv(commands) -> command => match command {
                    Ok(FeedCommand::Desired(symbols)) => {
                        self.desired = symbols;
                        if !self.desired.is_empty() {
                            return None;
                        }
                    }
                    Ok(FeedCommand::Stop) | Err(_) => return Some(Shutdown::Requested),
                },
                recv(sweep) -> _ => self.sweep(),
            }
        }
    }

    fn wait_backoff(&mut self) -> Option<Shutdown> {
        let delay = self.backoff.next_delay();
        info!(
            "Reconnecting upstream in {:?} (attempt {})",
            delay,
            self.backoff.attempt()
        );
        let commands = self.commands.clone();
        let deadline = after(delay);
        loop {
            select! {
                recv(commands) -> command => match command {
                    Ok(FeedCommand::Desired(symbols)) => self.desired = symbols,
                    Ok(FeedCommand::Stop) | Err(_) => return Some(Shutdown::Requested),
                },
                recv(deadline) -> _ => return None,
            }
        }
    }

    fn handle_record(&mut self, raw: &RawEvent) {
        let Some(update) = self.normalizer.normalize(raw) else {
            return;
        };
        if let Err(e) = self.table.upsert(update.clone()) {
            error!("Failed to store {} in state table: {}", update.symbol, e);
        }
        if let Err(e) = self.router.route(&update) {
            error!("Failed to route {}: {}", update.symbol, e);
        }
    }

    fn sweep_ticker(&self) -> Receiver<Instant> {
        match self.settings.retention {
            Some(_) => tick(self.settings.eviction_interval.max(Duration::from_millis(10))),
            None => never(),
        }
    }

    fn sweep(&mut self) {
        let Some(retention) = self.settings.retention else {
            return;
        };
        match self.table.evict_unwanted(&self.desired, retention, Instant::now()) {
            Ok(evicted) if !evicted.is_empty() => {
                info!("Evicted {} idle symbols from state table: {:?}", evicted.len(), evicted)
            }
            Ok(_) => {}
            Err(e) => error!("State table sweep failed: {}", e),
        }
    }

    fn set_status(&self, next: FeedStatus) -> Option<FeedStatus> {
        match self.status.write() {
            Ok(mut status) => Some(std::mem::replace(&mut *status, next)),
            Err(e) => {
                error!("Failed to record feed status {}: {}", next, e);
                None
            }
        }
    }

    fn transition(&mut self, next: FeedStatus) {
        match self.set_status(next) {
            Some(previous) if previous != next => {
                info!("Upstream feed {} -> {}", previous, next);
                if let Err(e) = self.router.broadcast_status(next) {
                    error!("Failed to broadcast feed status: {}", e);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::simulated::SimulatedFeed;
    use crate::registry::SubscriptionRegistry;
    use crate::registry::tests::RecordingSink;

    fn router() -> (Arc<SymbolStateTable>, Arc<SubscriptionRegistry>, FanoutRouter) {
        let table = Arc::new(SymbolStateTable::new());
        let registry = Arc::new(SubscriptionRegistry::new(
            Arc::clone(&table),
            Arc::new(RecordingSink::default()),
            8,
        ));
        let router = FanoutRouter::new(Arc::clone(&registry));
        (table, registry, router)
    }

    fn wait_for_status(manager: &FeedManager, wanted: FeedStatus) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if manager.status().unwrap() == wanted {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn stop_before_start_is_terminal() {
        let mut manager = FeedManager::new(FeedSettings::default());
        manager.stop();
        assert_eq!(manager.status().unwrap(), FeedStatus::Stopped);
        let (table, _registry, router) = router();
        let feed = SimulatedFeed::new("key", Duration::from_millis(10));
        assert!(matches!(
            manager.start(feed, table, router, BTreeSet::new()),
            Err(RelayError::FeedLifecycle(_))
        ));
    }

    #[test]
    fn idle_worker_stops_promptly() {
        let mut manager = FeedManager::new(FeedSettings::default());
        let (table, _registry, router) = router();
        let feed = SimulatedFeed::new("key", Duration::from_millis(10));
        manager.start(feed, table, router, BTreeSet::new()).unwrap();
        assert_eq!(manager.status().unwrap(), FeedStatus::Idle);

        let started = Instant::now();
        manager.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(manager.status().unwrap(), FeedStatus::Stopped);
    }

    #[test]
    fn streams_simulated_quotes_into_state_table() {
        let mut manager = FeedManager::new(FeedSettings::default());
        let (table, _registry, router) = router();
        let feed = SimulatedFeed::new("key", Duration::from_millis(5));
        let symbols: BTreeSet<String> = ["ES.FUT".to_string()].into_iter().collect();
        manager.start(feed, Arc::clone(&table), router, symbols).unwrap();
        assert!(wait_for_status(&manager, FeedStatus::Streaming));

        let deadline = Instant::now() + Duration::from_secs(5);
        while table.get("ES.FUT").unwrap().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let quote = table.get("ES.FUT").unwrap().expect("simulated quote");
        assert!(quote.bid_price.unwrap() < quote.ask_price.unwrap());
        manager.stop();
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let mut manager = FeedManager::new(FeedSettings::default());
        let (table, registry, router) = router();
        let feed = SimulatedFeed::new("", Duration::from_millis(10));
        let symbols: BTreeSet<String> = ["NQ.FUT".to_string()].into_iter().collect();
        manager.start(feed, table, router, symbols).unwrap();

        assert!(wait_for_status(&manager, FeedStatus::Stopped));
        let deadline = Instant::now() + Duration::from_secs(5);
        while registry.feed_status().unwrap() != FeedStatus::Stopped && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(registry.feed_status().unwrap(), FeedStatus::Stopped);
    }
}
