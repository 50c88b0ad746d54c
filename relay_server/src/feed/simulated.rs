//! In-process stand-in for the vendor live feed.
//!
//! Each opened connection runs a generator thread that first announces a
//! `SymbolMappingMsg` per symbol, then on every tick emits one `MBP1Msg` per
//! symbol keyed by `instrument_id` only, with fixed-point prices following a
//! small random walk around the contract's reference price. Connections accept
//! incremental resubscription. An empty API key is rejected like a failed
//! authentication.

use std::collections::{BTreeMap, BTreeSet};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select, tick, unbounded};
use log::{debug, info};
use rand::Rng;
use relay_common::symbols::CatalogSymbol;
use serde_json::json;

use crate::feed::{FeedError, FeedHandle, FeedMessage, LiveFeed, RawEvent};
use crate::normalizer::FIXED_PRICE_SCALE;

/// Records buffered per connection before the generator starts skipping ticks.
const EVENT_BUFFER: usize = 4096;
/// A consumer that cannot take a mapping record within this long is treated as gone.
const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(1);

/// Simulated vendor.
pub struct SimulatedFeed {
    api_key: String,
    tick_interval: Duration,
    disconnect_after: Option<u64>,
}

impl SimulatedFeed {
    /// Creates a feed that ticks every `tick_interval`.
    pub fn new(api_key: &str, tick_interval: Duration) -> Self {
        Self {
            api_key: api_key.to_string(),
            tick_interval,
            disconnect_after: None,
        }
    }

    /// Drop every connection after it has emitted `ticks` rounds of quotes.
    pub fn with_disconnect_after(mut self, ticks: u64) -> Self {
        self.disconnect_after = Some(ticks);
        self
    }
}

impl LiveFeed for SimulatedFeed {
    type Handle = SimulatedHandle;

    fn open(
        &mut self,
        dataset: &str,
        schema: &str,
        symbols: &BTreeSet<String>,
    ) -> Result<SimulatedHandle, FeedError> {
        if self.api_key.trim().is_empty() {
            return Err(FeedError::Rejected(
                "authentication failed: no API key configured".to_string(),
            ));
        }

        let (events_tx, events_rx) = bounded(EVENT_BUFFER);
        let (control_tx, control_rx) = unbounded();
        let mut generator = MarketGenerator::new(self.tick_interval, self.disconnect_after);
        generator.resubscribe(symbols);

        let worker = thread::Builder::new()
            .name("simulated-feed".to_string())
            .spawn(move || generator.run(events_tx, control_rx))
            .map_err(|e| FeedError::Disconnected(e.to_string()))?;

        info!(
            "Simulated {} / {} session opened for {} symbols",
            dataset,
            schema,
            symbols.len()
        );
        Ok(SimulatedHandle {
            events: events_rx,
            control: control_tx,
            worker: Some(worker),
        })
    }
}

enum GeneratorControl {
    Symbols(BTreeSet<String>),
    Close,
}

/// Open simulated connection.
pub struct SimulatedHandle {
    events: Receiver<FeedMessage>,
    control: Sender<GeneratorControl>,
    worker: Option<JoinHandle<()>>,
}

impl FeedHandle for SimulatedHandle {
    fn events(&self) -> &Receiver<FeedMessage> {
        &self.events
    }

    fn update_symbols(&mut self, symbols: &BTreeSet<String>) -> Result<(), FeedError> {
        self.control
            .send(GeneratorControl::Symbols(symbols.clone()))
            .map_err(|_| FeedError::Disconnected("simulated session already ended".to_string()))
    }

    fn close(&mut self) {
        let _ = self.control.send(GeneratorControl::Close);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for SimulatedHandle {
    fn drop(&mut self) {
        self.close();
    }
}

struct SimBook {
    instrument_id: u64,
    mid: f64,
    tick_size: f64,
    announced: bool,
}

struct MarketGenerator {
    books: BTreeMap<String, SimBook>,
    next_instrument_id: u64,
    tick_interval: Duration,
    disconnect_after: Option<u64>,
    rounds: u64,
}

impl MarketGenerator {
    fn new(tick_interval: Duration, disconnect_after: Option<u64>) -> Self {
        Self {
            books: BTreeMap::new(),
            next_instrument_id: 1,
            tick_interval,
            disconnect_after,
            rounds: 0,
        }
    }

    fn resubscribe(&mut self, symbols: &BTreeSet<String>) {
        self.books.retain(|symbol, _| symbols.contains(symbol));
        for symbol in symbols {
            if self.books.contains_key(symbol) {
                continue;
            }
            let (mid, tick_size) = match symbol.parse::<CatalogSymbol>() {
                Ok(contract) => (contract.reference_price(), contract.tick_size()),
                Err(_) => (100.0, 0.01),
            };
            let instrument_id = self.next_instrument_id;
            self.next_instrument_id += 1;
            self.books.insert(
                symbol.clone(),
                SimBook {
                    instrument_id,
                    mid,
                    tick_size,
                    announced: false,
                },
            );
        }
    }

    fn run(mut self, events: Sender<FeedMessage>, control: Receiver<GeneratorControl>) {
        let ticker = tick(self.tick_interval);
        loop {
            if !self.announce(&events) {
                return;
            }
            select! {
                recv(control) -> message => match message {
                    Ok(GeneratorControl::Symbols(symbols)) => self.resubscribe(&symbols),
                    Ok(GeneratorControl::Close) | Err(_) => return,
                },
                recv(ticker) -> _ => {
                    if !self.emit_round(&events) {
                        return;
                    }
                    self.rounds += 1;
                    if self.disconnect_after.is_some_and(|limit| self.rounds >= limit) {
                        let _ = events.try_send(FeedMessage::Disconnected(
                            "simulated connection reset".to_string(),
                        ));
                        return;
                    }
                }
            }
        }
    }

    /// Sends mapping records for books not yet announced. `false` once the consumer is gone.
    fn announce(&mut self, events: &Sender<FeedMessage>) -> bool {
        for (symbol, book) in self.books.iter_mut().filter(|(_, book)| !book.announced) {
            let mapping = RawEvent::new(
                "SymbolMappingMsg",
                json!({
                    "instrument_id": book.instrument_id,
                    "stype_in_symbol": symbol,
                    "stype_out_symbol": format!("{}Z6", symbol.trim_end_matches(".FUT")),
                }),
            );
            if events
                .send_timeout(FeedMessage::Record(mapping), ANNOUNCE_TIMEOUT)
                .is_err()
            {
                return false;
            }
            book.announced = true;
        }
        true
    }

    fn emit_round(&mut self, events: &Sender<FeedMessage>) -> bool {
        let mut rng = rand::rng();
        for book in self.books.values_mut() {
            let change: f64 = rng.random_range(-0.0005..0.0005);
            book.mid = (book.mid * (1.0 + change)).max(book.tick_size);
            let bid = (book.mid / book.tick_size).floor() * book.tick_size;
            let ask = bid + book.tick_size;

            let record = RawEvent::new(
                "MBP1Msg",
                json!({
                    "hd": {
                        "instrument_id": book.instrument_id,
                        "ts_event": Utc::now().timestamp_nanos_opt().unwrap_or_default(),
                    },
                    "levels": [{
                        "bid_px": (bid * FIXED_PRICE_SCALE).round() as i64,
                        "ask_px": (ask * FIXED_PRICE_SCALE).round() as i64,
                        "bid_sz": rng.random_range(1..200u32),
                        "ask_sz": rng.random_range(1..200u32),
                    }],
                }),
            );
            match events.try_send(FeedMessage::Record(record)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => debug!("Simulated feed buffer full, skipping tick"),
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
        true
    }
}
