//! Shared fixtures: a scriptable upstream feed and small helpers.
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use relay_common::{QuoteUpdate, StreamEvent};
use relay_server::config::RelayConfig;
use relay_server::feed::{FeedError, FeedHandle, FeedMessage, LiveFeed, RawEvent};
use relay_server::session::SessionStream;
use serde_json::json;

pub const WAIT: Duration = Duration::from_secs(10);

/// One upstream connection opened by the relay.
pub struct Connection {
    pub symbols: BTreeSet<String>,
    pub events: Sender<FeedMessage>,
}

/// Knobs the test flips while the relay runs.
#[derive(Clone, Default)]
pub struct FeedScript {
    pub failing_opens: Arc<AtomicUsize>,
    pub reject: Arc<AtomicBool>,
}

pub struct ScriptedFeed {
    connections: Sender<Connection>,
    script: FeedScript,
}

pub struct ScriptedHandle {
    events: Receiver<FeedMessage>,
}

impl FeedHandle for ScriptedHandle {
    fn events(&self) -> &Receiver<FeedMessage> {
        &self.events
    }

    fn close(&mut self) {}
}

impl LiveFeed for ScriptedFeed {
    type Handle = ScriptedHandle;

    fn open(
        &mut self,
        _dataset: &str,
        _schema: &str,
        symbols: &BTreeSet<String>,
    ) -> Result<ScriptedHandle, FeedError> {
        if self.script.reject.load(Ordering::SeqCst) {
            return Err(FeedError::Rejected("authentication failed".to_string()));
        }
        let failed = self
            .script
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(FeedError::Disconnected("connection refused".to_string()));
        }
        let (tx, rx) = unbounded();
        let _ = self.connections.send(Connection {
            symbols: symbols.clone(),
            events: tx,
        });
        Ok(ScriptedHandle { events: rx })
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn scripted_feed() -> (ScriptedFeed, Receiver<Connection>, FeedScript) {
    let (connections_tx, connections_rx) = unbounded();
    let script = FeedScript::default();
    let feed = ScriptedFeed {
        connections: connections_tx,
        script: script.clone(),
    };
    (feed, connections_rx, script)
}

pub fn test_config(queue_capacity: usize) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.queue_capacity = queue_capacity;
    config.feed.backoff_base = Duration::from_millis(20);
    config.feed.backoff_cap = Duration::from_millis(100);
    config
}

pub fn set(symbols: &[&str]) -> BTreeSet<String> {
    symbols.iter().map(|s| s.to_string()).collect()
}

pub fn mbp1(symbol: &str, ts_event: u64, bid: f64, ask: f64) -> FeedMessage {
    FeedMessage::Record(RawEvent::new(
        "MBP1Msg",
        json!({
            "symbol": symbol,
            "ts_event": ts_event,
            "levels": [{"bid_px": bid, "ask_px": ask, "bid_sz": 1, "ask_sz": 1}],
        }),
    ))
}

/// Waits for the relay to open a connection for exactly `expected`.
pub fn wait_for_connection(connections: &Receiver<Connection>, expected: &BTreeSet<String>) -> Connection {
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match connections.recv_timeout(remaining) {
            Ok(connection) if &connection.symbols == expected => return connection,
            Ok(_) => continue,
            Err(_) => panic!("no upstream connection for {:?}", expected),
        }
    }
}

pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Next price event, skipping status notifications.
pub fn next_quote(stream: &mut SessionStream) -> QuoteUpdate {
    for event in stream.by_ref() {
        match event {
            StreamEvent::Quote(update) => return update,
            StreamEvent::Status { .. } => continue,
            StreamEvent::Error { error } => panic!("unexpected error event: {}", error),
        }
    }
    panic!("session ended before a quote arrived");
}

/// All price events left in a finished stream.
pub fn remaining_quotes(stream: SessionStream) -> Vec<QuoteUpdate> {
    stream
        .filter_map(|event| match event {
            StreamEvent::Quote(update) => Some(update),
            _ => None,
        })
        .collect()
}
