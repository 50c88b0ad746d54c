mod support;

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use relay_common::{FeedStatus, RelayError, StreamEvent};
use relay_server::Relay;
use relay_server::feed::FeedMessage;
use support::*;

#[test]
fn sessions_receive_only_their_symbols_in_feed_order() {
    init_logging();
    let (feed, connections, _script) = scripted_feed();
    let relay = Relay::start(feed, &test_config(16)).unwrap();

    let x = relay.open_session(set(&["ES.FUT"])).unwrap();
    let mut y = relay.open_session(set(&["ES.FUT", "NQ.FUT"])).unwrap();
    let upstream = wait_for_connection(&connections, &set(&["ES.FUT", "NQ.FUT"]));

    upstream.events.send(mbp1("ES.FUT", 1, 4500.25, 4500.50)).unwrap();
    upstream.events.send(mbp1("NQ.FUT", 2, 20000.00, 20000.25)).unwrap();

    let first = next_quote(&mut y);
    let second = next_quote(&mut y);
    assert_eq!((first.symbol.as_str(), first.bid_price, first.ask_price), ("ES.FUT", Some(4500.25), Some(4500.50)));
    assert_eq!((second.symbol.as_str(), second.bid_price, second.ask_price), ("NQ.FUT", Some(20000.00), Some(20000.25)));

    relay.shutdown();
    let x_quotes = remaining_quotes(x);
    assert_eq!(x_quotes.len(), 1);
    assert_eq!(x_quotes[0].symbol, "ES.FUT");
    assert!(remaining_quotes(y).is_empty());
}

#[test]
fn empty_symbol_set_is_rejected_without_touching_upstream() {
    init_logging();
    let (feed, connections, _script) = scripted_feed();
    let relay = Relay::start(feed, &test_config(16)).unwrap();

    assert!(matches!(
        relay.open_session(BTreeSet::new()),
        Err(RelayError::InvalidSubscription(_))
    ));
    assert!(relay.registry().desired_symbols().unwrap().is_empty());
    assert_eq!(relay.registry().session_count().unwrap(), 0);
    assert!(connections.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(relay.feed_status().unwrap(), FeedStatus::Idle);
}

#[test]
fn late_joiner_gets_snapshot_before_live_updates() {
    init_logging();
    let (feed, connections, _script) = scripted_feed();
    let relay = Relay::start(feed, &test_config(16)).unwrap();

    let mut early = relay.open_session(set(&["A", "B"])).unwrap();
    let upstream = wait_for_connection(&connections, &set(&["A", "B"]));
    upstream.events.send(mbp1("A", 1, 10.0, 10.5)).unwrap();
    upstream.events.send(mbp1("B", 1, 20.0, 20.5)).unwrap();
    next_quote(&mut early);
    next_quote(&mut early);

    let mut late = relay.open_session(set(&["A", "B", "C"])).unwrap();
    let snapshot: Vec<String> = (0..2)
        .map(|_| match late.next() {
            Some(StreamEvent::Quote(update)) => update.symbol,
            other => panic!("expected snapshot quote, got {:?}", other),
        })
        .collect();
    assert_eq!(snapshot, vec!["A".to_string(), "B".to_string()]);

    let upstream = wait_for_connection(&connections, &set(&["A", "B", "C"]));
    upstream.events.send(mbp1("C", 2, 30.0, 30.5)).unwrap();
    let live = next_quote(&mut late);
    assert_eq!(live.symbol, "C");
    assert_eq!(live.ts_event, 2);
}

#[test]
fn per_symbol_order_is_preserved() {
    init_logging();
    let (feed, connections, _script) = scripted_feed();
    let relay = Relay::start(feed, &test_config(512)).unwrap();

    let mut session = relay.open_session(set(&["ES.FUT"])).unwrap();
    let upstream = wait_for_connection(&connections, &set(&["ES.FUT"]));
    for ts in 1..=200u64 {
        upstream.events.send(mbp1("ES.FUT", ts, 4500.0 + ts as f64, 4501.0 + ts as f64)).unwrap();
    }
    let received: Vec<u64> = (0..200).map(|_| next_quote(&mut session).ts_event).collect();
    assert_eq!(received, (1..=200).collect::<Vec<_>>());
}

#[test]
fn saturated_session_does_not_block_healthy_one() {
    init_logging();
    let (feed, connections, _script) = scripted_feed();
    let relay = Relay::start(feed, &test_config(8)).unwrap();

    let slow = relay.open_session(set(&["ES.FUT"])).unwrap();
    let mut healthy = relay.open_session(set(&["ES.FUT"])).unwrap();
    let upstream = wait_for_connection(&connections, &set(&["ES.FUT"]));

    let (done_tx, done_rx) = unbounded();
    let reader = thread::spawn(move || {
        let mut seen = Vec::new();
        loop {
            let ts = next_quote(&mut healthy).ts_event;
            seen.push(ts);
            if ts == 500 {
                break;
            }
        }
        let _ = done_tx.send(seen);
    });

    for ts in 1..=500u64 {
        upstream.events.send(mbp1("ES.FUT", ts, 1.0, 2.0)).unwrap();
    }
    let seen = done_rx
        .recv_timeout(WAIT)
        .expect("healthy session starved by slow one");
    reader.join().unwrap();

    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(seen.last(), Some(&500));
    assert!(wait_until(|| slow.dropped() >= 492));
}

#[test]
fn reconnect_subscribes_to_union_of_sessions_live_at_reconnect() {
    init_logging();
    let (feed, connections, script) = scripted_feed();
    let mut config = test_config(64);
    config.feed.backoff_base = Duration::from_millis(100);
    config.feed.backoff_cap = Duration::from_millis(200);
    let relay = Relay::start(feed, &config).unwrap();

    let mut keeper = relay.open_session(set(&["ES.FUT"])).unwrap();
    let leaver = relay.open_session(set(&["GC.FUT"])).unwrap();
    let upstream = wait_for_connection(&connections, &set(&["ES.FUT", "GC.FUT"]));
    upstream.events.send(mbp1("ES.FUT", 1, 4500.0, 4500.25)).unwrap();
    next_quote(&mut keeper);

    script.failing_opens.store(usize::MAX, Ordering::SeqCst);
    upstream.events.send(FeedMessage::Disconnected("reset".to_string())).unwrap();
    assert!(wait_until(|| relay.feed_status().unwrap() == FeedStatus::Reconnecting));
    assert!(relay.table().get("ES.FUT").unwrap().is_some());

    let _joiner = relay.open_session(set(&["NQ.FUT"])).unwrap();
    drop(leaver);
    script.failing_opens.store(0, Ordering::SeqCst);

    let upstream = connections.recv_timeout(WAIT).expect("no reconnect");
    assert_eq!(upstream.symbols, set(&["ES.FUT", "NQ.FUT"]));
    assert!(wait_until(|| relay.feed_status().unwrap() == FeedStatus::Streaming));
    assert_eq!(relay.registry().desired_symbols().unwrap(), upstream.symbols);

    let mut saw_reconnecting = false;
    for event in keeper.by_ref() {
        match event {
            StreamEvent::Status { status: FeedStatus::Reconnecting, .. } => saw_reconnecting = true,
            StreamEvent::Status { status: FeedStatus::Streaming, .. } if saw_reconnecting => break,
            _ => {}
        }
    }
    assert!(saw_reconnecting);

    upstream.events.send(mbp1("ES.FUT", 2, 4500.5, 4500.75)).unwrap();
    assert_eq!(next_quote(&mut keeper).ts_event, 2);
}

#[test]
fn fatal_rejection_ends_every_session_with_error() {
    init_logging();
    let (feed, _connections, script) = scripted_feed();
    script.reject.store(true, Ordering::SeqCst);
    let relay = Relay::start(feed, &test_config(16)).unwrap();

    let mut session = relay.open_session(set(&["ES.FUT"])).unwrap();
    assert_eq!(session.next(), Some(StreamEvent::error("authentication failed")));
    assert_eq!(session.next(), None);

    assert!(wait_until(|| relay.feed_status().unwrap() == FeedStatus::Stopped));
    assert!(matches!(
        relay.open_session(set(&["NQ.FUT"])),
        Err(RelayError::FeedStopped(_))
    ));
}

#[test]
fn shutdown_interrupts_waiting_sessions() {
    init_logging();
    let (feed, connections, _script) = scripted_feed();
    let relay = Relay::start(feed, &test_config(16)).unwrap();

    let session = relay.open_session(set(&["CL.FUT"])).unwrap();
    wait_for_connection(&connections, &set(&["CL.FUT"]));
    let consumer = thread::spawn(move || session.collect::<Vec<_>>());
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    relay.shutdown();
    let events = consumer.join().unwrap();
    assert!(started.elapsed() < WAIT);
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Status { status: FeedStatus::Stopped, .. })
    ));
}

#[test]
fn unwanted_symbols_are_evicted_after_retention() {
    init_logging();
    let (feed, connections, _script) = scripted_feed();
    let mut config = test_config(16);
    config.feed.retention = Some(Duration::from_millis(50));
    config.feed.eviction_interval = Duration::from_millis(20);
    let relay = Relay::start(feed, &config).unwrap();

    let mut both = relay.open_session(set(&["ES.FUT", "CL.FUT"])).unwrap();
    let upstream = wait_for_connection(&connections, &set(&["CL.FUT", "ES.FUT"]));
    upstream.events.send(mbp1("ES.FUT", 1, 1.0, 2.0)).unwrap();
    upstream.events.send(mbp1("CL.FUT", 1, 75.0, 75.01)).unwrap();
    next_quote(&mut both);
    next_quote(&mut both);

    let _es_only = relay.open_session(set(&["ES.FUT"])).unwrap();
    drop(both);
    wait_for_connection(&connections, &set(&["ES.FUT"]));

    assert!(wait_until(|| relay.table().get("CL.FUT").unwrap().is_none()));
    assert!(relay.table().get("ES.FUT").unwrap().is_some());
}
