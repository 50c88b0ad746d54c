//! Bounded per-session delivery queue.
//!
//! The router is the only producer and never waits on a consumer: when the
//! queue is full the oldest event is discarded to make room, and the drop is
//! counted. The queue keeps a receiver clone for that eviction, so its channel
//! never disconnects; closing is signalled on a separate channel that wakes a
//! consumer blocked in [`SessionQueue::recv`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};
use relay_common::StreamEvent;

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Stored without loss.
    Enqueued,
    /// Stored after evicting one or more older events.
    DroppedOldest,
    /// The session is closed or already received its final event.
    Closed,
}

/// Drop-oldest queue owned by one subscriber session.
pub struct SessionQueue {
    tx: Sender<StreamEvent>,
    rx: Receiver<StreamEvent>,
    close_tx: Sender<()>,
    close_rx: Receiver<()>,
    closed: AtomicBool,
    sealed: AtomicBool,
    dropped: AtomicU64,
    capacity: usize,
}

impl SessionQueue {
    /// Creates a queue holding at most `capacity` events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        let (close_tx, close_rx) = bounded(1);
        Self {
            tx,
            rx,
            close_tx,
            close_rx,
            closed: AtomicBool::new(false),
            sealed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            capacity,
        }
    }

    /// Enqueue without blocking, evicting the oldest event if full.
    pub fn push(&self, event: StreamEvent) -> PushOutcome {
        if self.closed.load(Ordering::Acquire) || self.sealed.load(Ordering::Acquire) {
            return PushOutcome::Closed;
        }
        self.force_push(event)
    }

    /// Enqueue a final event; later pushes are refused.
    pub fn seal_with(&self, event: StreamEvent) -> PushOutcome {
        if self.closed.load(Ordering::Acquire) || self.sealed.swap(true, Ordering::AcqRel) {
            return PushOutcome::Closed;
        }
        self.force_push(event)
    }

    fn force_push(&self, mut event: StreamEvent) -> PushOutcome {
        let mut outcome = PushOutcome::Enqueued;
        loop {
            match self.tx.try_send(event) {
                Ok(()) => return outcome,
                Err(TrySendError::Full(returned)) => {
                    if self.rx.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        outcome = PushOutcome::DroppedOldest;
                    }
                    event = returned;
                }
                Err(TrySendError::Disconnected(_)) => return PushOutcome::Closed,
            }
        }
    }

    /// Next event; blocks until one arrives or the queue is closed.
    pub fn recv(&self) -> Option<StreamEvent> {
        if self.is_closed() {
            return None;
        }
        select! {
            recv(self.rx) -> event => event.ok(),
            recv(self.close_rx) -> _ => None,
        }
    }

    /// Close the queue and wake a blocked consumer. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.close_tx.try_send(());
        }
    }

    /// `true` once [`Self::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Events discarded so far because the consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Events currently waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// `true` if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Maximum number of waiting events.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_common::{FeedStatus, QuoteUpdate};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn quote(ts: u64) -> StreamEvent {
        StreamEvent::Quote(QuoteUpdate::new("ES.FUT", ts, Some(ts as f64), None))
    }

    fn ts_of(event: StreamEvent) -> u64 {
        match event {
            StreamEvent::Quote(update) => update.ts_event,
            other => panic!("expected quote, got {:?}", other),
        }
    }

    #[test]
    fn full_queue_drops_oldest_and_counts() {
        let queue = SessionQueue::new(3);
        for ts in 1..=3 {
            assert_eq!(queue.push(quote(ts)), PushOutcome::Enqueued);
        }
        assert_eq!(queue.push(quote(4)), PushOutcome::DroppedOldest);
        assert_eq!(queue.push(quote(5)), PushOutcome::DroppedOldest);
        assert_eq!(queue.dropped(), 2);
        assert_eq!(queue.len(), 3);

        let kept: Vec<u64> = (0..3).map(|_| ts_of(queue.recv().unwrap())).collect();
        assert_eq!(kept, vec![3, 4, 5]);
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue = Arc::new(SessionQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let started = Instant::now();
                let event = queue.recv();
                (event, started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(50));
        queue.close();
        let (event, waited) = consumer.join().unwrap();
        assert!(event.is_none());
        assert!(waited < Duration::from_secs(5));
        assert_eq!(queue.push(quote(1)), PushOutcome::Closed);
    }

    #[test]
    fn sealed_queue_keeps_final_event_and_refuses_more() {
        let queue = SessionQueue::new(2);
        queue.push(quote(1));
        queue.push(quote(2));
        assert_eq!(
            queue.seal_with(StreamEvent::status(FeedStatus::Stopped)),
            PushOutcome::DroppedOldest
        );
        assert_eq!(queue.push(quote(3)), PushOutcome::Closed);
        assert_eq!(queue.seal_with(StreamEvent::error("again")), PushOutcome::Closed);

        assert_eq!(ts_of(queue.recv().unwrap()), 2);
        assert!(matches!(
            queue.recv(),
            Some(StreamEvent::Status { status: FeedStatus::Stopped, .. })
        ));
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let queue = SessionQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.push(quote(1));
        assert_eq!(queue.push(quote(2)), PushOutcome::DroppedOldest);
        assert_eq!(ts_of(queue.recv().unwrap()), 2);
    }
}
