//! Fan-out of normalized updates to subscriber queues.
//!
//! The registry lock is only held while collecting the target queues; each push
//! happens after it is released and never blocks, so a stalled session cannot
//! hold up the others.

use std::sync::Arc;

use log::{debug, info};
use relay_common::{FeedStatus, QuoteUpdate, Result, StreamEvent};

use crate::queue::PushOutcome;
use crate::registry::SubscriptionRegistry;

/// Per-update delivery tally.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouteReport {
    /// Sessions the update was queued for.
    pub delivered: usize,
    /// Of those, sessions that had to discard an older event.
    pub dropped_oldest: usize,
    /// Matching sessions that were already closing.
    pub closed: usize,
}

/// Stateless router over the subscription registry.
#[derive(Clone)]
pub struct FanoutRouter {
    registry: Arc<SubscriptionRegistry>,
}

impl FanoutRouter {
    /// Creates a router delivering to the sessions of `registry`.
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    /// Queue `update` for every session subscribed to its symbol.
    pub fn route(&self, update: &QuoteUpdate) -> Result<RouteReport> {
        let targets = self.registry.sessions_for(&update.symbol)?;
        let mut report = RouteReport::default();
        for queue in targets {
            match queue.push(StreamEvent::Quote(update.clone())) {
                PushOutcome::Enqueued => report.delivered += 1,
                PushOutcome::DroppedOldest => {
                    report.delivered += 1;
                    report.dropped_oldest += 1;
                }
                PushOutcome::Closed => report.closed += 1,
            }
        }
        if report.dropped_oldest > 0 {
            debug!(
                "{}: {} slow sessions dropped their oldest update",
                update.symbol, report.dropped_oldest
            );
        }
        Ok(report)
    }

    /// Tell every live session the upstream changed state.
    pub fn broadcast_status(&self, status: FeedStatus) -> Result<usize> {
        let targets = self.registry.set_feed_status(status)?;
        let event = StreamEvent::status(status);
        Ok(targets
            .iter()
            .filter(|queue| queue.push(event.clone()) != PushOutcome::Closed)
            .count())
    }

    /// Upstream refused us for good: every session gets `reason` as its final event.
    pub fn fail_all(&self, reason: &str) -> Result<usize> {
        let targets = self.registry.set_feed_status(FeedStatus::Stopped)?;
        let event = StreamEvent::error(reason);
        let notified = targets
            .iter()
            .filter(|queue| queue.seal_with(event.clone()) != PushOutcome::Closed)
            .count();
        info!("Upstream rejected; notified {} sessions", notified);
        Ok(notified)
    }

    /// Orderly stop: every session ends after a final `stopped` status.
    pub fn close_all(&self) -> Result<usize> {
        let targets = self.registry.set_feed_status(FeedStatus::Stopped)?;
        let event = StreamEvent::status(FeedStatus::Stopped);
        Ok(targets
            .iter()
            .filter(|queue| queue.seal_with(event.clone()) != PushOutcome::Closed)
            .count())
    }
}
