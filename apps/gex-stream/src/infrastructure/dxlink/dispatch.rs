//! Event Dispatch
//!
//! Hands decoded market events from the connection task to consumers without
//! ever blocking the read loop.
//!
//! The queue is a tokio broadcast channel of fixed capacity. Sending never
//! waits; when a consumer falls more than `capacity` events behind, the
//! oldest events are overwritten and the consumer learns how many it missed
//! on its next receive. Those losses are counted here and exported as a
//! metric.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::messages::MarketEvent;
use crate::infrastructure::metrics;

/// Default queue capacity.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 8192;

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct Counters {
    dispatched: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events handed to the queue.
    pub dispatched: u64,
    /// Events overwritten before a consumer read them.
    pub dropped: u64,
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Producer side of the event queue.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    tx: broadcast::Sender<MarketEvent>,
    counters: Arc<Counters>,
}

impl EventDispatcher {
    /// Queue holding at most `capacity` unread events per consumer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Enqueue an event. Never blocks; succeeds with no consumers attached.
    pub fn dispatch(&self, event: MarketEvent) {
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(event);
    }

    /// Attach a consumer. It sees events dispatched from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            rx: self.tx.subscribe(),
            counters: Arc::clone(&self.counters),
        }
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Receiver
// =============================================================================

/// Consumer side of the event queue.
#[derive(Debug)]
pub struct EventReceiver {
    rx: broadcast::Receiver<MarketEvent>,
    counters: Arc<Counters>,
}

impl EventReceiver {
    /// Next event, or `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<MarketEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => self.record_dropped(missed),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<MarketEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(missed)) => self.record_dropped(missed),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    fn record_dropped(&self, missed: u64) {
        self.counters.dropped.fetch_add(missed, Ordering::Relaxed);
        metrics::record_events_dropped(missed);
        tracing::warn!(missed, "Event consumer lagging, oldest events dropped");
    }
}
