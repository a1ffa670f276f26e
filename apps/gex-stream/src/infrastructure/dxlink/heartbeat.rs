//! Keep-Alive Monitor
//!
//! DXLink expects a `KEEPALIVE` frame on channel 0 at least once per
//! negotiated keep-alive timeout in both directions. The monitor asks the
//! connection task to send one every interval and reports the connection as
//! stale once nothing has been received for longer than the timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Keep-alive timing.
#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    /// Interval between outbound keep-alive frames.
    pub interval: Duration,
    /// Maximum silence from the server before the connection is stale.
    pub timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(60),
        }
    }
}

impl KeepaliveConfig {
    /// Custom timing.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Timeout in whole seconds as advertised in the SETUP frame.
    #[must_use]
    pub fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs().max(1)
    }
}

/// Events emitted by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveEvent {
    /// Send a `KEEPALIVE` frame.
    SendKeepalive,
    /// Nothing received within the timeout.
    Timeout,
}

/// Inbound activity shared between the reader and the monitor.
#[derive(Debug)]
pub struct KeepaliveState {
    last_inbound: RwLock<Instant>,
}

impl Default for KeepaliveState {
    fn default() -> Self {
        Self::new()
    }
}

impl KeepaliveState {
    /// State with the clock starting now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_inbound: RwLock::new(Instant::now()),
        }
    }

    /// Record that a frame arrived.
    pub fn record_inbound(&self) {
        *self.last_inbound.write() = Instant::now();
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.last_inbound.read().elapsed()
    }
}

/// Periodic keep-alive driver for one connection.
pub struct KeepaliveMonitor {
    config: KeepaliveConfig,
    state: Arc<KeepaliveState>,
    event_tx: mpsc::Sender<KeepaliveEvent>,
    cancel: CancellationToken,
}

impl KeepaliveMonitor {
    /// Create a monitor.
    #[must_use]
    pub const fn new(
        config: KeepaliveConfig,
        state: Arc<KeepaliveState>,
        event_tx: mpsc::Sender<KeepaliveEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the receiver drops, or a timeout is reported.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Keep-alive monitor cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if !self.tick().await {
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) -> bool {
        let silence = self.state.silence();
        if silence > self.config.timeout {
            tracing::warn!(
                silence_secs = silence.as_secs(),
                timeout_secs = self.config.timeout.as_secs(),
                "Keep-alive timeout detected"
            );
            let _ = self.event_tx.send(KeepaliveEvent::Timeout).await;
            return false;
        }

        if self.event_tx.send(KeepaliveEvent::SendKeepalive).await.is_err() {
            tracing::debug!("Event channel closed, stopping keep-alive monitor");
            return false;
        }
        true
    }
}
