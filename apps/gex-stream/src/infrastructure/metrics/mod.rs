//! Prometheus Metrics Module
//!
//! # Metrics Categories
//!
//! - **Stream**: frames received, events dispatched and dropped, reconnects
//! - **Tokens**: renewals per token kind and outcome
//! - **Collection**: session outcomes, durations, contracts tracked
//!
//! Recording is a no-op until [`init_metrics`] installs the recorder.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Recorder
// =============================================================================

static RECORDER: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the Prometheus recorder.
///
/// With `port` 0 metrics are kept in-process and available through
/// [`render`]; otherwise a scrape endpoint listens on `0.0.0.0:port`.
/// Repeated calls are ignored.
///
/// # Errors
///
/// Returns an error if the recorder or listener cannot be installed.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    if RECORDER.get().is_some() {
        return Ok(());
    }

    let builder = PrometheusBuilder::new();
    let handle = if port == 0 {
        Some(builder.install_recorder()?)
    } else {
        builder
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
            .install()?;
        None
    };

    register_metrics();
    let _ = RECORDER.set(handle);
    tracing::debug!(port, "Metrics recorder installed");
    Ok(())
}

/// Current metrics in Prometheus text format, when kept in-process.
#[must_use]
pub fn render() -> Option<String> {
    RECORDER.get()?.as_ref().map(PrometheusHandle::render)
}

fn register_metrics() {
    describe_counter!(
        "gex_stream_frames_received_total",
        "DXLink text frames received"
    );
    describe_counter!(
        "gex_stream_events_dispatched_total",
        "Market events decoded and queued"
    );
    describe_counter!(
        "gex_stream_events_dropped_total",
        "Market events overwritten before a consumer read them"
    );
    describe_counter!(
        "gex_stream_reconnects_total",
        "DXLink reconnection attempts"
    );
    describe_counter!(
        "gex_stream_token_renewals_total",
        "OAuth token renewals by kind and outcome"
    );
    describe_counter!(
        "gex_stream_collections_total",
        "Collection sessions by outcome"
    );
    describe_histogram!(
        "gex_stream_collection_duration_seconds",
        "Wall-clock duration of collection sessions"
    );
    describe_gauge!(
        "gex_stream_contracts_tracked",
        "Option contracts held by the aggregation engine"
    );
}

// =============================================================================
// Labels
// =============================================================================

/// Outcome label for a collection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionOutcome {
    /// Every requested contract produced data.
    Complete,
    /// Some contracts produced data.
    Partial,
    /// No snapshot was produced.
    Failed,
    /// Stopped before any contract data arrived.
    Stopped,
}

impl CollectionOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

// =============================================================================
// Recording
// =============================================================================

/// Record one inbound DXLink frame.
pub fn record_frame_received() {
    counter!("gex_stream_frames_received_total").increment(1);
}

/// Record decoded events handed to the queue.
pub fn record_events_dispatched(count: u64) {
    if count > 0 {
        counter!("gex_stream_events_dispatched_total").increment(count);
    }
}

/// Record events lost to a lagging consumer.
pub fn record_events_dropped(count: u64) {
    counter!("gex_stream_events_dropped_total").increment(count);
}

/// Record a reconnection attempt.
pub fn record_reconnect_attempt() {
    counter!("gex_stream_reconnects_total").increment(1);
}

/// Record a token renewal for `kind` (`access` or `streamer`).
pub fn record_token_renewal(kind: &'static str, success: bool) {
    counter!(
        "gex_stream_token_renewals_total",
        "kind" => kind,
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Record a finished collection session.
pub fn record_collection(outcome: CollectionOutcome, duration: Duration) {
    counter!(
        "gex_stream_collections_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!(
        "gex_stream_collection_duration_seconds",
        "outcome" => outcome.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Update the tracked-contracts gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_contracts_tracked(count: usize) {
    gauge!("gex_stream_contracts_tracked").set(count as f64);
}
