//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus process-level
//! concerns (configuration, tracing, metrics).

/// Tastytrade OAuth credentials and token lifecycle.
pub mod tastytrade;

/// DXLink streaming protocol client.
pub mod dxlink;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;
