//! Application Layer - Use cases and port definitions.
//!
//! The collection service coordinates the token source, the DXLink client and
//! the aggregation engine; the ports describe what it needs from the outside.

/// Port interfaces for credentials and streamer tokens.
pub mod ports;

/// Collection orchestration.
pub mod services;
