//! Gamma Exposure Aggregation
//!
//! - `engine`: concurrent per-contract fold and strike profile derivation
//! - `snapshot`: strike aggregates, totals, put/call ratios, snapshot type
//! - `zero_gamma`: flip level interpolation
//! - `history`: bounded FIFO snapshot series

mod engine;
mod history;
mod snapshot;
mod zero_gamma;

pub use engine::GexEngine;
pub use history::{DEFAULT_HISTORY_CAPACITY, SnapshotHistory};
pub use snapshot::{
    Coverage, GexMetrics, GexSnapshot, PutCallRatio, PutCallRatios, Sentiment, SideAggregate,
    StrikeAggregate, max_gex_strike,
};
pub use zero_gamma::zero_gamma_level;
