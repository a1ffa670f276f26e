//! Strike aggregates and the immutable snapshot handed to consumers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Strike Aggregates
// =============================================================================

/// Call or put side of one strike.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SideAggregate {
    /// Gamma exposure (unsigned magnitude).
    pub gex: f64,
    /// Summed open interest.
    pub open_interest: u64,
    /// Summed day volume.
    pub volume: u64,
    /// Mean implied volatility of contracts that reported one.
    pub iv: Option<f64>,
}

/// Per-strike gamma exposure, split by option type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrikeAggregate {
    /// Strike price.
    pub strike: f64,
    /// Call side.
    pub call: SideAggregate,
    /// Put side.
    pub put: SideAggregate,
    /// Call GEX minus put GEX.
    pub net_gex: f64,
    /// Call plus put open interest.
    pub total_open_interest: u64,
    /// Call plus put day volume.
    pub total_volume: u64,
}

impl StrikeAggregate {
    /// Build an aggregate and derive its net GEX and totals.
    #[must_use]
    pub fn new(strike: f64, call: SideAggregate, put: SideAggregate) -> Self {
        Self {
            strike,
            call,
            put,
            net_gex: call.gex - put.gex,
            total_open_interest: call.open_interest.saturating_add(put.open_interest),
            total_volume: call.volume.saturating_add(put.volume),
        }
    }
}

/// Totals across all strikes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GexMetrics {
    /// Sum of call GEX.
    pub total_call_gex: f64,
    /// Sum of put GEX.
    pub total_put_gex: f64,
    /// `total_call_gex - total_put_gex`.
    pub net_gex: f64,
}

impl GexMetrics {
    /// Sum a strike profile.
    #[must_use]
    pub fn from_strikes(strikes: &[StrikeAggregate]) -> Self {
        let total_call_gex: f64 = strikes.iter().map(|s| s.call.gex).sum();
        let total_put_gex: f64 = strikes.iter().map(|s| s.put.gex).sum();
        Self {
            total_call_gex,
            total_put_gex,
            net_gex: total_call_gex - total_put_gex,
        }
    }
}

// =============================================================================
// Put/Call Ratios
// =============================================================================

/// Positioning read derived from a put/call ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    /// Ratio below 0.7.
    Bullish,
    /// Ratio in [0.7, 1.0).
    #[serde(rename = "Neutral-Bullish")]
    NeutralBullish,
    /// Ratio in [1.0, 1.3).
    #[serde(rename = "Neutral-Bearish")]
    NeutralBearish,
    /// Ratio of 1.3 or more.
    Bearish,
}

impl Sentiment {
    /// Classify a put/call ratio.
    #[must_use]
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio < 0.7 {
            Self::Bullish
        } else if ratio < 1.0 {
            Self::NeutralBullish
        } else if ratio < 1.3 {
            Self::NeutralBearish
        } else {
            Self::Bearish
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Bullish => "Bullish",
            Self::NeutralBullish => "Neutral-Bullish",
            Self::NeutralBearish => "Neutral-Bearish",
            Self::Bearish => "Bearish",
        };
        f.write_str(label)
    }
}

/// One put/call ratio with its sentiment band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PutCallRatio {
    /// Put total divided by call total.
    pub ratio: f64,
    /// Sentiment band.
    pub sentiment: Sentiment,
}

impl PutCallRatio {
    /// `None` when the call side is zero.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(put_total: u64, call_total: u64) -> Option<Self> {
        if call_total == 0 {
            return None;
        }
        let ratio = put_total as f64 / call_total as f64;
        Some(Self {
            ratio,
            sentiment: Sentiment::from_ratio(ratio),
        })
    }
}

/// Put/call ratios by open interest and by volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PutCallRatios {
    /// Ratio of put to call open interest.
    pub open_interest: Option<PutCallRatio>,
    /// Ratio of put to call volume.
    pub volume: Option<PutCallRatio>,
}

impl PutCallRatios {
    /// Compute both ratios from a strike profile.
    #[must_use]
    pub fn from_strikes(strikes: &[StrikeAggregate]) -> Self {
        let (call_oi, put_oi, call_vol, put_vol) = strikes.iter().fold(
            (0u64, 0u64, 0u64, 0u64),
            |(call_oi, put_oi, call_vol, put_vol), s| {
                (
                    call_oi.saturating_add(s.call.open_interest),
                    put_oi.saturating_add(s.put.open_interest),
                    call_vol.saturating_add(s.call.volume),
                    put_vol.saturating_add(s.put.volume),
                )
            },
        );

        Self {
            open_interest: PutCallRatio::compute(put_oi, call_oi),
            volume: PutCallRatio::compute(put_vol, call_vol),
        }
    }
}

// =============================================================================
// Coverage
// =============================================================================

/// How many requested contracts actually produced data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    /// Contracts subscribed.
    pub requested: usize,
    /// Contracts that received at least one field.
    pub with_data: usize,
    /// Contracts with both gamma and open interest.
    pub with_gex_inputs: usize,
    /// Data arrived but some contracts lack gamma or open interest.
    pub partial: bool,
}

impl Coverage {
    /// Derive the partial flag from the counts.
    #[must_use]
    pub const fn new(requested: usize, with_data: usize, with_gex_inputs: usize) -> Self {
        Self {
            requested,
            with_data,
            with_gex_inputs,
            partial: with_data > 0 && with_gex_inputs < requested,
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time GEX profile. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GexSnapshot {
    /// Capture time.
    pub as_of: DateTime<Utc>,
    /// Underlying price used for the GEX computation.
    pub spot_price: f64,
    /// Per-strike aggregates, strike ascending.
    pub strikes: Vec<StrikeAggregate>,
    /// Sum of call GEX.
    pub total_call_gex: f64,
    /// Sum of put GEX.
    pub total_put_gex: f64,
    /// Call minus put GEX.
    pub net_gex: f64,
    /// Interpolated zero crossing of the net GEX profile.
    pub zero_gamma_level: Option<f64>,
    /// Number of contracts tracked.
    pub num_options: usize,
    /// Strike with the largest absolute net GEX.
    pub max_gex_strike: Option<f64>,
    /// Put/call ratios.
    pub put_call: PutCallRatios,
    /// Subscription coverage.
    pub coverage: Coverage,
}

impl GexSnapshot {
    /// Snapshot with no contracts.
    #[must_use]
    pub fn empty(spot_price: f64) -> Self {
        Self {
            as_of: Utc::now(),
            spot_price,
            strikes: Vec::new(),
            total_call_gex: 0.0,
            total_put_gex: 0.0,
            net_gex: 0.0,
            zero_gamma_level: None,
            num_options: 0,
            max_gex_strike: None,
            put_call: PutCallRatios::default(),
            coverage: Coverage::default(),
        }
    }
}

/// Strike with the largest absolute net GEX.
#[must_use]
pub fn max_gex_strike(strikes: &[StrikeAggregate]) -> Option<f64> {
    strikes
        .iter()
        .max_by(|a, b| a.net_gex.abs().total_cmp(&b.net_gex.abs()))
        .map(|s| s.strike)
}
