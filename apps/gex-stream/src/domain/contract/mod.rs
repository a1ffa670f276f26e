//! Per-Contract State
//!
//! Greeks, summary and trade data arrive on independent event types, so the
//! latest known values for a contract are assembled field by field. Every
//! field is optional and updated last-write-wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Contract multiplier for equity and index options.
pub const CONTRACT_MULTIPLIER: f64 = 100.0;

// =============================================================================
// Field Update
// =============================================================================

/// A partial update for one contract. `None` fields leave the stored value untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractFields {
    /// Option gamma.
    pub gamma: Option<f64>,
    /// Option delta.
    pub delta: Option<f64>,
    /// Implied volatility.
    pub iv: Option<f64>,
    /// Open interest in contracts.
    pub open_interest: Option<u64>,
    /// Day volume in contracts.
    pub volume: Option<u64>,
}

impl ContractFields {
    /// Greeks-only update.
    #[must_use]
    pub const fn greeks(gamma: Option<f64>, delta: Option<f64>, iv: Option<f64>) -> Self {
        Self {
            gamma,
            delta,
            iv,
            open_interest: None,
            volume: None,
        }
    }

    /// Open-interest-only update.
    #[must_use]
    pub const fn open_interest(open_interest: Option<u64>) -> Self {
        Self {
            gamma: None,
            delta: None,
            iv: None,
            open_interest,
            volume: None,
        }
    }

    /// Volume-only update.
    #[must_use]
    pub const fn volume(volume: Option<u64>) -> Self {
        Self {
            gamma: None,
            delta: None,
            iv: None,
            open_interest: None,
            volume,
        }
    }

    /// True when no field carries a value.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.gamma.is_none()
            && self.delta.is_none()
            && self.iv.is_none()
            && self.open_interest.is_none()
            && self.volume.is_none()
    }
}

// =============================================================================
// Contract Update
// =============================================================================

/// Latest known values for one option contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractUpdate {
    /// Contract symbol.
    pub symbol: String,
    /// Option gamma.
    pub gamma: Option<f64>,
    /// Option delta.
    pub delta: Option<f64>,
    /// Implied volatility.
    pub iv: Option<f64>,
    /// Open interest in contracts.
    pub open_interest: Option<u64>,
    /// Day volume in contracts.
    pub volume: Option<u64>,
    /// Time of the last merged update.
    pub last_updated: DateTime<Utc>,
}

impl ContractUpdate {
    /// Create an empty record for `symbol`.
    #[must_use]
    pub fn new(symbol: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            gamma: None,
            delta: None,
            iv: None,
            open_interest: None,
            volume: None,
            last_updated: now,
        }
    }

    /// Merge `fields` into this record, last write wins per field.
    pub fn merge(&mut self, fields: &ContractFields, now: DateTime<Utc>) {
        if let Some(gamma) = fields.gamma {
            self.gamma = Some(gamma);
        }
        if let Some(delta) = fields.delta {
            self.delta = Some(delta);
        }
        if let Some(iv) = fields.iv {
            self.iv = Some(iv);
        }
        if let Some(oi) = fields.open_interest {
            self.open_interest = Some(oi);
        }
        if let Some(volume) = fields.volume {
            self.volume = Some(volume);
        }
        self.last_updated = now;
    }

    /// Gamma exposure of this contract at `spot`.
    ///
    /// Zero until both gamma and open interest have been observed.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn gex(&self, spot: f64) -> f64 {
        match (self.gamma, self.open_interest) {
            (Some(gamma), Some(oi)) => gamma * oi as f64 * CONTRACT_MULTIPLIER * spot,
            _ => 0.0,
        }
    }

    /// True once any market data field has been observed.
    #[must_use]
    pub const fn has_data(&self) -> bool {
        self.gamma.is_some()
            || self.delta.is_some()
            || self.iv.is_some()
            || self.open_interest.is_some()
            || self.volume.is_some()
    }

    /// True once both gamma and open interest have been observed.
    #[must_use]
    pub const fn has_gex_inputs(&self) -> bool {
        self.gamma.is_some() && self.open_interest.is_some()
    }
}
