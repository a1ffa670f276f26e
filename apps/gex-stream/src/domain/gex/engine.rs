//! Aggregation Engine
//!
//! Folds per-contract field updates into a symbol-keyed map and derives the
//! strike profile from it on demand.
//!
//! # Concurrency
//!
//! Contract state and the spot price live behind one `RwLock`. Updates take
//! the write lock, so mutation is serialized per engine. Every derived view
//! (strike profile, totals, zero gamma, snapshot) is computed under a single
//! read guard and therefore never observes a half-applied update.
//!
//! The strike profile is recomputed from the full contract set each time and
//! is never maintained incrementally.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use super::history::{DEFAULT_HISTORY_CAPACITY, SnapshotHistory};
use super::snapshot::{
    Coverage, GexMetrics, GexSnapshot, PutCallRatios, SideAggregate, StrikeAggregate,
    max_gex_strike,
};
use super::zero_gamma::zero_gamma_level;
use crate::domain::contract::{ContractFields, ContractUpdate};
use crate::domain::symbols::{ContractSymbology, OptionType};

// =============================================================================
// Engine State
// =============================================================================

#[derive(Debug, Default)]
struct EngineState {
    spot_price: f64,
    contracts: HashMap<String, ContractUpdate>,
}

/// Running sums for one side of one strike.
#[derive(Debug, Default)]
struct SideAccumulator {
    gex: f64,
    open_interest: u64,
    volume: u64,
    iv_sum: f64,
    iv_count: u32,
}

impl SideAccumulator {
    fn add(&mut self, contract: &ContractUpdate, spot: f64) {
        self.gex += contract.gex(spot);
        self.open_interest = self
            .open_interest
            .saturating_add(contract.open_interest.unwrap_or(0));
        self.volume = self.volume.saturating_add(contract.volume.unwrap_or(0));
        if let Some(iv) = contract.iv {
            self.iv_sum += iv;
            self.iv_count += 1;
        }
    }

    fn finish(&self) -> SideAggregate {
        SideAggregate {
            gex: self.gex,
            open_interest: self.open_interest,
            volume: self.volume,
            iv: (self.iv_count > 0).then(|| self.iv_sum / f64::from(self.iv_count)),
        }
    }
}

// =============================================================================
// GEX Engine
// =============================================================================

/// Concurrent per-contract aggregation with snapshot history.
pub struct GexEngine {
    symbology: Arc<dyn ContractSymbology>,
    state: RwLock<EngineState>,
    history: Mutex<SnapshotHistory>,
}

impl std::fmt::Debug for GexEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("GexEngine")
            .field("spot_price", &state.spot_price)
            .field("contracts", &state.contracts.len())
            .field("history", &self.history.lock().len())
            .finish_non_exhaustive()
    }
}

impl GexEngine {
    /// Create an engine with the default history capacity.
    #[must_use]
    pub fn new(symbology: Arc<dyn ContractSymbology>) -> Self {
        Self::with_history_capacity(symbology, DEFAULT_HISTORY_CAPACITY)
    }

    /// Create an engine retaining at most `capacity` snapshots.
    #[must_use]
    pub fn with_history_capacity(symbology: Arc<dyn ContractSymbology>, capacity: usize) -> Self {
        Self {
            symbology,
            state: RwLock::new(EngineState::default()),
            history: Mutex::new(SnapshotHistory::new(capacity)),
        }
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Merge `fields` into the contract for `symbol`.
    pub fn update_gamma(&self, symbol: &str, fields: &ContractFields) {
        let now = Utc::now();
        let mut state = self.state.write();
        state
            .contracts
            .entry(symbol.to_string())
            .or_insert_with(|| ContractUpdate::new(symbol, now))
            .merge(fields, now);
    }

    /// Drop all contract state and start over at `spot_price`. History is kept.
    pub fn reset(&self, spot_price: f64) {
        let mut state = self.state.write();
        state.contracts.clear();
        state.spot_price = spot_price;
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Current underlying price.
    #[must_use]
    pub fn spot_price(&self) -> f64 {
        self.state.read().spot_price
    }

    /// Number of tracked contracts.
    #[must_use]
    pub fn contract_count(&self) -> usize {
        self.state.read().contracts.len()
    }

    /// Copy of the state for one contract.
    #[must_use]
    pub fn contract(&self, symbol: &str) -> Option<ContractUpdate> {
        self.state.read().contracts.get(symbol).cloned()
    }

    /// Per-strike aggregates ordered by strike ascending.
    #[must_use]
    pub fn gex_by_strike(&self) -> Vec<StrikeAggregate> {
        let state = self.state.read();
        self.aggregate(&state)
    }

    /// Call, put and net totals.
    #[must_use]
    pub fn total_gex_metrics(&self) -> GexMetrics {
        GexMetrics::from_strikes(&self.gex_by_strike())
    }

    /// Zero crossing of the net GEX profile.
    #[must_use]
    pub fn zero_gamma_level(&self) -> Option<f64> {
        profile_zero_gamma(&self.gex_by_strike())
    }

    /// Coverage of `requested` symbols by received data.
    #[must_use]
    pub fn coverage(&self, requested: &[String]) -> Coverage {
        let state = self.state.read();
        let tracked = || {
            requested
                .iter()
                .filter_map(|symbol| state.contracts.get(symbol.as_str()))
        };
        let with_data = tracked().filter(|c| c.has_data()).count();
        let with_gex_inputs = tracked().filter(|c| c.has_gex_inputs()).count();
        Coverage::new(requested.len(), with_data, with_gex_inputs)
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Build a snapshot from one consistent view of the contract map.
    #[must_use]
    pub fn snapshot(&self, coverage: Coverage) -> GexSnapshot {
        let (spot_price, num_options, strikes) = {
            let state = self.state.read();
            (state.spot_price, state.contracts.len(), self.aggregate(&state))
        };

        let metrics = GexMetrics::from_strikes(&strikes);
        GexSnapshot {
            as_of: Utc::now(),
            spot_price,
            total_call_gex: metrics.total_call_gex,
            total_put_gex: metrics.total_put_gex,
            net_gex: metrics.net_gex,
            zero_gamma_level: profile_zero_gamma(&strikes),
            num_options,
            max_gex_strike: max_gex_strike(&strikes),
            put_call: PutCallRatios::from_strikes(&strikes),
            coverage,
            strikes,
        }
    }

    /// Build a snapshot and append it to the history.
    pub fn capture_snapshot(&self, coverage: Coverage) -> GexSnapshot {
        let snapshot = self.snapshot(coverage);
        self.history.lock().push(snapshot.clone());
        snapshot
    }

    /// Captured snapshots, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<GexSnapshot> {
        self.history.lock().iter().cloned().collect()
    }

    /// Most recently captured snapshot.
    #[must_use]
    pub fn latest_snapshot(&self) -> Option<GexSnapshot> {
        self.history.lock().latest().cloned()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn aggregate(&self, state: &EngineState) -> Vec<StrikeAggregate> {
        // keyed by strike bits; strikes come from parsed decimals so equal
        // strikes have identical representations
        let mut buckets: HashMap<u64, (f64, SideAccumulator, SideAccumulator)> = HashMap::new();

        for contract in state.contracts.values() {
            let Some(parsed) = self.symbology.parse(&contract.symbol) else {
                continue;
            };

            let bucket = buckets.entry(parsed.strike.to_bits()).or_insert_with(|| {
                (
                    parsed.strike,
                    SideAccumulator::default(),
                    SideAccumulator::default(),
                )
            });

            match parsed.option_type {
                OptionType::Call => bucket.1.add(contract, state.spot_price),
                OptionType::Put => bucket.2.add(contract, state.spot_price),
            }
        }

        let mut strikes: Vec<StrikeAggregate> = buckets
            .into_values()
            .map(|(strike, call, put)| StrikeAggregate::new(strike, call.finish(), put.finish()))
            .collect();
        strikes.sort_by(|a, b| a.strike.total_cmp(&b.strike));
        strikes
    }
}

fn profile_zero_gamma(strikes: &[StrikeAggregate]) -> Option<f64> {
    let profile: Vec<(f64, f64)> = strikes.iter().map(|s| (s.strike, s.net_gex)).collect();
    zero_gamma_level(&profile)
}
