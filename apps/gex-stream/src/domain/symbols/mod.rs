//! Option Contract Symbology
//!
//! DXLink option symbols follow the `.{ROOT}{YYMMDD}{C|P}{STRIKE}` layout,
//! e.g. `.SPXW251016C6000` or `.SPY251017P682.5`.
//!
//! The aggregation engine only needs two pure operations from this module:
//! generating the contract set around a spot price, and recovering the
//! strike / option type from a symbol. Both sit behind [`ContractSymbology`]
//! so another venue's convention can be swapped in.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Date format used inside contract symbols.
const EXPIRATION_FORMAT: &str = "%y%m%d";

// =============================================================================
// Option Type
// =============================================================================

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    /// Call option.
    Call,
    /// Put option.
    Put,
}

impl OptionType {
    /// Single-letter code used in symbols.
    #[must_use]
    pub const fn code(self) -> char {
        match self {
            Self::Call => 'C',
            Self::Put => 'P',
        }
    }

    /// Parse the single-letter code.
    #[must_use]
    pub const fn from_code(code: char) -> Option<Self> {
        match code {
            'C' => Some(Self::Call),
            'P' => Some(Self::Put),
            _ => None,
        }
    }
}

// =============================================================================
// Parsed Contract Symbol
// =============================================================================

/// Components of an option contract symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractSymbol {
    /// Option root, e.g. `SPXW`.
    pub root: String,
    /// Expiration date.
    pub expiration: NaiveDate,
    /// Call or put.
    pub option_type: OptionType,
    /// Strike price.
    pub strike: f64,
}

impl ContractSymbol {
    /// Parse a DXLink option symbol.
    ///
    /// Returns `None` for anything that is not a well-formed option symbol
    /// (underlying tickers included).
    #[must_use]
    pub fn parse(symbol: &str) -> Option<Self> {
        let body = symbol.strip_prefix('.')?;

        let date_start = body.find(|c: char| c.is_ascii_digit())?;
        let root = &body[..date_start];
        if root.is_empty() || !root.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }

        let rest = &body[date_start..];
        let date_part = rest.get(..6)?;
        let expiration = NaiveDate::parse_from_str(date_part, EXPIRATION_FORMAT).ok()?;

        let mut tail = rest[6..].chars();
        let option_type = OptionType::from_code(tail.next()?)?;

        let strike_part = tail.as_str();
        if strike_part.is_empty() {
            return None;
        }
        let strike: f64 = strike_part.parse().ok()?;
        if !strike.is_finite() || strike <= 0.0 {
            return None;
        }

        Some(Self {
            root: root.to_string(),
            expiration,
            option_type,
            strike,
        })
    }
}

impl fmt::Display for ContractSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            ".{}{}{}{}",
            self.root,
            self.expiration.format(EXPIRATION_FORMAT),
            self.option_type.code(),
            format_strike(self.strike)
        )
    }
}

/// Whole strikes print without a decimal point, fractional ones as-is.
fn format_strike(strike: f64) -> String {
    if strike.fract() == 0.0 {
        format!("{strike:.0}")
    } else {
        format!("{strike}")
    }
}

// =============================================================================
// Chain Request
// =============================================================================

/// Parameters for generating the contract set of one expiration.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainRequest {
    /// Option root prefix, e.g. `SPXW`.
    pub option_root: String,
    /// Spot price the strike ladder is centred on.
    pub spot: f64,
    /// Number of strikes above the centre strike.
    pub strikes_above: u32,
    /// Number of strikes below the centre strike.
    pub strikes_below: u32,
    /// Distance between adjacent strikes.
    pub increment: f64,
    /// Expiration date.
    pub expiration: NaiveDate,
}

impl ChainRequest {
    /// Strike closest to spot on the increment grid.
    #[must_use]
    pub fn center_strike(&self) -> f64 {
        (self.spot / self.increment).round() * self.increment
    }

    /// All strikes of the ladder, ascending.
    #[must_use]
    pub fn strikes(&self) -> Vec<f64> {
        let center = self.center_strike();
        let below = i64::from(self.strikes_below);
        let above = i64::from(self.strikes_above);

        #[allow(clippy::cast_precision_loss)]
        (-below..=above)
            .map(|i| center + i as f64 * self.increment)
            .filter(|strike| *strike > 0.0)
            .collect()
    }
}

// =============================================================================
// Symbology Port
// =============================================================================

/// Contract symbol generation and parsing.
///
/// Implementations must be pure: no I/O, same input gives same output.
pub trait ContractSymbology: Send + Sync {
    /// Generate the call and put symbols for every strike of the ladder.
    fn generate(&self, request: &ChainRequest) -> Vec<String>;

    /// Parse a contract symbol into its components.
    fn parse(&self, symbol: &str) -> Option<ContractSymbol>;
}

/// DXLink (`.ROOTYYMMDDCSTRIKE`) symbology.
#[derive(Debug, Default, Clone, Copy)]
pub struct DxLinkSymbology;

impl ContractSymbology for DxLinkSymbology {
    fn generate(&self, request: &ChainRequest) -> Vec<String> {
        let strikes = request.strikes();
        let mut symbols = Vec::with_capacity(strikes.len() * 2);

        for strike in strikes {
            for option_type in [OptionType::Call, OptionType::Put] {
                let contract = ContractSymbol {
                    root: request.option_root.clone(),
                    expiration: request.expiration,
                    option_type,
                    strike,
                };
                symbols.push(contract.to_string());
            }
        }

        symbols
    }

    fn parse(&self, symbol: &str) -> Option<ContractSymbol> {
        ContractSymbol::parse(symbol)
    }
}

// =============================================================================
// Underlying Presets
// =============================================================================

/// Per-underlying option root, reference price and strike increment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnderlyingPreset {
    /// Underlying ticker as streamed, e.g. `SPX`.
    pub symbol: &'static str,
    /// Option root prefix, e.g. `SPXW`.
    pub option_root: &'static str,
    /// Reference price used when no live price is available.
    pub default_price: f64,
    /// Strike increment.
    pub increment: f64,
}

/// Supported underlyings.
pub const PRESETS: &[UnderlyingPreset] = &[
    UnderlyingPreset {
        symbol: "SPX",
        option_root: "SPXW",
        default_price: 6000.0,
        increment: 5.0,
    },
    UnderlyingPreset {
        symbol: "NDX",
        option_root: "NDXP",
        default_price: 20000.0,
        increment: 25.0,
    },
    UnderlyingPreset {
        symbol: "SPY",
        option_root: "SPY",
        default_price: 680.0,
        increment: 1.0,
    },
    UnderlyingPreset {
        symbol: "QQQ",
        option_root: "QQQ",
        default_price: 612.0,
        increment: 1.0,
    },
    UnderlyingPreset {
        symbol: "IWM",
        option_root: "IWM",
        default_price: 240.0,
        increment: 1.0,
    },
    UnderlyingPreset {
        symbol: "DIA",
        option_root: "DIA",
        default_price: 450.0,
        increment: 1.0,
    },
];

impl UnderlyingPreset {
    /// Look up a preset by underlying ticker (case-insensitive).
    #[must_use]
    pub fn lookup(symbol: &str) -> Option<&'static Self> {
        PRESETS
            .iter()
            .find(|preset| preset.symbol.eq_ignore_ascii_case(symbol))
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test_case(".SPXW251016C6000", "SPXW", OptionType::Call, 6000.0 ; "spx call")]
    #[test_case(".SPXW251016P5995", "SPXW", OptionType::Put, 5995.0 ; "spx put")]
    #[test_case(".SPY251016C682.5", "SPY", OptionType::Call, 682.5 ; "fractional strike")]
    #[test_case(".NDXP251016P20025", "NDXP", OptionType::Put, 20025.0 ; "ndx put")]
    fn parses_valid_symbols(symbol: &str, root: &str, option_type: OptionType, strike: f64) {
        let parsed = ContractSymbol::parse(symbol).unwrap();
        assert_eq!(parsed.root, root);
        assert_eq!(parsed.option_type, option_type);
        assert_eq!(parsed.strike, strike);
        assert_eq!(parsed.expiration, date(2025, 10, 16));
    }

    #[test_case("SPX" ; "underlying ticker")]
    #[test_case(".SPXW251016X6000" ; "bad option type")]
    #[test_case(".SPXW251016C" ; "missing strike")]
    #[test_case(".SPXW259916C6000" ; "bad date")]
    #[test_case(".251016C6000" ; "missing root")]
    #[test_case(".SPXW251016Cabc" ; "non numeric strike")]
    fn rejects_malformed_symbols(symbol: &str) {
        assert!(ContractSymbol::parse(symbol).is_none());
    }

    #[test]
    fn display_round_trips_through_parse() {
        let contract = ContractSymbol {
            root: "SPY".to_string(),
            expiration: date(2025, 10, 17),
            option_type: OptionType::Put,
            strike: 682.5,
        };
        let text = contract.to_string();
        assert_eq!(text, ".SPY251017P682.5");
        assert_eq!(ContractSymbol::parse(&text).unwrap(), contract);
    }

    #[test]
    fn generate_centres_on_rounded_spot() {
        let request = ChainRequest {
            option_root: "SPXW".to_string(),
            spot: 6003.0,
            strikes_above: 1,
            strikes_below: 1,
            increment: 5.0,
            expiration: date(2025, 10, 16),
        };

        assert_eq!(request.center_strike(), 6005.0);

        let symbols = DxLinkSymbology.generate(&request);
        assert_eq!(
            symbols,
            vec![
                ".SPXW251016C6000",
                ".SPXW251016P6000",
                ".SPXW251016C6005",
                ".SPXW251016P6005",
                ".SPXW251016C6010",
                ".SPXW251016P6010",
            ]
        );
    }

    #[test]
    fn generate_skips_non_positive_strikes() {
        let request = ChainRequest {
            option_root: "IWM".to_string(),
            spot: 2.0,
            strikes_above: 1,
            strikes_below: 5,
            increment: 1.0,
            expiration: date(2025, 10, 16),
        };

        let strikes = request.strikes();
        assert_eq!(strikes, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn preset_lookup_is_case_insensitive() {
        let preset = UnderlyingPreset::lookup("spx").unwrap();
        assert_eq!(preset.option_root, "SPXW");
        assert_eq!(preset.increment, 5.0);
        assert!(UnderlyingPreset::lookup("TSLA").is_none());
    }
}
