//! Domain Layer - Contract state and GEX aggregation.
//!
//! Pure types and algorithms with no I/O. Everything here can be driven
//! synchronously from tests.

/// Per-contract market data state.
pub mod contract;

/// Gamma exposure aggregation engine and snapshot types.
pub mod gex;

/// Option contract symbol generation and parsing.
pub mod symbols;
