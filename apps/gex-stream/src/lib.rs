#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::cast_precision_loss,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! GEX Stream - Options Gamma Exposure Collector
//!
//! Authenticates against the Tastytrade OAuth API, streams option Greeks,
//! open interest and volume over DXLink, and folds them into a per-strike
//! gamma exposure profile with a zero-gamma (flip) level.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: pure types and algorithms
//!   - `contract`: per-contract last-write-wins state
//!   - `gex`: aggregation engine, snapshots, zero-gamma, history
//!   - `symbols`: contract symbology and underlying presets
//!
//! - **Application**: use cases and port definitions
//!   - `ports`: credential provider and streamer token source
//!   - `services`: collection orchestrator
//!
//! - **Infrastructure**: adapters and external integrations
//!   - `tastytrade`: credentials, token cache, OAuth token manager
//!   - `dxlink`: streaming protocol client
//!   - `config`, `telemetry`, `metrics`
//!
//! # Data Flow
//!
//! ```text
//! TokenManager ──token──► DxLinkClient ──FEED_DATA──► EventDispatcher
//!                                                          │
//!                 GexSnapshot ◄── GexEngine ◄── fold ──────┘
//!                      │
//!                      └──► stdout (JSON) / history (720)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Contract state and GEX aggregation with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Error taxonomy shared across layers.
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::contract::{CONTRACT_MULTIPLIER, ContractFields, ContractUpdate};
pub use domain::gex::{
    Coverage, GexEngine, GexMetrics, GexSnapshot, PutCallRatios, Sentiment, StrikeAggregate,
    zero_gamma_level,
};
pub use domain::symbols::{ContractSymbol, ContractSymbology, DxLinkSymbology, OptionType};

// Application
pub use application::ports::{Credential, CredentialProvider, StreamerTokenSource};
pub use application::services::{CollectionOrchestrator, CollectionParams, OrchestratorConfig};

// Errors
pub use error::{AuthError, CollectionError, CredentialError, TransportError};

// Infrastructure config
pub use infrastructure::config::{ConfigError, CredentialSource, GexConfig};

// Adapters
pub use infrastructure::dxlink::{ConnectionState, DxLinkClient, DxLinkClientConfig, StreamError};
pub use infrastructure::tastytrade::{TokenManager, TokenManagerConfig, TokenStore};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
