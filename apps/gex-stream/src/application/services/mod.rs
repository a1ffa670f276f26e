//! Application Services
//!
//! - [`CollectionOrchestrator`]: runs bounded GEX collection sessions

mod collection;

pub use collection::{
    CONTRACT_EVENTS, CollectionOrchestrator, CollectionParams, OrchestratorConfig, PRICE_EVENTS,
};
