//! Configuration Module
//!
//! Environment-driven configuration for the collector binary.

mod settings;

pub use settings::{
    CollectionSettings, ConfigError, CredentialSource, DEFAULT_DXLINK_URL,
    DEFAULT_TOKEN_CACHE_PATH, GexConfig, WebSocketSettings,
};
