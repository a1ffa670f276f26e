//! Tastytrade OAuth Adapters
//!
//! - `credentials`: environment and secrets-file credential providers
//! - `token_store`: access/streamer token cache with file persistence
//! - `token_manager`: refresh-token grant and quote-token renewal

pub mod credentials;
pub mod token_manager;
pub mod token_store;

pub use credentials::{EnvCredentialProvider, SecretFileCredentialProvider};
pub use token_manager::{DEFAULT_API_URL, TokenManager, TokenManagerConfig};
pub use token_store::{CachedToken, STREAMER_TOKEN_TTL, TokenKind, TokenStore};
