//! Port Interfaces
//!
//! Contracts between the collection service and the adapters that talk to
//! the outside world.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`CredentialProvider`]: resolves OAuth client credentials
//! - [`StreamerTokenSource`]: hands out a valid streamer token
//!
//! Symbol generation and parsing is a pure port as well, see
//! [`crate::domain::symbols::ContractSymbology`].

use std::fmt;

use async_trait::async_trait;

use crate::error::{AuthError, CredentialError};

// =============================================================================
// Credential
// =============================================================================

/// OAuth client credentials. Immutable; `Debug` redacts the secrets.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

impl Credential {
    /// Build a credential, rejecting empty fields.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::Missing` naming the first empty field.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Result<Self, CredentialError> {
        let client_id = client_id.into();
        let client_secret = client_secret.into();
        let refresh_token = refresh_token.into();

        for (name, value) in [
            ("client_id", &client_id),
            ("client_secret", &client_secret),
            ("refresh_token", &refresh_token),
        ] {
            if value.trim().is_empty() {
                return Err(CredentialError::Missing(name.to_string()));
            }
        }

        Ok(Self {
            client_id,
            client_secret,
            refresh_token,
        })
    }

    /// OAuth client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// OAuth client secret.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Long-lived refresh token.
    #[must_use]
    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Driven Ports
// =============================================================================

/// Source of OAuth client credentials.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialProvider: Send + Sync {
    /// Resolve the credential.
    ///
    /// # Errors
    ///
    /// `CredentialError::Missing` if any field is absent.
    fn get_credential(&self) -> Result<Credential, CredentialError>;
}

/// Source of streamer tokens for the market-data session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamerTokenSource: Send + Sync {
    /// Return a streamer token valid for at least the renewal margin.
    async fn streamer_token(&self) -> Result<String, AuthError>;

    /// Forget the cached streamer token so the next call renews it.
    async fn invalidate_streamer_token(&self);
}
