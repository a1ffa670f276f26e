//! Token Manager
//!
//! Produces non-expired access and streamer tokens, renewing them through
//! the Tastytrade OAuth endpoints ahead of expiry.
//!
//! # Renewal Flow
//!
//! 1. `POST {api}/oauth/token` with the refresh-token grant gives an access
//!    token and its `expires_in`
//! 2. `GET {api}/api-quote-tokens` with `Authorization: Bearer <access>` gives
//!    the streamer token (nominal 20 hour lifetime)
//!
//! # Single Flight
//!
//! Each token kind has its own async mutex. A caller that finds the cached
//! token stale takes the mutex and checks the cache again before refreshing,
//! so N concurrent callers observing the same stale token produce exactly
//! one HTTP request; the others wake up to the freshly stored value.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};

use super::token_store::{CachedToken, STREAMER_TOKEN_TTL, TokenKind, TokenStore};
use crate::application::ports::{Credential, CredentialProvider, StreamerTokenSource};
use crate::error::AuthError;
use crate::infrastructure::metrics;

/// Default Tastytrade API base URL.
pub const DEFAULT_API_URL: &str = "https://api.tastyworks.com";

/// Response bodies longer than this are cut in error messages.
const ERROR_BODY_LIMIT: usize = 256;

// =============================================================================
// Configuration
// =============================================================================

/// HTTP settings for the token endpoints.
#[derive(Debug, Clone)]
pub struct TokenManagerConfig {
    /// API base URL without trailing slash.
    pub api_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// `User-Agent` header sent on every request.
    pub user_agent: String,
}

impl Default for TokenManagerConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(10),
            user_agent: concat!("gex-stream/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Serialize)]
struct RefreshGrant<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct QuoteTokenEnvelope {
    data: Option<QuoteTokenData>,
}

#[derive(Deserialize)]
struct QuoteTokenData {
    token: Option<String>,
}

// =============================================================================
// Token Manager
// =============================================================================

/// Access and streamer token lifecycle.
pub struct TokenManager {
    http: Client,
    config: TokenManagerConfig,
    provider: Arc<dyn CredentialProvider>,
    credential: OnceCell<Credential>,
    store: Arc<TokenStore>,
    access_flight: Mutex<()>,
    streamer_flight: Mutex<()>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("api_url", &self.config.api_url)
            .field("store", &self.store.path())
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Create a manager.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unreachable` if the HTTP client cannot be built.
    pub fn new(
        config: TokenManagerConfig,
        provider: Arc<dyn CredentialProvider>,
        store: Arc<TokenStore>,
    ) -> Result<Self, AuthError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        Ok(Self {
            http,
            config,
            provider,
            credential: OnceCell::new(),
            store,
            access_flight: Mutex::new(()),
            streamer_flight: Mutex::new(()),
        })
    }

    /// Cached access token, renewed via the refresh-token grant when stale.
    ///
    /// # Errors
    ///
    /// - `InvalidCredential` on a 4xx response
    /// - `Unreachable` on network failure or 5xx
    /// - `MalformedResponse` when the token or TTL is missing
    /// - `Credential` when credentials cannot be resolved
    pub async fn get_access_token(&self) -> Result<CachedToken, AuthError> {
        if let Some(token) = self.store.valid(TokenKind::Access, Utc::now()) {
            return Ok(token);
        }

        let _flight = self.access_flight.lock().await;
        if let Some(token) = self.store.valid(TokenKind::Access, Utc::now()) {
            return Ok(token);
        }

        let result = self.refresh_access_token().await;
        metrics::record_token_renewal(TokenKind::Access.as_str(), result.is_ok());
        let token = result?;
        self.store.put(&token);

        tracing::info!(expires_at = %token.expires_at, "Access token renewed");
        Ok(token)
    }

    /// Cached streamer token, renewed via the quote-token endpoint when stale.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_access_token`].
    pub async fn get_streamer_token(&self) -> Result<CachedToken, AuthError> {
        if let Some(token) = self.store.valid(TokenKind::Streamer, Utc::now()) {
            return Ok(token);
        }

        let _flight = self.streamer_flight.lock().await;
        if let Some(token) = self.store.valid(TokenKind::Streamer, Utc::now()) {
            return Ok(token);
        }

        let result = self.request_quote_token().await;
        if let Err(AuthError::InvalidCredential { status, .. }) = &result
            && *status == StatusCode::UNAUTHORIZED.as_u16()
        {
            // revoked access token: drop it so the caller's next attempt starts fresh
            tracing::warn!("Quote token request unauthorized, dropping cached access token");
            self.invalidate(TokenKind::Access);
        }
        metrics::record_token_renewal(TokenKind::Streamer.as_str(), result.is_ok());
        let token = result?;
        self.store.put(&token);

        tracing::info!(expires_at = %token.expires_at, "Streamer token renewed");
        Ok(token)
    }

    /// Streamer token value, renewing only if needed. Safe to call concurrently.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_access_token`].
    pub async fn ensure_streamer_token(&self) -> Result<String, AuthError> {
        self.get_streamer_token().await.map(|token| token.value)
    }

    /// Drop the cached token of `kind`.
    pub fn invalidate(&self, kind: TokenKind) {
        tracing::debug!(kind = kind.as_str(), "Invalidating cached token");
        self.store.invalidate(kind);
    }

    // =========================================================================
    // HTTP
    // =========================================================================

    async fn credential(&self) -> Result<&Credential, AuthError> {
        self.credential
            .get_or_try_init(|| async { self.provider.get_credential() })
            .await
            .map_err(AuthError::from)
    }

    async fn refresh_access_token(&self) -> Result<CachedToken, AuthError> {
        let credential = self.credential().await?;
        let url = format!("{}/oauth/token", self.config.api_url);

        let response = self
            .http
            .post(&url)
            .json(&RefreshGrant {
                grant_type: "refresh_token",
                refresh_token: credential.refresh_token(),
                client_id: credential.client_id(),
                client_secret: credential.client_secret(),
            })
            .send()
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        let body: AccessTokenResponse = read_json(response).await?;

        let value = body
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AuthError::MalformedResponse("missing access_token".to_string()))?;
        let expires_in = body
            .expires_in
            .ok_or_else(|| AuthError::MalformedResponse("missing expires_in".to_string()))?;

        Ok(CachedToken::new(
            TokenKind::Access,
            value,
            Utc::now(),
            Duration::from_secs(expires_in),
        ))
    }

    async fn request_quote_token(&self) -> Result<CachedToken, AuthError> {
        let access = self.get_access_token().await?;
        let url = format!("{}/api-quote-tokens", self.config.api_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&access.value)
            .send()
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        let envelope: QuoteTokenEnvelope = read_json(response).await?;
        let value = envelope
            .data
            .and_then(|data| data.token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AuthError::MalformedResponse("missing data.token".to_string()))?;

        Ok(CachedToken::new(
            TokenKind::Streamer,
            value,
            Utc::now(),
            STREAMER_TOKEN_TTL,
        ))
    }
}

/// Map the status class, then decode the body.
async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, AuthError> {
    let status = response.status();

    if status.is_client_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::InvalidCredential {
            status: status.as_u16(),
            message: truncate(&body),
        });
    }

    if !status.is_success() {
        return Err(AuthError::Unreachable(format!("HTTP {status}")));
    }

    let text = response
        .text()
        .await
        .map_err(|e| AuthError::Unreachable(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| AuthError::MalformedResponse(e.to_string()))
}

fn truncate(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}

#[async_trait::async_trait]
impl StreamerTokenSource for TokenManager {
    async fn streamer_token(&self) -> Result<String, AuthError> {
        self.ensure_streamer_token().await
    }

    async fn invalidate_streamer_token(&self) {
        self.invalidate(TokenKind::Streamer);
    }
}
