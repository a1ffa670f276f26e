//! Error Taxonomy
//!
//! Every fatal outcome carries a specific, actionable reason so callers can
//! tell bad credentials from an unreachable network from a missing price.
//!
//! | Error | Recovery |
//! |-------|----------|
//! | [`CredentialError`] | none, fix configuration |
//! | [`AuthError`] | re-acquire a token and retry the session |
//! | [`TransportError`] | reconnect with backoff, bounded attempts |
//! | [`CollectionError::PriceUnavailable`] | surfaced to caller, no retry |
//!
//! Partial coverage is not an error; it is a flag on the snapshot.

use std::time::Duration;

use thiserror::Error;

// =============================================================================
// Credentials
// =============================================================================

/// Failure to resolve OAuth client credentials.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// A required credential field is absent or empty.
    #[error("missing credential: {0}")]
    Missing(String),

    /// The secrets file could not be read.
    #[error("failed to read secrets file {path}: {source}")]
    Unreadable {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The secrets file is not valid JSON of the expected shape.
    #[error("malformed secrets file {path}: {message}")]
    Malformed {
        /// File path.
        path: String,
        /// Parser message.
        message: String,
    },
}

// =============================================================================
// Authentication
// =============================================================================

/// Token acquisition or session authentication failure.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token endpoint rejected the credentials (4xx).
    #[error("invalid credential: HTTP {status}: {message}")]
    InvalidCredential {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        message: String,
    },

    /// The token endpoint could not be reached or failed server-side.
    #[error("token endpoint unreachable: {0}")]
    Unreachable(String),

    /// The response did not contain a token or TTL.
    #[error("malformed token response: {0}")]
    MalformedResponse(String),

    /// The streaming endpoint refused the streamer token.
    #[error("streamer token rejected: {0}")]
    TokenRejected(String),

    /// Credentials could not be resolved.
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl AuthError {
    /// True when a fresh token may fix the failure.
    #[must_use]
    pub const fn is_token_rejected(&self) -> bool {
        matches!(self, Self::TokenRejected(_))
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Streaming connection failure.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint refused or failed the connection.
    #[error("failed to connect to {url}: {message}")]
    Connect {
        /// Endpoint URL.
        url: String,
        /// Underlying error message.
        message: String,
    },

    /// The endpoint did not answer within the connect timeout.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The protocol handshake did not complete in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// No inbound traffic within the keep-alive timeout.
    #[error("keep-alive timed out after {0:?}")]
    KeepaliveTimeout(Duration),

    /// The connection closed unexpectedly.
    #[error("connection closed: {0}")]
    Closed(String),

    /// A frame could not be written.
    #[error("send failed: {0}")]
    Send(String),

    /// The server sent something the protocol does not allow here.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

// =============================================================================
// Collection
// =============================================================================

/// Failure of a collection session. No snapshot is produced.
#[derive(Debug, Error)]
pub enum CollectionError {
    /// Credential or token failure.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Connection failure after exhausting reconnect attempts.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No underlying price arrived before the timeout.
    #[error("price unavailable for {symbol} after {waited:?}")]
    PriceUnavailable {
        /// Underlying symbol.
        symbol: String,
        /// Time waited.
        waited: Duration,
    },

    /// None of the requested contracts produced data.
    #[error("no data received for any of {requested} contracts")]
    NoData {
        /// Number of contracts subscribed.
        requested: usize,
    },

    /// The session exceeded its hard wall-clock deadline.
    #[error("collection deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// Collection parameters are unusable.
    #[error("invalid collection parameters: {0}")]
    InvalidParams(String),

    /// Another session is still running on this orchestrator.
    #[error("a collection session is already running")]
    AlreadyRunning,

    /// The session was stopped before any contract data arrived.
    #[error("collection stopped before contract data arrived")]
    Stopped,

    /// The client was used in a state that does not allow the operation.
    #[error("protocol client error: {0}")]
    Client(String),
}
