//! Token Store
//!
//! Holds at most one access token and one streamer token, each with its
//! expiry. When a cache path is configured the records are written to a JSON
//! file on every change and read back at startup, so a restarted process can
//! reuse unexpired tokens.
//!
//! # File Format
//!
//! ```json
//! {
//!   "access":   { "value": "...", "expires_at": "2025-10-16T14:00:00Z" },
//!   "streamer": { "value": "...", "expires_at": "2025-10-17T10:00:00Z" }
//! }
//! ```
//!
//! Writes go to a sibling temp file which is then renamed over the cache file.
//! A missing or unreadable cache starts empty.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Nominal lifetime of a streamer token; the quote-token endpoint does not declare one.
pub const STREAMER_TOKEN_TTL: Duration = Duration::from_secs(20 * 60 * 60);

// =============================================================================
// Token Kind
// =============================================================================

/// Which token a record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// OAuth access token for the REST API.
    Access,
    /// Streamer token for the market-data session.
    Streamer,
}

impl TokenKind {
    /// How long before expiry the token is treated as expired.
    #[must_use]
    pub const fn renewal_margin(self) -> Duration {
        match self {
            Self::Access => Duration::from_secs(60),
            Self::Streamer => Duration::from_secs(5 * 60),
        }
    }

    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Streamer => "streamer",
        }
    }
}

// =============================================================================
// Cached Token
// =============================================================================

/// A token value with its expiry. `Debug` redacts the value.
#[derive(Clone, PartialEq, Eq)]
pub struct CachedToken {
    /// Token value.
    pub value: String,
    /// Server-declared (or nominal) expiry.
    pub expires_at: DateTime<Utc>,
    /// Token kind.
    pub kind: TokenKind,
}

impl CachedToken {
    /// Token expiring `ttl` after `now`.
    #[must_use]
    pub fn new(kind: TokenKind, value: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            value: value.into(),
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            kind,
        }
    }

    /// Usable at `now`: `now < expires_at - renewal_margin`. An expiry too
    /// close to the minimum representable date counts as stale.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let margin = chrono::Duration::from_std(self.kind.renewal_margin())
            .unwrap_or(chrono::Duration::zero());
        self.expires_at
            .checked_sub_signed(margin)
            .is_some_and(|cutoff| now < cutoff)
    }
}

impl fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedToken")
            .field("kind", &self.kind)
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// =============================================================================
// Persistence Records
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TokenRecords {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access: Option<StoredToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    streamer: Option<StoredToken>,
}

impl TokenRecords {
    const fn slot(&self, kind: TokenKind) -> Option<&StoredToken> {
        match kind {
            TokenKind::Access => self.access.as_ref(),
            TokenKind::Streamer => self.streamer.as_ref(),
        }
    }

    const fn slot_mut(&mut self, kind: TokenKind) -> &mut Option<StoredToken> {
        match kind {
            TokenKind::Access => &mut self.access,
            TokenKind::Streamer => &mut self.streamer,
        }
    }
}

// =============================================================================
// Token Store
// =============================================================================

/// Cache of the current access and streamer tokens.
#[derive(Debug)]
pub struct TokenStore {
    path: Option<PathBuf>,
    records: RwLock<TokenRecords>,
}

impl TokenStore {
    /// Store with no persistence.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: RwLock::new(TokenRecords::default()),
        }
    }

    /// Store persisted at `path`, loading any existing records.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = load_records(&path);
        Self {
            path: Some(path),
            records: RwLock::new(records),
        }
    }

    /// Cache file location, if persistent.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current token of `kind`, fresh or not.
    #[must_use]
    pub fn get(&self, kind: TokenKind) -> Option<CachedToken> {
        self.records.read().slot(kind).map(|stored| CachedToken {
            value: stored.value.clone(),
            expires_at: stored.expires_at,
            kind,
        })
    }

    /// Current token of `kind` if still outside its renewal margin at `now`.
    #[must_use]
    pub fn valid(&self, kind: TokenKind, now: DateTime<Utc>) -> Option<CachedToken> {
        self.get(kind).filter(|token| token.is_fresh(now))
    }

    /// Replace the token of `token.kind` and persist.
    pub fn put(&self, token: &CachedToken) {
        let mut records = self.records.write();
        *records.slot_mut(token.kind) = Some(StoredToken {
            value: token.value.clone(),
            expires_at: token.expires_at,
        });
        self.persist(&records);
    }

    /// Drop the token of `kind` and persist.
    pub fn invalidate(&self, kind: TokenKind) {
        let mut records = self.records.write();
        if records.slot_mut(kind).take().is_some() {
            self.persist(&records);
        }
    }

    fn persist(&self, records: &TokenRecords) {
        let Some(path) = &self.path else {
            return;
        };

        if let Err(e) = write_records(path, records) {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to persist token cache"
            );
        }
    }
}

fn load_records(path: &Path) -> TokenRecords {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return TokenRecords::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Token cache unreadable, starting empty");
            return TokenRecords::default();
        }
    };

    match serde_json::from_str(&contents) {
        Ok(records) => {
            tracing::debug!(path = %path.display(), "Loaded token cache");
            records
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Token cache corrupt, starting empty");
            TokenRecords::default()
        }
    }
}

fn write_records(path: &Path, records: &TokenRecords) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(records).map_err(std::io::Error::other)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    // owner-only: the cache holds live bearer tokens
    let tmp = path.with_extension("tmp");
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    std::os::unix::fs::OpenOptionsExt::mode(&mut options, 0o600);

    let mut file = options.open(&tmp)?;
    #[cfg(unix)]
    file.set_permissions(<std::fs::Permissions as std::os::unix::fs::PermissionsExt>::from_mode(0o600))?;
    file.write_all(&json)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn access_token_expires_sixty_seconds_early() {
        let issued = now();
        let token = CachedToken::new(TokenKind::Access, "a", issued, Duration::from_secs(900));

        assert!(token.is_fresh(issued + chrono::Duration::seconds(839)));
        assert!(!token.is_fresh(issued + chrono::Duration::seconds(840)));
    }

    #[test]
    fn streamer_token_expires_five_minutes_early() {
        let issued = now();
        let token = CachedToken::new(TokenKind::Streamer, "s", issued, STREAMER_TOKEN_TTL);
        let cutoff = issued + chrono::Duration::hours(20) - chrono::Duration::minutes(5);

        assert!(token.is_fresh(cutoff - chrono::Duration::seconds(1)));
        assert!(!token.is_fresh(cutoff));
    }

    #[test]
    fn one_token_per_kind() {
        let store = TokenStore::in_memory();
        store.put(&CachedToken::new(TokenKind::Access, "first", now(), Duration::from_secs(900)));
        store.put(&CachedToken::new(TokenKind::Access, "second", now(), Duration::from_secs(900)));

        assert_eq!(store.get(TokenKind::Access).unwrap().value, "second");
        assert!(store.get(TokenKind::Streamer).is_none());
    }

    #[test]
    fn valid_filters_expired_tokens() {
        let store = TokenStore::in_memory();
        store.put(&CachedToken::new(TokenKind::Access, "a", now(), Duration::from_secs(30)));

        assert!(store.get(TokenKind::Access).is_some());
        assert!(store.valid(TokenKind::Access, now()).is_none());
    }

    #[test]
    fn tokens_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        {
            let store = TokenStore::open(&path);
            store.put(&CachedToken::new(TokenKind::Streamer, "s-token", now(), STREAMER_TOKEN_TTL));
        }

        let reopened = TokenStore::open(&path);
        let token = reopened.valid(TokenKind::Streamer, now()).unwrap();
        assert_eq!(token.value, "s-token");
    }

    #[test]
    fn invalidate_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = TokenStore::open(&path);
        store.put(&CachedToken::new(TokenKind::Access, "a", now(), Duration::from_secs(900)));
        store.invalidate(TokenKind::Access);

        assert!(TokenStore::open(&path).get(TokenKind::Access).is_none());
    }

    #[test]
    fn corrupt_cache_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = TokenStore::open(&path);
        assert!(store.get(TokenKind::Access).is_none());
    }

    #[test]
    fn expiry_at_minimum_date_is_stale() {
        let token = CachedToken {
            value: "a".to_string(),
            expires_at: DateTime::<Utc>::MIN_UTC,
            kind: TokenKind::Access,
        };

        assert!(!token.is_fresh(DateTime::<Utc>::MIN_UTC));
        assert!(!token.is_fresh(now()));
    }

    #[cfg(unix)]
    #[test]
    fn cache_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let store = TokenStore::open(&path);
        store.put(&CachedToken::new(TokenKind::Access, "a", now(), Duration::from_secs(900)));

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn debug_redacts_token_value() {
        let token = CachedToken::new(TokenKind::Access, "super-secret", now(), Duration::from_secs(1));
        assert!(!format!("{token:?}").contains("super-secret"));
    }
}
