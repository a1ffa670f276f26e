//! Credential Providers
//!
//! Two sources of OAuth client credentials, selected by configuration:
//!
//! - [`EnvCredentialProvider`]: `TASTYTRADE_CLIENT_ID`, `TASTYTRADE_CLIENT_SECRET`,
//!   `TASTYTRADE_REFRESH_TOKEN`
//! - [`SecretFileCredentialProvider`]: a JSON secrets file with the same
//!   fields (either `client_id` or `TASTYTRADE_CLIENT_ID` style keys)

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::application::ports::{Credential, CredentialProvider};
use crate::error::CredentialError;

/// Environment variable holding the OAuth client id.
pub const CLIENT_ID_VAR: &str = "TASTYTRADE_CLIENT_ID";
/// Environment variable holding the OAuth client secret.
pub const CLIENT_SECRET_VAR: &str = "TASTYTRADE_CLIENT_SECRET";
/// Environment variable holding the refresh token.
pub const REFRESH_TOKEN_VAR: &str = "TASTYTRADE_REFRESH_TOKEN";

// =============================================================================
// Environment
// =============================================================================

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads credentials from environment variables.
pub struct EnvCredentialProvider {
    lookup: Lookup,
}

impl EnvCredentialProvider {
    /// Provider backed by the process environment.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lookup(|key| std::env::var(key).ok())
    }

    /// Provider backed by an arbitrary key lookup.
    #[must_use]
    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn required(&self, key: &str) -> Result<String, CredentialError> {
        (self.lookup)(key)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| CredentialError::Missing(key.to_string()))
    }
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EnvCredentialProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvCredentialProvider").finish_non_exhaustive()
    }
}

impl CredentialProvider for EnvCredentialProvider {
    fn get_credential(&self) -> Result<Credential, CredentialError> {
        Credential::new(
            self.required(CLIENT_ID_VAR)?,
            self.required(CLIENT_SECRET_VAR)?,
            self.required(REFRESH_TOKEN_VAR)?,
        )
    }
}

// =============================================================================
// Secrets File
// =============================================================================

#[derive(Deserialize)]
struct SecretsFile {
    #[serde(alias = "TASTYTRADE_CLIENT_ID")]
    client_id: Option<String>,
    #[serde(alias = "TASTYTRADE_CLIENT_SECRET")]
    client_secret: Option<String>,
    #[serde(alias = "TASTYTRADE_REFRESH_TOKEN")]
    refresh_token: Option<String>,
}

/// Reads credentials from a JSON secrets file.
#[derive(Debug, Clone)]
pub struct SecretFileCredentialProvider {
    path: PathBuf,
}

impl SecretFileCredentialProvider {
    /// Provider reading `path` on each call.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Secrets file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialProvider for SecretFileCredentialProvider {
    fn get_credential(&self) -> Result<Credential, CredentialError> {
        let display = self.path.display().to_string();

        let contents =
            std::fs::read_to_string(&self.path).map_err(|source| CredentialError::Unreadable {
                path: display.clone(),
                source,
            })?;

        let secrets: SecretsFile =
            serde_json::from_str(&contents).map_err(|e| CredentialError::Malformed {
                path: display,
                message: e.to_string(),
            })?;

        let field = |value: Option<String>, name: &str| {
            value.ok_or_else(|| CredentialError::Missing(name.to_string()))
        };

        Credential::new(
            field(secrets.client_id, "client_id")?,
            field(secrets.client_secret, "client_secret")?,
            field(secrets.refresh_token, "refresh_token")?,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvCredentialProvider {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        EnvCredentialProvider::with_lookup(move |key| map.get(key).cloned())
    }

    #[test]
    fn env_provider_reads_all_fields() {
        let provider = env(&[
            (CLIENT_ID_VAR, "id"),
            (CLIENT_SECRET_VAR, "secret"),
            (REFRESH_TOKEN_VAR, "refresh"),
        ]);
        let credential = provider.get_credential().unwrap();
        assert_eq!(credential.client_id(), "id");
        assert_eq!(credential.refresh_token(), "refresh");
    }

    #[test]
    fn env_provider_names_missing_variable() {
        let provider = env(&[(CLIENT_ID_VAR, "id"), (CLIENT_SECRET_VAR, "secret")]);
        let err = provider.get_credential().unwrap_err();
        assert!(matches!(err, CredentialError::Missing(ref var) if var == REFRESH_TOKEN_VAR));
    }

    #[test]
    fn env_provider_treats_blank_as_missing() {
        let provider = env(&[
            (CLIENT_ID_VAR, "  "),
            (CLIENT_SECRET_VAR, "secret"),
            (REFRESH_TOKEN_VAR, "refresh"),
        ]);
        assert!(matches!(
            provider.get_credential(),
            Err(CredentialError::Missing(_))
        ));
    }

    #[test]
    fn secret_file_accepts_prefixed_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"TASTYTRADE_CLIENT_ID":"id","TASTYTRADE_CLIENT_SECRET":"s","TASTYTRADE_REFRESH_TOKEN":"r"}}"#
        )
        .unwrap();

        let credential = SecretFileCredentialProvider::new(file.path())
            .get_credential()
            .unwrap();
        assert_eq!(credential.client_secret(), "s");
    }

    #[test]
    fn secret_file_missing_field() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"client_id":"id","client_secret":"s"}}"#).unwrap();

        let err = SecretFileCredentialProvider::new(file.path())
            .get_credential()
            .unwrap_err();
        assert!(matches!(err, CredentialError::Missing(ref f) if f == "refresh_token"));
    }

    #[test]
    fn secret_file_unreadable_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let missing = SecretFileCredentialProvider::new(dir.path().join("nope.json"));
        assert!(matches!(
            missing.get_credential(),
            Err(CredentialError::Unreadable { .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            SecretFileCredentialProvider::new(file.path()).get_credential(),
            Err(CredentialError::Malformed { .. })
        ));
    }
}
