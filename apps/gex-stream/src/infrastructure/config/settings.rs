//! Collector Configuration Settings
//!
//! Configuration types for the collector, loaded from environment variables.
//! Every setting except the credentials has a default.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;

use crate::application::services::{CollectionParams, OrchestratorConfig};
use crate::domain::gex::DEFAULT_HISTORY_CAPACITY;
use crate::error::CollectionError;
use crate::infrastructure::dxlink::{
    DEFAULT_EVENT_QUEUE_CAPACITY, DxLinkClientConfig, KeepaliveConfig, ReconnectConfig,
};
use crate::infrastructure::tastytrade::{DEFAULT_API_URL, TokenManagerConfig};

/// Default DXLink endpoint.
pub const DEFAULT_DXLINK_URL: &str = "wss://tasty-openapi-ws.dxfeed.com/realtime";

/// Default token cache file.
pub const DEFAULT_TOKEN_CACHE_PATH: &str = ".gex_tokens.json";

/// Where OAuth client credentials come from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CredentialSource {
    /// `TASTYTRADE_*` environment variables.
    #[default]
    Env,
    /// JSON secrets file.
    File(PathBuf),
}

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Limit on opening the transport.
    pub connect_timeout: Duration,
    /// Limit on the SETUP..CHANNEL_OPENED handshake.
    pub handshake_timeout: Duration,
    /// Keep-alive send interval.
    pub keepalive_interval: Duration,
    /// Inbound silence before the connection is stale.
    pub keepalive_timeout: Duration,
    /// Unread events buffered before the oldest are dropped.
    pub event_queue_capacity: usize,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts per session (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        let keepalive = KeepaliveConfig::default();
        let reconnect = ReconnectConfig::default();
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            keepalive_interval: keepalive.interval,
            keepalive_timeout: keepalive.timeout,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            reconnect_delay_initial: reconnect.initial_delay,
            reconnect_delay_max: reconnect.max_delay,
            reconnect_delay_multiplier: reconnect.multiplier,
            max_reconnect_attempts: reconnect.max_attempts,
        }
    }
}

/// What and how long to collect.
#[derive(Debug, Clone)]
pub struct CollectionSettings {
    /// Underlying ticker.
    pub underlying: String,
    /// Expiration; today when unset.
    pub expiration: Option<NaiveDate>,
    /// Strikes above the centre strike.
    pub strikes_above: u32,
    /// Strikes below the centre strike.
    pub strikes_below: u32,
    /// Accumulation window.
    pub collect_for: Duration,
    /// Limit on waiting for the underlying price.
    pub price_timeout: Duration,
    /// Hard limit on one session.
    pub session_deadline: Duration,
    /// Pause between sessions (zero = run once).
    pub refresh_interval: Duration,
    /// Price used when no live price arrives.
    pub fallback_price: Option<f64>,
    /// Fall back to the preset reference price (`GEX_FALLBACK_PRICE=preset`).
    pub preset_fallback: bool,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            underlying: "SPX".to_string(),
            expiration: None,
            strikes_above: 25,
            strikes_below: 25,
            collect_for: Duration::from_secs(15),
            price_timeout: Duration::from_secs(5),
            session_deadline: Duration::from_secs(120),
            refresh_interval: Duration::ZERO,
            fallback_price: None,
            preset_fallback: false,
        }
    }
}

/// Complete collector configuration.
#[derive(Debug, Clone)]
pub struct GexConfig {
    /// Credential source.
    pub credential_source: CredentialSource,
    /// Tastytrade API base URL.
    pub api_url: String,
    /// DXLink WebSocket URL.
    pub dxlink_url: String,
    /// Token cache file.
    pub token_cache_path: PathBuf,
    /// WebSocket settings.
    pub websocket: WebSocketSettings,
    /// Collection settings.
    pub collection: CollectionSettings,
    /// Prometheus port (0 = in-process only).
    pub metrics_port: u16,
}

impl GexConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let credential_source = match env.get("GEX_CREDENTIAL_SOURCE").as_deref() {
            None | Some("env") => CredentialSource::Env,
            Some("file") => {
                let path = env
                    .get("GEX_SECRETS_PATH")
                    .ok_or_else(|| ConfigError::MissingEnvVar("GEX_SECRETS_PATH".to_string()))?;
                CredentialSource::File(PathBuf::from(path))
            }
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "GEX_CREDENTIAL_SOURCE".to_string(),
                    value: other.to_string(),
                });
            }
        };

        let ws_defaults = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            connect_timeout: env.duration_secs("GEX_WS_CONNECT_TIMEOUT_SECS", ws_defaults.connect_timeout),
            handshake_timeout: env
                .duration_secs("GEX_WS_HANDSHAKE_TIMEOUT_SECS", ws_defaults.handshake_timeout),
            keepalive_interval: env
                .duration_secs("GEX_WS_KEEPALIVE_INTERVAL_SECS", ws_defaults.keepalive_interval),
            keepalive_timeout: env
                .duration_secs("GEX_WS_KEEPALIVE_TIMEOUT_SECS", ws_defaults.keepalive_timeout),
            event_queue_capacity: env
                .usize("GEX_EVENT_QUEUE_CAPACITY", ws_defaults.event_queue_capacity),
            reconnect_delay_initial: env.duration_millis(
                "GEX_RECONNECT_DELAY_INITIAL_MS",
                ws_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env
                .duration_millis("GEX_RECONNECT_DELAY_MAX_MS", ws_defaults.reconnect_delay_max),
            reconnect_delay_multiplier: env.f64(
                "GEX_RECONNECT_DELAY_MULTIPLIER",
                ws_defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env
                .u32("GEX_MAX_RECONNECT_ATTEMPTS", ws_defaults.max_reconnect_attempts),
        };

        let expiration = env
            .get("GEX_EXPIRATION")
            .map(|raw| {
                NaiveDate::parse_from_str(&raw, "%y%m%d").map_err(|_| ConfigError::InvalidValue {
                    key: "GEX_EXPIRATION".to_string(),
                    value: raw,
                })
            })
            .transpose()?;

        let fallback_raw = env.get("GEX_FALLBACK_PRICE");
        let preset_fallback = fallback_raw
            .as_deref()
            .is_some_and(|raw| raw.eq_ignore_ascii_case("preset"));
        let fallback_price = fallback_raw
            .filter(|_| !preset_fallback)
            .map(|raw| match raw.parse::<f64>() {
                Ok(price) if price.is_finite() && price > 0.0 => Ok(price),
                _ => Err(ConfigError::InvalidValue {
                    key: "GEX_FALLBACK_PRICE".to_string(),
                    value: raw,
                }),
            })
            .transpose()?;

        let defaults = CollectionSettings::default();
        let collection = CollectionSettings {
            underlying: env
                .get("GEX_UNDERLYING")
                .map_or(defaults.underlying, |s| s.to_uppercase()),
            expiration,
            strikes_above: env.u32("GEX_STRIKES_ABOVE", defaults.strikes_above),
            strikes_below: env.u32("GEX_STRIKES_BELOW", defaults.strikes_below),
            collect_for: env.duration_secs("GEX_COLLECT_SECS", defaults.collect_for),
            price_timeout: env.duration_secs("GEX_PRICE_TIMEOUT_SECS", defaults.price_timeout),
            session_deadline: env
                .duration_secs("GEX_SESSION_DEADLINE_SECS", defaults.session_deadline),
            refresh_interval: env
                .duration_secs("GEX_REFRESH_INTERVAL_SECS", defaults.refresh_interval),
            fallback_price,
            preset_fallback,
        };

        Ok(Self {
            credential_source,
            api_url: env
                .get("TASTYTRADE_API_URL")
                .map_or_else(|| DEFAULT_API_URL.to_string(), |s| s.trim_end_matches('/').to_string()),
            dxlink_url: env
                .get("DXLINK_URL")
                .unwrap_or_else(|| DEFAULT_DXLINK_URL.to_string()),
            token_cache_path: env
                .get("GEX_TOKEN_CACHE_PATH")
                .map_or_else(|| PathBuf::from(DEFAULT_TOKEN_CACHE_PATH), PathBuf::from),
            websocket,
            collection,
            metrics_port: env.u16("GEX_METRICS_PORT", 0),
        })
    }

    /// Token endpoint settings.
    #[must_use]
    pub fn token_manager_config(&self) -> TokenManagerConfig {
        TokenManagerConfig {
            api_url: self.api_url.clone(),
            ..TokenManagerConfig::default()
        }
    }

    /// Orchestrator settings.
    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let ws = &self.websocket;
        OrchestratorConfig {
            client: DxLinkClientConfig {
                url: self.dxlink_url.clone(),
                connect_timeout: ws.connect_timeout,
                handshake_timeout: ws.handshake_timeout,
                keepalive: KeepaliveConfig::new(ws.keepalive_interval, ws.keepalive_timeout),
                event_queue_capacity: ws.event_queue_capacity,
            },
            reconnect: ReconnectConfig {
                initial_delay: ws.reconnect_delay_initial,
                max_delay: ws.reconnect_delay_max,
                multiplier: ws.reconnect_delay_multiplier,
                jitter_factor: ReconnectConfig::default().jitter_factor,
                max_attempts: ws.max_reconnect_attempts,
            },
            session_deadline: self.collection.session_deadline,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }

    /// Collection parameters, with `today` as the default expiration.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::InvalidParams`] for an unsupported underlying.
    pub fn collection_params(&self, today: NaiveDate) -> Result<CollectionParams, CollectionError> {
        let c = &self.collection;
        let mut params =
            CollectionParams::for_underlying(&c.underlying, c.expiration.unwrap_or(today))?;
        params.strikes_above = c.strikes_above;
        params.strikes_below = c.strikes_below;
        params.collect_for = c.collect_for;
        params.price_timeout = c.price_timeout;
        params.fallback_price = c.fallback_price;
        if c.preset_fallback {
            params = params.with_preset_fallback();
        }
        Ok(params)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has an unusable value.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

/// Typed reads over a lookup function. Blank values count as unset;
/// unparsable numbers fall back to the default.
struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    fn u16(&self, key: &str, default: u16) -> u16 {
        self.parse(key).unwrap_or(default)
    }

    fn u32(&self, key: &str, default: u32) -> u32 {
        self.parse(key).unwrap_or(default)
    }

    fn usize(&self, key: &str, default: usize) -> usize {
        self.parse(key).unwrap_or(default)
    }

    fn f64(&self, key: &str, default: f64) -> f64 {
        self.parse(key).unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.parse::<u64>(key).map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.parse::<u64>(key).map_or(default, Duration::from_millis)
    }
}
