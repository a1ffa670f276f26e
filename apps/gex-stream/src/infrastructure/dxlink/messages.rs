//! DXLink Message Types
//!
//! Wire format types for the DXLink WebSocket protocol. Every frame is a JSON
//! object with a `type` discriminator and a `channel` number; channel 0 is
//! the connection-level control channel.
//!
//! # Session Flow
//!
//! ```text
//! client                                  server
//!   SETUP ───────────────────────────────►
//!         ◄─────────────────────────────── SETUP
//!         ◄─────────────────────────────── AUTH_STATE UNAUTHORIZED
//!   AUTH {token} ────────────────────────►
//!         ◄─────────────────────────────── AUTH_STATE AUTHORIZED
//!   CHANNEL_REQUEST {FEED} ──────────────►
//!         ◄─────────────────────────────── CHANNEL_OPENED
//!   FEED_SETUP {FULL} ───────────────────►
//!   FEED_SUBSCRIPTION {add} ─────────────►
//!         ◄─────────────────────────────── FEED_DATA ...
//!   KEEPALIVE ◄──────────────────────────► KEEPALIVE
//!   CHANNEL_CANCEL ──────────────────────►
//! ```
//!
//! # Event Payloads (FULL format)
//!
//! ```json
//! {"eventType":"Greeks","eventSymbol":".SPXW251016C6000","gamma":0.0021,"delta":0.48,"volatility":0.14}
//! {"eventType":"Summary","eventSymbol":".SPXW251016C6000","openInterest":1532}
//! {"eventType":"Trade","eventSymbol":"SPX","price":6003.2,"dayVolume":1200}
//! {"eventType":"Quote","eventSymbol":"SPX","bidPrice":6003.0,"askPrice":6003.5}
//! ```
//!
//! Numeric fields may arrive as numbers, numeric strings, or `"NaN"`.
//! Anything non-finite or unparsable is treated as absent.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::contract::ContractFields;

/// Protocol version announced in SETUP.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Connection-level control channel.
pub const CONTROL_CHANNEL: u32 = 0;

/// Channel number requested for the market-data feed.
pub const FEED_CHANNEL: u32 = 1;

// =============================================================================
// Event Types
// =============================================================================

/// Market event types consumed by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    /// Option Greeks and implied volatility.
    Greeks,
    /// Daily summary including open interest.
    Summary,
    /// Last trade with day volume.
    Trade,
    /// Best bid/ask.
    Quote,
}

impl EventType {
    /// All supported types.
    pub const ALL: [Self; 4] = [Self::Greeks, Self::Summary, Self::Trade, Self::Quote];

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Greeks => "Greeks",
            Self::Summary => "Summary",
            Self::Trade => "Trade",
            Self::Quote => "Quote",
        }
    }

    /// Fields requested for this type in FEED_SETUP.
    #[must_use]
    pub const fn accepted_fields(self) -> &'static [&'static str] {
        match self {
            Self::Greeks => &["eventType", "eventSymbol", "gamma", "delta", "volatility"],
            Self::Summary => &["eventType", "eventSymbol", "openInterest"],
            Self::Trade => &["eventType", "eventSymbol", "price", "dayVolume"],
            Self::Quote => &["eventType", "eventSymbol", "bidPrice", "askPrice"],
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Client Messages
// =============================================================================

/// Streamer token carried by AUTH. `Debug` redacts it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthToken(pub String);

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken([REDACTED])")
    }
}

/// `CHANNEL_REQUEST` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParameters {
    /// Feed contract, `AUTO` lets the server choose.
    pub contract: String,
}

/// One `(type, symbol)` pair of a subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionEntry {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Symbol.
    pub symbol: String,
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Protocol negotiation.
    #[serde(rename_all = "camelCase")]
    Setup {
        /// Always the control channel.
        channel: u32,
        /// Seconds the server may stay silent.
        keepalive_timeout: u64,
        /// Seconds the client may stay silent.
        accept_keepalive_timeout: u64,
        /// Client protocol version.
        version: String,
    },
    /// Authentication with the streamer token.
    Auth {
        /// Always the control channel.
        channel: u32,
        /// Streamer token.
        token: AuthToken,
    },
    /// Open a service channel.
    ChannelRequest {
        /// Requested channel number.
        channel: u32,
        /// Service name, `FEED`.
        service: String,
        /// Service parameters.
        parameters: ChannelParameters,
    },
    /// Configure the feed data format.
    #[serde(rename_all = "camelCase")]
    FeedSetup {
        /// Feed channel.
        channel: u32,
        /// Aggregation period in seconds.
        accept_aggregation_period: f64,
        /// `FULL` (objects) or `COMPACT` (arrays).
        accept_data_format: String,
        /// Fields to deliver, per event type.
        accept_event_fields: BTreeMap<EventType, Vec<String>>,
    },
    /// Add subscriptions.
    FeedSubscription {
        /// Feed channel.
        channel: u32,
        /// Pairs to add.
        add: Vec<SubscriptionEntry>,
    },
    /// Close a service channel.
    ChannelCancel {
        /// Channel to close.
        channel: u32,
    },
    /// Keep-alive.
    Keepalive {
        /// Always the control channel.
        channel: u32,
    },
}

impl ClientMessage {
    /// SETUP advertising `keepalive_secs` in both directions.
    #[must_use]
    pub fn setup(keepalive_secs: u64) -> Self {
        Self::Setup {
            channel: CONTROL_CHANNEL,
            keepalive_timeout: keepalive_secs,
            accept_keepalive_timeout: keepalive_secs,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// AUTH with `token`.
    #[must_use]
    pub fn auth(token: impl Into<String>) -> Self {
        Self::Auth {
            channel: CONTROL_CHANNEL,
            token: AuthToken(token.into()),
        }
    }

    /// Request the FEED service on `channel`.
    #[must_use]
    pub fn feed_channel_request(channel: u32) -> Self {
        Self::ChannelRequest {
            channel,
            service: "FEED".to_string(),
            parameters: ChannelParameters {
                contract: "AUTO".to_string(),
            },
        }
    }

    /// FEED_SETUP requesting FULL format and the fields the collector reads.
    #[must_use]
    pub fn feed_setup(channel: u32) -> Self {
        let accept_event_fields = EventType::ALL
            .iter()
            .map(|ty| {
                let fields = ty.accepted_fields().iter().map(|f| (*f).to_string()).collect();
                (*ty, fields)
            })
            .collect();

        Self::FeedSetup {
            channel,
            accept_aggregation_period: 0.1,
            accept_data_format: "FULL".to_string(),
            accept_event_fields,
        }
    }

    /// Subscribe `symbols` to `event_type`.
    #[must_use]
    pub fn subscribe(channel: u32, event_type: EventType, symbols: &[String]) -> Self {
        Self::FeedSubscription {
            channel,
            add: symbols
                .iter()
                .map(|symbol| SubscriptionEntry {
                    event_type,
                    symbol: symbol.clone(),
                })
                .collect(),
        }
    }

    /// Control-channel keep-alive.
    #[must_use]
    pub const fn keepalive() -> Self {
        Self::Keepalive {
            channel: CONTROL_CHANNEL,
        }
    }
}

// =============================================================================
// Server Messages
// =============================================================================

/// Authorization status reported by `AUTH_STATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthStatus {
    /// Token accepted.
    Authorized,
    /// Not (or no longer) authorized.
    Unauthorized,
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// SETUP acknowledgment.
    #[serde(rename_all = "camelCase")]
    Setup {
        /// Control channel.
        #[serde(default)]
        channel: u32,
        /// Server keep-alive timeout in seconds.
        #[serde(default)]
        keepalive_timeout: Option<u64>,
        /// Server version.
        #[serde(default)]
        version: Option<String>,
    },
    /// Authorization state change.
    AuthState {
        /// Control channel.
        #[serde(default)]
        channel: u32,
        /// New state.
        state: AuthStatus,
    },
    /// Service channel opened.
    ChannelOpened {
        /// Assigned channel.
        channel: u32,
        /// Service name.
        #[serde(default)]
        service: Option<String>,
    },
    /// Service channel closed by the server.
    ChannelClosed {
        /// Closed channel.
        channel: u32,
    },
    /// FEED_SETUP acknowledgment, ignored.
    FeedConfig {
        /// Feed channel.
        #[serde(default)]
        channel: u32,
    },
    /// Event payloads.
    FeedData {
        /// Feed channel.
        #[serde(default)]
        channel: u32,
        /// Raw events; decoded individually so one bad event does not drop the frame.
        #[serde(default)]
        data: Vec<serde_json::Value>,
    },
    /// Keep-alive.
    Keepalive {
        /// Control channel.
        #[serde(default)]
        channel: u32,
    },
    /// Protocol error.
    Error {
        /// Channel the error refers to.
        #[serde(default)]
        channel: u32,
        /// Error code.
        #[serde(default)]
        error: String,
        /// Human-readable message.
        #[serde(default)]
        message: String,
    },
    /// Any frame type the collector does not use.
    #[serde(other)]
    Unknown,
}

// =============================================================================
// Market Events
// =============================================================================

/// Greeks for one option contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreeksEvent {
    /// Contract symbol.
    #[serde(rename = "eventSymbol")]
    pub symbol: String,
    /// Gamma.
    #[serde(default, deserialize_with = "lenient::float")]
    pub gamma: Option<f64>,
    /// Delta.
    #[serde(default, deserialize_with = "lenient::float")]
    pub delta: Option<f64>,
    /// Implied volatility.
    #[serde(default, deserialize_with = "lenient::float")]
    pub volatility: Option<f64>,
}

/// Daily summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEvent {
    /// Symbol.
    #[serde(rename = "eventSymbol")]
    pub symbol: String,
    /// Open interest.
    #[serde(default, rename = "openInterest", deserialize_with = "lenient::count")]
    pub open_interest: Option<u64>,
}

/// Last trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Symbol.
    #[serde(rename = "eventSymbol")]
    pub symbol: String,
    /// Trade price.
    #[serde(default, deserialize_with = "lenient::float")]
    pub price: Option<f64>,
    /// Day volume.
    #[serde(default, rename = "dayVolume", deserialize_with = "lenient::count")]
    pub day_volume: Option<u64>,
}

/// Best bid/ask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteEvent {
    /// Symbol.
    #[serde(rename = "eventSymbol")]
    pub symbol: String,
    /// Bid.
    #[serde(default, rename = "bidPrice", deserialize_with = "lenient::float")]
    pub bid_price: Option<f64>,
    /// Ask.
    #[serde(default, rename = "askPrice", deserialize_with = "lenient::float")]
    pub ask_price: Option<f64>,
}

/// A decoded market event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum MarketEvent {
    /// Greeks.
    Greeks(GreeksEvent),
    /// Summary.
    Summary(SummaryEvent),
    /// Trade.
    Trade(TradeEvent),
    /// Quote.
    Quote(QuoteEvent),
}

impl MarketEvent {
    /// Event symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Greeks(e) => &e.symbol,
            Self::Summary(e) => &e.symbol,
            Self::Trade(e) => &e.symbol,
            Self::Quote(e) => &e.symbol,
        }
    }

    /// Contract fields carried by this event.
    #[must_use]
    pub const fn contract_fields(&self) -> ContractFields {
        match self {
            Self::Greeks(e) => ContractFields::greeks(e.gamma, e.delta, e.volatility),
            Self::Summary(e) => ContractFields::open_interest(e.open_interest),
            Self::Trade(e) => ContractFields::volume(e.day_volume),
            Self::Quote(_) => ContractFields {
                gamma: None,
                delta: None,
                iv: None,
                open_interest: None,
                volume: None,
            },
        }
    }

    /// Last trade price, if positive.
    #[must_use]
    pub fn trade_price(&self) -> Option<f64> {
        match self {
            Self::Trade(e) => e.price.filter(|p| *p > 0.0),
            _ => None,
        }
    }

    /// Bid/ask midpoint, if both sides are positive.
    #[must_use]
    pub fn quote_mid(&self) -> Option<f64> {
        match self {
            Self::Quote(QuoteEvent {
                bid_price: Some(bid),
                ask_price: Some(ask),
                ..
            }) if *bid > 0.0 && *ask > 0.0 => Some((bid + ask) / 2.0),
            _ => None,
        }
    }
}

/// Tolerant numeric field decoding.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn number(value: &Value) -> Option<f64> {
        let n = match value {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        n.is_finite().then_some(n)
    }

    pub fn float<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.as_ref().and_then(number))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value
            .as_ref()
            .and_then(|v| match v {
                Value::Number(n) if n.is_u64() => n.as_u64(),
                other => number(other).filter(|n| *n >= 0.0).map(|n| n.round() as u64),
            }))
    }
}
