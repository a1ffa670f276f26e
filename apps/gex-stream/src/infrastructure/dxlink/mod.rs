//! DXLink Streaming Adapter
//!
//! WebSocket client for the DXLink market data protocol used by the
//! Tastytrade streamer:
//!
//! - **messages**: wire frames and typed market events (FULL JSON format)
//! - **codec**: frame encoding, per-event decoding of `FEED_DATA`
//! - **client**: connection state machine and subscription bookkeeping
//! - **dispatch**: bounded drop-oldest event queue
//! - **heartbeat**: `KEEPALIVE` scheduling and staleness detection
//! - **reconnect**: backoff policy applied by the collection service

pub mod client;
pub mod codec;
pub mod dispatch;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;

pub use client::{
    ConnectionState, DxLinkClient, DxLinkClientConfig, ProtocolSession, StreamError,
};
pub use codec::{CodecError, DecodedEvents, JsonCodec};
pub use dispatch::{DEFAULT_EVENT_QUEUE_CAPACITY, DispatchStats, EventDispatcher, EventReceiver};
pub use heartbeat::{KeepaliveConfig, KeepaliveEvent, KeepaliveMonitor, KeepaliveState};
pub use messages::{
    AuthStatus, ClientMessage, EventType, GreeksEvent, MarketEvent, QuoteEvent, ServerMessage,
    SummaryEvent, TradeEvent,
};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
