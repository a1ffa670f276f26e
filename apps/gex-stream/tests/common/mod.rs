//! Shared integration test fixtures.
//!
//! A scripted in-process DXLink server plus a streamer token source that
//! hands out tokens from a list.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use gex_stream::{AuthError, StreamerTokenSource};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

// =============================================================================
// Server Script
// =============================================================================

/// How the fake server behaves.
#[derive(Debug, Clone)]
pub struct Script {
    /// Tokens answered with AUTHORIZED; anything else gets UNAUTHORIZED.
    pub accepted_tokens: Vec<String>,
    /// Symbol treated as the underlying.
    pub underlying: String,
    /// Events sent when the underlying is subscribed.
    pub price_events: Vec<Value>,
    /// Events sent when option contracts are subscribed to Greeks.
    pub contract_events: Vec<Value>,
    /// Close the first connection abruptly after sending contract events.
    pub drop_first_connection_after_feed: bool,
    /// Send a KEEPALIVE right after CHANNEL_OPENED.
    pub keepalive_after_open: bool,
    /// Never answer SETUP.
    pub silent: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            accepted_tokens: vec![GOOD_TOKEN.to_string()],
            underlying: "SPX".to_string(),
            price_events: vec![trade("SPX", 6003.0, 0)],
            contract_events: reference_feed(),
            drop_first_connection_after_feed: false,
            keepalive_after_open: false,
            silent: false,
        }
    }
}

/// Token accepted by the default script.
pub const GOOD_TOKEN: &str = "streamer-token-good";

/// Everything the server received.
#[derive(Debug, Clone, Default)]
pub struct Recorded {
    /// Connections accepted.
    pub connections: usize,
    /// `(connection index, frame)` in arrival order.
    pub frames: Vec<(usize, Value)>,
}

impl Recorded {
    /// Frame types received on `connection`, in order.
    pub fn types(&self, connection: usize) -> Vec<String> {
        self.frames
            .iter()
            .filter(|(c, _)| *c == connection)
            .map(|(_, f)| f["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Frames of `ty` across all connections.
    pub fn frames_of(&self, ty: &str) -> Vec<Value> {
        self.frames
            .iter()
            .filter(|(_, f)| f["type"] == ty)
            .map(|(_, f)| f.clone())
            .collect()
    }

    /// `(eventType, symbol)` pairs subscribed on `connection`.
    pub fn subscriptions(&self, connection: usize) -> Vec<(String, String)> {
        self.frames
            .iter()
            .filter(|(c, f)| *c == connection && f["type"] == "FEED_SUBSCRIPTION")
            .flat_map(|(_, f)| f["add"].as_array().cloned().unwrap_or_default())
            .map(|entry| {
                (
                    entry["type"].as_str().unwrap_or_default().to_string(),
                    entry["symbol"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }
}

// =============================================================================
// Fake Server
// =============================================================================

/// In-process DXLink server on an ephemeral port.
pub struct FakeDxLink {
    /// `ws://` URL of the server.
    pub url: String,
    recorded: Arc<Mutex<Recorded>>,
    task: JoinHandle<()>,
}

impl FakeDxLink {
    /// Start a server running `script`.
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let script = Arc::new(script);

        let task = {
            let recorded = Arc::clone(&recorded);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let index = {
                        let mut rec = recorded.lock();
                        rec.connections += 1;
                        rec.connections - 1
                    };
                    tokio::spawn(serve(
                        stream,
                        index,
                        Arc::clone(&script),
                        Arc::clone(&recorded),
                    ));
                }
            })
        };

        Self {
            url: format!("ws://{addr}"),
            recorded,
            task,
        }
    }

    /// Copy of everything received so far.
    pub fn recorded(&self) -> Recorded {
        self.recorded.lock().clone()
    }

    /// Wait until `condition` holds for the recorded frames.
    pub async fn wait_for(&self, condition: impl Fn(&Recorded) -> bool) -> Recorded {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let rec = self.recorded();
                if condition(&rec) {
                    return rec;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached within 5s")
    }
}

impl Drop for FakeDxLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, index: usize, script: Arc<Script>, recorded: Arc<Mutex<Recorded>>) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    while let Some(Ok(message)) = ws.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let frame: Value = serde_json::from_str(text.as_str()).unwrap();
        recorded.lock().frames.push((index, frame.clone()));

        let mut replies = Vec::new();
        let mut drop_after = false;

        match frame["type"].as_str().unwrap_or_default() {
            "SETUP" if script.silent => {}
            "SETUP" => {
                replies.push(json!({"type": "SETUP", "channel": 0, "keepaliveTimeout": 60, "version": "1.0.0-fake"}));
                replies.push(json!({"type": "AUTH_STATE", "channel": 0, "state": "UNAUTHORIZED"}));
            }
            "AUTH" => {
                let token = frame["token"].as_str().unwrap_or_default();
                let state = if script.accepted_tokens.iter().any(|t| t == token) {
                    "AUTHORIZED"
                } else {
                    "UNAUTHORIZED"
                };
                replies.push(json!({"type": "AUTH_STATE", "channel": 0, "state": state}));
            }
            "CHANNEL_REQUEST" => {
                replies.push(json!({"type": "CHANNEL_OPENED", "channel": frame["channel"], "service": "FEED"}));
                if script.keepalive_after_open {
                    replies.push(json!({"type": "KEEPALIVE", "channel": 0}));
                }
            }
            "FEED_SETUP" => {
                replies.push(json!({"type": "FEED_CONFIG", "channel": frame["channel"], "dataFormat": "FULL"}));
            }
            "FEED_SUBSCRIPTION" => {
                let entries = frame["add"].as_array().cloned().unwrap_or_default();
                let underlying = entries.iter().any(|e| e["symbol"] == script.underlying.as_str());
                let contracts = entries
                    .iter()
                    .any(|e| e["type"] == "Greeks" && e["symbol"] != script.underlying.as_str());

                if underlying && entries[0]["type"] == "Trade" && !script.price_events.is_empty() {
                    replies.push(feed_data(&frame["channel"], &script.price_events));
                }
                if contracts && !script.contract_events.is_empty() {
                    replies.push(feed_data(&frame["channel"], &script.contract_events));
                    drop_after = script.drop_first_connection_after_feed && index == 0;
                }
            }
            "CHANNEL_CANCEL" => {
                replies.push(json!({"type": "CHANNEL_CLOSED", "channel": frame["channel"]}));
            }
            _ => {}
        }

        for reply in replies {
            if ws.send(Message::text(reply.to_string())).await.is_err() {
                return;
            }
        }
        if drop_after {
            // no close frame: the peer sees the stream end
            tokio::time::sleep(Duration::from_millis(50)).await;
            return;
        }
    }
}

fn feed_data(channel: &Value, events: &[Value]) -> Value {
    json!({"type": "FEED_DATA", "channel": channel, "data": events})
}

// =============================================================================
// Event Builders
// =============================================================================

/// Greeks event.
pub fn greeks(symbol: &str, gamma: f64) -> Value {
    json!({"eventType": "Greeks", "eventSymbol": symbol, "gamma": gamma, "delta": 0.5, "volatility": 0.14})
}

/// Summary event.
pub fn summary(symbol: &str, open_interest: u64) -> Value {
    json!({"eventType": "Summary", "eventSymbol": symbol, "openInterest": open_interest})
}

/// Trade event.
pub fn trade(symbol: &str, price: f64, day_volume: u64) -> Value {
    json!({"eventType": "Trade", "eventSymbol": symbol, "price": price, "dayVolume": day_volume})
}

/// Quote event.
pub fn quote(symbol: &str, bid: f64, ask: f64) -> Value {
    json!({"eventType": "Quote", "eventSymbol": symbol, "bidPrice": bid, "askPrice": ask})
}

/// SPX 0DTE ladder around 6003 with a net GEX of 2,041,014 and a flip at 6001.
pub fn reference_feed() -> Vec<Value> {
    [
        (".SPXW251016C6000", 0.002, 1_000),
        (".SPXW251016P6000", 0.001, 3_000),
        (".SPXW251016C6005", 0.003, 2_000),
        (".SPXW251016P6005", 0.002, 1_000),
        (".SPXW251016C6010", 0.001, 500),
        (".SPXW251016P6010", 0.0005, 200),
    ]
    .into_iter()
    .flat_map(|(symbol, gamma, oi)| [greeks(symbol, gamma), summary(symbol, oi)])
    .collect()
}

// =============================================================================
// Token Source
// =============================================================================

/// Hands out tokens in order; invalidation moves to the next one.
pub struct ScriptedTokens {
    tokens: Mutex<VecDeque<String>>,
    issued: AtomicUsize,
    invalidated: AtomicUsize,
}

impl ScriptedTokens {
    /// Source yielding `tokens` in order. The last token repeats.
    pub fn new(tokens: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            tokens: Mutex::new(tokens.iter().map(|t| (*t).to_string()).collect()),
            issued: AtomicUsize::new(0),
            invalidated: AtomicUsize::new(0),
        })
    }

    /// Source that always yields the accepted token.
    pub fn good() -> Arc<Self> {
        Self::new(&[GOOD_TOKEN])
    }

    /// Tokens handed out.
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    /// Invalidation calls.
    pub fn invalidated(&self) -> usize {
        self.invalidated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamerTokenSource for ScriptedTokens {
    async fn streamer_token(&self) -> Result<String, AuthError> {
        self.issued.fetch_add(1, Ordering::SeqCst);
        self.tokens
            .lock()
            .front()
            .cloned()
            .ok_or_else(|| AuthError::Unreachable("no scripted token".to_string()))
    }

    async fn invalidate_streamer_token(&self) {
        self.invalidated.fetch_add(1, Ordering::SeqCst);
        let mut tokens = self.tokens.lock();
        if tokens.len() > 1 {
            tokens.pop_front();
        }
    }
}
