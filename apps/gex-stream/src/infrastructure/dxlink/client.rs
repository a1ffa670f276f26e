//! DXLink Protocol Client
//!
//! Owns one WebSocket connection at a time and drives it through the DXLink
//! session handshake:
//!
//! ```text
//! DISCONNECTED → CONNECTING → SETUP_SENT → AUTHENTICATING → CHANNEL_OPEN → SUBSCRIBED
//!       ▲                                                                      │
//!       └──────────────────────────── CLOSING ◄────────────────────────────────┘
//! ```
//!
//! A spawned connection task owns both halves of the socket. The caller talks
//! to it through a command channel (subscriptions, close) and receives market
//! events through the [`EventDispatcher`] queue, so a slow consumer never
//! stalls the read loop.
//!
//! # Sessions
//!
//! Channel id and subscriptions live in a [`ProtocolSession`] created on
//! every `connect()` and dropped when the connection ends. A reconnect always
//! starts with an empty subscription set.
//!
//! # Failure
//!
//! Any transport failure moves the client to `DISCONNECTED` and fires the
//! token returned by [`DxLinkClient::disconnected`]. The client never
//! reconnects on its own; that decision belongs to the caller.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::JsonCodec;
use super::dispatch::{DEFAULT_EVENT_QUEUE_CAPACITY, DispatchStats, EventDispatcher, EventReceiver};
use super::heartbeat::{KeepaliveConfig, KeepaliveEvent, KeepaliveMonitor, KeepaliveState};
use super::messages::{AuthStatus, ClientMessage, EventType, FEED_CHANNEL, ServerMessage};
use crate::error::{AuthError, CollectionError, TransportError};
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const COMMAND_BUFFER: usize = 64;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

// =============================================================================
// State
// =============================================================================

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection.
    Disconnected,
    /// Transport being opened.
    Connecting,
    /// SETUP sent, waiting for the server.
    SetupSent,
    /// AUTH sent, waiting for authorization and the feed channel.
    Authenticating,
    /// Feed channel open, nothing subscribed yet.
    ChannelOpen,
    /// At least one subscription issued.
    Subscribed,
    /// Graceful teardown in progress.
    Closing,
}

impl ConnectionState {
    /// Wire-style name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::SetupSent => "SETUP_SENT",
            Self::Authenticating => "AUTHENTICATING",
            Self::ChannelOpen => "CHANNEL_OPEN",
            Self::Subscribed => "SUBSCRIBED",
            Self::Closing => "CLOSING",
        }
    }

    /// True once the feed channel is usable.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::ChannelOpen | Self::Subscribed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol client errors.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The server refused the streamer token.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The operation is not allowed in the current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// State at the time.
        state: ConnectionState,
    },
}

impl From<StreamError> for CollectionError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Auth(e) => Self::Auth(e),
            StreamError::Transport(e) => Self::Transport(e),
            e @ StreamError::InvalidState { .. } => Self::Client(e.to_string()),
        }
    }
}

/// Per-connection protocol state.
#[derive(Debug, Default, Clone)]
pub struct ProtocolSession {
    /// Feed channel assigned by the server, once open.
    pub channel_id: Option<u32>,
    /// `(type, symbol)` pairs subscribed on this connection.
    pub subscriptions: HashSet<(EventType, String)>,
}

#[derive(Debug)]
struct Shared {
    state: RwLock<ConnectionState>,
    session: Mutex<Option<ProtocolSession>>,
    disconnect_reason: Mutex<Option<String>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            session: Mutex::new(None),
            disconnect_reason: Mutex::new(None),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "DXLink state transition");
        }
    }

    /// Lock order is session, then state.
    fn reset(&self) {
        let mut session = self.session.lock();
        session.take();
        self.set_state(ConnectionState::Disconnected);
    }
}

// =============================================================================
// Handshake
// =============================================================================

/// What the connection task should do after a handshake frame.
#[derive(Debug, PartialEq)]
enum HandshakeStep {
    /// Nothing to do.
    Wait,
    /// Send frames and move to `next`.
    Advance {
        send: Vec<ClientMessage>,
        next: ConnectionState,
    },
    /// Feed channel confirmed.
    Open {
        channel: u32,
        send: Vec<ClientMessage>,
    },
}

/// Pure handshake transitions for `SETUP_SENT` and `AUTHENTICATING`.
///
/// The server announces `AUTH_STATE UNAUTHORIZED` once as a prompt right after
/// SETUP. That first prompt is tolerated; any further `UNAUTHORIZED`, or an
/// `ERROR` while authenticating, means the token was refused.
struct Handshake {
    token: String,
    prompt_seen: bool,
    channel_requested: bool,
}

impl Handshake {
    const fn new(token: String) -> Self {
        Self {
            token,
            prompt_seen: false,
            channel_requested: false,
        }
    }

    fn advance(
        &mut self,
        state: ConnectionState,
        message: &ServerMessage,
    ) -> Result<HandshakeStep, StreamError> {
        use ConnectionState::{Authenticating, SetupSent};

        match (state, message) {
            (SetupSent, ServerMessage::Setup { .. }) => Ok(self.send_auth()),
            (
                SetupSent,
                ServerMessage::AuthState {
                    state: AuthStatus::Unauthorized,
                    ..
                },
            ) => {
                self.prompt_seen = true;
                Ok(self.send_auth())
            }
            (
                SetupSent | Authenticating,
                ServerMessage::AuthState {
                    state: AuthStatus::Authorized,
                    ..
                },
            ) => {
                if self.channel_requested {
                    return Ok(HandshakeStep::Wait);
                }
                self.channel_requested = true;
                Ok(HandshakeStep::Advance {
                    send: vec![ClientMessage::feed_channel_request(FEED_CHANNEL)],
                    next: Authenticating,
                })
            }
            (
                Authenticating,
                ServerMessage::AuthState {
                    state: AuthStatus::Unauthorized,
                    ..
                },
            ) => {
                if self.prompt_seen {
                    return Err(AuthError::TokenRejected(
                        "server reported UNAUTHORIZED after AUTH".to_string(),
                    )
                    .into());
                }
                self.prompt_seen = true;
                Ok(HandshakeStep::Wait)
            }
            (Authenticating, ServerMessage::ChannelOpened { channel, .. }) if self.channel_requested => {
                Ok(HandshakeStep::Open {
                    channel: *channel,
                    send: vec![ClientMessage::feed_setup(*channel)],
                })
            }
            (Authenticating, ServerMessage::Error { error, message, .. }) => {
                Err(AuthError::TokenRejected(format!("{error}: {message}")).into())
            }
            (_, ServerMessage::Error { error, message, .. }) => Err(TransportError::Protocol(
                format!("error during handshake: {error}: {message}"),
            )
            .into()),
            (_, ServerMessage::ChannelClosed { channel }) => Err(TransportError::Protocol(
                format!("channel {channel} closed during handshake"),
            )
            .into()),
            _ => Ok(HandshakeStep::Wait),
        }
    }

    fn send_auth(&self) -> HandshakeStep {
        HandshakeStep::Advance {
            send: vec![ClientMessage::auth(self.token.clone())],
            next: ConnectionState::Authenticating,
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Client configuration.
#[derive(Debug, Clone)]
pub struct DxLinkClientConfig {
    /// WebSocket endpoint.
    pub url: String,
    /// Limit on opening the transport.
    pub connect_timeout: Duration,
    /// Limit on SETUP through CHANNEL_OPENED.
    pub handshake_timeout: Duration,
    /// Keep-alive timing.
    pub keepalive: KeepaliveConfig,
    /// Unread events held per consumer before the oldest are dropped.
    pub event_queue_capacity: usize,
}

impl DxLinkClientConfig {
    /// Defaults for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            keepalive: KeepaliveConfig::default(),
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }
}

// =============================================================================
// Client
// =============================================================================

enum Command {
    Send(ClientMessage),
    Shutdown,
}

struct Connection {
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    closed: CancellationToken,
    task: JoinHandle<()>,
}

/// DXLink streaming client.
pub struct DxLinkClient {
    config: DxLinkClientConfig,
    dispatcher: EventDispatcher,
    shared: Arc<Shared>,
    connection: Mutex<Option<Connection>>,
}

impl fmt::Debug for DxLinkClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DxLinkClient")
            .field("url", &self.config.url)
            .field("state", &self.shared.state())
            .finish_non_exhaustive()
    }
}

impl DxLinkClient {
    /// Create a disconnected client.
    #[must_use]
    pub fn new(config: DxLinkClientConfig) -> Self {
        let dispatcher = EventDispatcher::new(config.event_queue_capacity);
        Self {
            config,
            dispatcher,
            shared: Arc::new(Shared::new()),
            connection: Mutex::new(None),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Subscriptions of the current session.
    #[must_use]
    pub fn subscriptions(&self) -> HashSet<(EventType, String)> {
        self.shared
            .session
            .lock()
            .as_ref()
            .map(|s| s.subscriptions.clone())
            .unwrap_or_default()
    }

    /// Feed channel id of the current session.
    #[must_use]
    pub fn channel_id(&self) -> Option<u32> {
        self.shared.session.lock().as_ref().and_then(|s| s.channel_id)
    }

    /// Attach an event consumer. Events from later connections arrive on the
    /// same receiver.
    #[must_use]
    pub fn events(&self) -> EventReceiver {
        self.dispatcher.subscribe()
    }

    /// Event queue counters.
    #[must_use]
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Token that fires when the current connection ends for any reason.
    /// Already fired when there is no connection.
    #[must_use]
    pub fn disconnected(&self) -> CancellationToken {
        self.connection.lock().as_ref().map_or_else(
            || {
                let token = CancellationToken::new();
                token.cancel();
                token
            },
            |c| c.closed.clone(),
        )
    }

    /// Why the last connection ended, if it failed.
    #[must_use]
    pub fn take_disconnect_reason(&self) -> Option<String> {
        self.shared.disconnect_reason.lock().take()
    }

    /// Open the transport and complete the handshake with `token`.
    ///
    /// Returns once the feed channel is open.
    ///
    /// # Errors
    ///
    /// - [`StreamError::InvalidState`] unless disconnected
    /// - [`TransportError`] on connect/handshake timeout or transport failure
    /// - [`AuthError::TokenRejected`] when the server refuses the token; the
    ///   connection is torn down and the token must not be reused
    pub async fn connect(&self, token: &str) -> Result<(), StreamError> {
        let state = self.state();
        if state != ConnectionState::Disconnected {
            return Err(StreamError::InvalidState {
                operation: "connect",
                state,
            });
        }

        // previous connection task has already exited
        self.connection.lock().take();
        self.shared.disconnect_reason.lock().take();
        *self.shared.session.lock() = Some(ProtocolSession::default());
        self.shared.set_state(ConnectionState::Connecting);

        tracing::info!(url = %self.config.url, "Connecting to DXLink");

        let ws = match self.open_transport().await {
            Ok(ws) => ws,
            Err(e) => {
                self.shared.reset();
                return Err(e.into());
            }
        };

        let (write, read) = ws.split();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let closed = CancellationToken::new();

        let task = ConnectionTask {
            shared: Arc::clone(&self.shared),
            codec: JsonCodec::new(),
            dispatcher: self.dispatcher.clone(),
            keepalive: self.config.keepalive.clone(),
            write,
            read,
            commands: commands_rx,
            cancel: cancel.clone(),
            handshake: Some(Handshake::new(token.to_string())),
            ready: Some(ready_tx),
        };
        let handle = tokio::spawn(task.run(closed.clone()));

        *self.connection.lock() = Some(Connection {
            commands: commands_tx,
            cancel,
            closed,
            task: handle,
        });

        let outcome = match tokio::time::timeout(self.config.handshake_timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed("connection task ended during handshake".to_string()).into()),
            Err(_) => Err(TransportError::HandshakeTimeout(self.config.handshake_timeout).into()),
        };

        match outcome {
            Ok(()) => {
                tracing::info!(channel = ?self.channel_id(), "DXLink feed channel open");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "DXLink handshake failed");
                self.teardown().await;
                Err(e)
            }
        }
    }

    async fn open_transport(&self) -> Result<WsStream, TransportError> {
        let connect = tokio_tungstenite::connect_async(self.config.url.as_str());
        match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(TransportError::Connect {
                url: self.config.url.clone(),
                message: e.to_string(),
            }),
            Err(_) => Err(TransportError::ConnectTimeout(self.config.connect_timeout)),
        }
    }

    /// Subscribe `symbols` to each of `event_types`.
    ///
    /// Pairs already subscribed on this session are skipped. Returns the
    /// number of new `(type, symbol)` pairs. Pairs are recorded on the
    /// session only once their batch has been handed to the connection.
    ///
    /// # Errors
    ///
    /// - [`StreamError::InvalidState`] unless the feed channel is open
    /// - [`TransportError::Send`] if the connection task is gone
    pub async fn subscribe(
        &self,
        symbols: &[String],
        event_types: &[EventType],
    ) -> Result<usize, StreamError> {
        let state = self.state();
        if !state.is_open() {
            return Err(StreamError::InvalidState {
                operation: "subscribe",
                state,
            });
        }

        let batches = {
            let guard = self.shared.session.lock();
            let Some(session) = guard.as_ref() else {
                return Err(StreamError::InvalidState {
                    operation: "subscribe",
                    state,
                });
            };
            let channel = session.channel_id.unwrap_or(FEED_CHANNEL);

            let mut batches = Vec::new();
            let mut seen_types = HashSet::new();
            for event_type in event_types.iter().copied().filter(|t| seen_types.insert(*t)) {
                let mut seen_symbols = HashSet::new();
                let fresh: Vec<String> = symbols
                    .iter()
                    .filter(|symbol| seen_symbols.insert(symbol.as_str()))
                    .filter(|symbol| !session.subscriptions.contains(&(event_type, (*symbol).clone())))
                    .cloned()
                    .collect();
                if !fresh.is_empty() {
                    let message = ClientMessage::subscribe(channel, event_type, &fresh);
                    batches.push((event_type, fresh, message));
                }
            }
            batches
        };

        if batches.is_empty() {
            return Ok(0);
        }

        let commands = self
            .connection
            .lock()
            .as_ref()
            .map(|c| c.commands.clone())
            .ok_or_else(|| TransportError::Send("no active connection".to_string()))?;

        let mut added = 0;
        for (event_type, fresh, message) in batches {
            commands
                .send(Command::Send(message))
                .await
                .map_err(|_| TransportError::Send("connection task stopped".to_string()))?;

            // a reset in the meantime means the session is gone
            if let Some(session) = self.shared.session.lock().as_mut() {
                for symbol in fresh {
                    if session.subscriptions.insert((event_type, symbol)) {
                        added += 1;
                    }
                }
            }
        }

        {
            let mut current = self.shared.state.write();
            if *current == ConnectionState::ChannelOpen {
                *current = ConnectionState::Subscribed;
            }
        }

        tracing::debug!(
            added,
            symbols = symbols.len(),
            types = ?event_types,
            "Subscriptions sent"
        );
        Ok(added)
    }

    /// Close the connection. A no-op when already disconnected.
    pub async fn close(&self) {
        let Some(connection) = self.connection.lock().take() else {
            self.shared.reset();
            return;
        };

        let state = self.state();
        if state != ConnectionState::Disconnected {
            self.shared.set_state(ConnectionState::Closing);
            if state.is_open()
                && let Some(channel) = self.channel_id()
            {
                let _ = connection
                    .commands
                    .try_send(Command::Send(ClientMessage::ChannelCancel { channel }));
            }
            let _ = connection.commands.try_send(Command::Shutdown);
        }

        Self::finish(connection).await;
        self.shared.reset();
        tracing::info!("DXLink connection closed");
    }

    async fn teardown(&self) {
        let connection = self.connection.lock().take();
        if let Some(connection) = connection {
            connection.cancel.cancel();
            Self::finish(connection).await;
        }
        self.shared.reset();
    }

    async fn finish(connection: Connection) {
        let mut task = connection.task;
        if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
            tracing::warn!("DXLink connection task did not stop in time, aborting");
            connection.cancel.cancel();
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for DxLinkClient {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.cancel.cancel();
        }
    }
}

// =============================================================================
// Connection Task
// =============================================================================

struct ConnectionTask {
    shared: Arc<Shared>,
    codec: JsonCodec,
    dispatcher: EventDispatcher,
    keepalive: KeepaliveConfig,
    write: WsSink,
    read: WsSource,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    handshake: Option<Handshake>,
    ready: Option<oneshot::Sender<Result<(), StreamError>>>,
}

impl ConnectionTask {
    async fn run(mut self, closed: CancellationToken) {
        let result = self.drive().await;

        self.shared.reset();
        match result {
            Ok(()) => {
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(Err(TransportError::Closed("closed during handshake".to_string()).into()));
                }
            }
            Err(e) => {
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(Err(e));
                } else {
                    tracing::warn!(error = %e, "DXLink connection lost");
                    *self.shared.disconnect_reason.lock() = Some(e.to_string());
                }
            }
        }
        closed.cancel();
    }

    async fn drive(&mut self) -> Result<(), StreamError> {
        self.send(&ClientMessage::setup(self.keepalive.timeout_secs()))
            .await?;
        self.shared.set_state(ConnectionState::SetupSent);

        let activity = Arc::new(KeepaliveState::new());
        let (keepalive_tx, mut keepalive_rx) = mpsc::channel(4);
        let keepalive_cancel = self.cancel.child_token();
        let _monitor = tokio::spawn(
            KeepaliveMonitor::new(
                self.keepalive.clone(),
                Arc::clone(&activity),
                keepalive_tx,
                keepalive_cancel.clone(),
            )
            .run(),
        );

        let result = self.event_loop(&activity, &mut keepalive_rx).await;
        keepalive_cancel.cancel();
        result
    }

    async fn event_loop(
        &mut self,
        activity: &KeepaliveState,
        keepalive_rx: &mut mpsc::Receiver<KeepaliveEvent>,
    ) -> Result<(), StreamError> {
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Send(message)) => self.send(&message).await?,
                    Some(Command::Shutdown) | None => {
                        let _ = self.write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                },
                () = self.cancel.cancelled() => {
                    let _ = self.write.send(Message::Close(None)).await;
                    return Ok(());
                }
                Some(event) = keepalive_rx.recv() => match event {
                    KeepaliveEvent::SendKeepalive => self.send(&ClientMessage::keepalive()).await?,
                    KeepaliveEvent::Timeout => {
                        return Err(TransportError::KeepaliveTimeout(self.keepalive.timeout).into());
                    }
                },
                frame = self.read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        activity.record_inbound();
                        self.on_text(text.as_str()).await?;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        activity.record_inbound();
                        self.write
                            .send(Message::Pong(data))
                            .await
                            .map_err(|e| TransportError::Send(e.to_string()))?;
                    }
                    Some(Ok(Message::Pong(_))) => activity.record_inbound(),
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map_or_else(
                            || "server sent close frame".to_string(),
                            |f| format!("server sent close frame: {}", f.reason),
                        );
                        return Err(TransportError::Closed(reason).into());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(TransportError::Closed(e.to_string()).into()),
                    None => return Err(TransportError::Closed("stream ended".to_string()).into()),
                },
            }
        }
    }

    async fn on_text(&mut self, text: &str) -> Result<(), StreamError> {
        metrics::record_frame_received();

        let message = match self.codec.decode(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring undecodable frame");
                return Ok(());
            }
        };

        match message {
            ServerMessage::Keepalive { .. } => self.send(&ClientMessage::keepalive()).await,
            ServerMessage::FeedData { data, .. } => {
                self.on_feed_data(data);
                Ok(())
            }
            ServerMessage::FeedConfig { .. } | ServerMessage::Unknown => Ok(()),
            message if self.handshake.is_some() => self.on_handshake(&message).await,
            ServerMessage::ChannelClosed { channel } => {
                Err(TransportError::Closed(format!("channel {channel} closed by server")).into())
            }
            ServerMessage::AuthState {
                state: AuthStatus::Unauthorized,
                ..
            } => Err(AuthError::TokenRejected("session no longer authorized".to_string()).into()),
            ServerMessage::Error { error, message, .. } => {
                tracing::warn!(error = %error, message = %message, "DXLink error frame");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn on_handshake(&mut self, message: &ServerMessage) -> Result<(), StreamError> {
        let state = self.shared.state();
        let Some(handshake) = self.handshake.as_mut() else {
            return Ok(());
        };

        match handshake.advance(state, message)? {
            HandshakeStep::Wait => {}
            HandshakeStep::Advance { send, next } => {
                for frame in &send {
                    self.send(frame).await?;
                }
                self.shared.set_state(next);
            }
            HandshakeStep::Open { channel, send } => {
                for frame in &send {
                    self.send(frame).await?;
                }
                {
                    let mut session = self.shared.session.lock();
                    if let Some(session) = session.as_mut() {
                        session.channel_id = Some(channel);
                    }
                    self.shared.set_state(ConnectionState::ChannelOpen);
                }
                self.handshake = None;
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(Ok(()));
                }
            }
        }
        Ok(())
    }

    fn on_feed_data(&self, data: Vec<serde_json::Value>) {
        let decoded = self.codec.decode_events(data);
        if decoded.skipped > 0 {
            tracing::trace!(skipped = decoded.skipped, "Skipped feed entries");
        }
        let count = decoded.events.len() as u64;
        for event in decoded.events {
            self.dispatcher.dispatch(event);
        }
        metrics::record_events_dispatched(count);
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<(), StreamError> {
        let text = self
            .codec
            .encode(message)
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.write
            .send(Message::text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        Ok(())
    }
}
