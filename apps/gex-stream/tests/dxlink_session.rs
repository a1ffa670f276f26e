//! DXLink Client Session Tests
//!
//! Drives `DxLinkClient` against an in-process server that speaks the DXLink
//! handshake, and checks state transitions, subscription bookkeeping and
//! teardown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use common::{FakeDxLink, GOOD_TOKEN, Script};
use gex_stream::infrastructure::dxlink::{EventType, KeepaliveConfig, MarketEvent};
use gex_stream::{AuthError, ConnectionState, DxLinkClient, DxLinkClientConfig, StreamError, TransportError};

fn client_for(server: &FakeDxLink) -> DxLinkClient {
    let mut config = DxLinkClientConfig::new(server.url.clone());
    config.connect_timeout = Duration::from_secs(2);
    config.handshake_timeout = Duration::from_secs(2);
    DxLinkClient::new(config)
}

fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn handshake_opens_feed_channel() {
    let server = FakeDxLink::start(Script::default()).await;
    let client = client_for(&server);

    client.connect(GOOD_TOKEN).await.unwrap();

    assert_eq!(client.state(), ConnectionState::ChannelOpen);
    assert_eq!(client.channel_id(), Some(1));
    assert!(client.subscriptions().is_empty());

    let recorded = server
        .wait_for(|r| r.types(0).contains(&"FEED_SETUP".to_string()))
        .await;
    assert_eq!(
        recorded.types(0),
        vec!["SETUP", "AUTH", "CHANNEL_REQUEST", "FEED_SETUP"]
    );

    let setup = &recorded.frames_of("FEED_SETUP")[0];
    assert_eq!(setup["acceptDataFormat"], "FULL");
    assert_eq!(setup["channel"], 1);

    client.close().await;
}

#[tokio::test]
async fn rejected_token_leaves_client_disconnected() {
    let server = FakeDxLink::start(Script::default()).await;
    let client = client_for(&server);

    let err = client.connect("expired-token").await.unwrap_err();

    assert!(
        matches!(err, StreamError::Auth(AuthError::TokenRejected(_))),
        "unexpected error: {err:?}"
    );
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.subscriptions().is_empty());

    // a fresh token works on the same client
    client.connect(GOOD_TOKEN).await.unwrap();
    assert_eq!(client.state(), ConnectionState::ChannelOpen);
    client.close().await;
}

#[tokio::test]
async fn silent_server_times_out_handshake() {
    let server = FakeDxLink::start(Script {
        silent: true,
        ..Script::default()
    })
    .await;
    let mut config = DxLinkClientConfig::new(server.url.clone());
    config.handshake_timeout = Duration::from_millis(200);
    let client = DxLinkClient::new(config);

    let err = client.connect(GOOD_TOKEN).await.unwrap_err();

    assert!(
        matches!(err, StreamError::Transport(TransportError::HandshakeTimeout(_))),
        "unexpected error: {err:?}"
    );
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn connect_twice_is_invalid_state() {
    let server = FakeDxLink::start(Script::default()).await;
    let client = client_for(&server);
    client.connect(GOOD_TOKEN).await.unwrap();

    let err = client.connect(GOOD_TOKEN).await.unwrap_err();
    assert!(matches!(
        err,
        StreamError::InvalidState {
            operation: "connect",
            state: ConnectionState::ChannelOpen
        }
    ));

    client.close().await;
}

// =============================================================================
// Subscriptions
// =============================================================================

#[tokio::test]
async fn subscriptions_merge_as_union() {
    let server = FakeDxLink::start(Script {
        contract_events: Vec::new(),
        ..Script::default()
    })
    .await;
    let client = client_for(&server);
    client.connect(GOOD_TOKEN).await.unwrap();

    let added = client
        .subscribe(&symbols(&["A", "B"]), &[EventType::Greeks])
        .await
        .unwrap();
    assert_eq!(added, 2);
    assert_eq!(client.state(), ConnectionState::Subscribed);

    let added = client
        .subscribe(&symbols(&["B", "C"]), &[EventType::Greeks, EventType::Summary])
        .await
        .unwrap();
    assert_eq!(added, 3);

    // nothing new, nothing sent
    let added = client
        .subscribe(&symbols(&["A"]), &[EventType::Greeks])
        .await
        .unwrap();
    assert_eq!(added, 0);

    assert_eq!(client.subscriptions().len(), 5);
    assert!(client.subscriptions().contains(&(EventType::Summary, "C".to_string())));

    let recorded = server.wait_for(|r| r.subscriptions(0).len() == 5).await;
    assert_eq!(recorded.frames_of("FEED_SUBSCRIPTION").len(), 3);
    let mut sent = recorded.subscriptions(0);
    sent.sort();
    sent.dedup();
    assert_eq!(sent.len(), 5);

    client.close().await;
}

#[tokio::test]
async fn subscribe_requires_open_channel() {
    let server = FakeDxLink::start(Script::default()).await;
    let client = client_for(&server);

    let err = client
        .subscribe(&symbols(&["SPX"]), &[EventType::Trade])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StreamError::InvalidState {
            operation: "subscribe",
            state: ConnectionState::Disconnected
        }
    ));
}

#[tokio::test]
async fn feed_events_reach_consumer() {
    let server = FakeDxLink::start(Script::default()).await;
    let client = client_for(&server);
    let mut events = client.events();
    client.connect(GOOD_TOKEN).await.unwrap();

    client
        .subscribe(&symbols(&["SPX"]), &[EventType::Trade, EventType::Quote])
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    let MarketEvent::Trade(trade) = event else {
        panic!("expected a trade, got {event:?}");
    };
    assert_eq!(trade.symbol, "SPX");
    assert_eq!(trade.price, Some(6003.0));

    let stats = client.dispatch_stats();
    assert!(stats.dispatched >= 1);
    assert_eq!(stats.dropped, 0);

    client.close().await;
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn close_is_idempotent_and_cancels_channel() {
    let server = FakeDxLink::start(Script::default()).await;
    let client = client_for(&server);
    client.connect(GOOD_TOKEN).await.unwrap();

    client.close().await;
    client.close().await;

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.disconnected().is_cancelled());

    let recorded = server
        .wait_for(|r| !r.frames_of("CHANNEL_CANCEL").is_empty())
        .await;
    assert_eq!(recorded.frames_of("CHANNEL_CANCEL").len(), 1);
    assert_eq!(recorded.frames_of("CHANNEL_CANCEL")[0]["channel"], 1);
}

#[tokio::test]
async fn dropped_connection_resets_session() {
    let server = FakeDxLink::start(Script {
        drop_first_connection_after_feed: true,
        ..Script::default()
    })
    .await;
    let client = client_for(&server);
    client.connect(GOOD_TOKEN).await.unwrap();
    let disconnected = client.disconnected();

    client
        .subscribe(&symbols(&[".SPXW251016C6000"]), &[EventType::Greeks])
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), disconnected.cancelled())
        .await
        .expect("connection loss was not reported");

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.subscriptions().is_empty());
    assert!(client.channel_id().is_none());
    assert!(client.take_disconnect_reason().is_some());

    // reconnecting starts a fresh session
    client.connect(GOOD_TOKEN).await.unwrap();
    assert_eq!(client.state(), ConnectionState::ChannelOpen);
    assert!(client.subscriptions().is_empty());
    assert_eq!(server.recorded().connections, 2);

    client.close().await;
}

// =============================================================================
// Keep-alive
// =============================================================================

#[tokio::test]
async fn server_keepalive_is_answered() {
    let server = FakeDxLink::start(Script {
        keepalive_after_open: true,
        ..Script::default()
    })
    .await;
    let client = client_for(&server);
    client.connect(GOOD_TOKEN).await.unwrap();

    server
        .wait_for(|r| r.types(0).contains(&"KEEPALIVE".to_string()))
        .await;

    client.close().await;
}

#[tokio::test]
async fn silence_after_open_trips_keepalive_timeout() {
    let server = FakeDxLink::start(Script::default()).await;
    let mut config = DxLinkClientConfig::new(server.url.clone());
    config.keepalive = KeepaliveConfig::new(Duration::from_millis(50), Duration::from_millis(200));
    let client = DxLinkClient::new(config);

    client.connect(GOOD_TOKEN).await.unwrap();
    let disconnected = client.disconnected();

    tokio::time::timeout(Duration::from_secs(3), disconnected.cancelled())
        .await
        .expect("stale connection was not detected");

    assert_eq!(client.state(), ConnectionState::Disconnected);
    let reason = client.take_disconnect_reason().unwrap();
    assert!(reason.contains("keep-alive"), "unexpected reason: {reason}");
}
