//! Collection Flow Tests
//!
//! End-to-end collection sessions against an in-process DXLink server:
//! price discovery, accumulation, token renewal, reconnects, and the
//! failure outcomes that produce no snapshot.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use common::{FakeDxLink, GOOD_TOKEN, ScriptedTokens, Script, greeks, quote, summary, trade};
use gex_stream::infrastructure::dxlink::ReconnectConfig;
use gex_stream::{
    AuthError, CollectionError, CollectionOrchestrator, CollectionParams, Coverage, DxLinkSymbology,
    OrchestratorConfig, StreamerTokenSource,
};

// =============================================================================
// Setup
// =============================================================================

fn orchestrator(server: &FakeDxLink, tokens: Arc<dyn StreamerTokenSource>) -> CollectionOrchestrator {
    let mut config = OrchestratorConfig::new(server.url.clone());
    config.client.connect_timeout = Duration::from_secs(2);
    config.client.handshake_timeout = Duration::from_secs(2);
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        multiplier: 2.0,
        jitter_factor: 0.0,
        max_attempts: 3,
    };
    config.session_deadline = Duration::from_secs(10);
    CollectionOrchestrator::new(tokens, Arc::new(DxLinkSymbology), config)
}

/// SPX 2025-10-16 with one strike each side of 6005.
fn params() -> CollectionParams {
    let mut params =
        CollectionParams::for_underlying("SPX", NaiveDate::from_ymd_opt(2025, 10, 16).unwrap()).unwrap();
    params.strikes_above = 1;
    params.strikes_below = 1;
    params.collect_for = Duration::from_millis(300);
    params.price_timeout = Duration::from_secs(1);
    params
}

fn assert_reference_profile(net_gex: f64, zero_gamma: Option<f64>) {
    assert!((net_gex - 2_041_014.0).abs() < 1e-6, "net gex {net_gex}");
    assert!((zero_gamma.unwrap() - 6001.0).abs() < 1e-9);
}

// =============================================================================
// Successful Sessions
// =============================================================================

#[tokio::test]
async fn collects_reference_profile() {
    let server = FakeDxLink::start(Script::default()).await;
    let tokens = ScriptedTokens::good();
    let orchestrator = orchestrator(&server, tokens.clone());

    let snapshot = orchestrator.start_collection(&params()).await.unwrap();

    assert_eq!(snapshot.spot_price, 6003.0);
    assert_reference_profile(snapshot.net_gex, snapshot.zero_gamma_level);
    assert_eq!(snapshot.num_options, 6);
    assert_eq!(snapshot.max_gex_strike, Some(6005.0));
    assert_eq!(snapshot.coverage, Coverage::new(6, 6, 6));
    assert!(!snapshot.coverage.partial);

    assert_eq!(orchestrator.history().len(), 1);
    assert!(!orchestrator.is_running());
    assert_eq!(tokens.invalidated(), 0);

    let recorded = server
        .wait_for(|r| !r.frames_of("CHANNEL_CANCEL").is_empty())
        .await;
    let subscribed = recorded.subscriptions(0);
    assert!(subscribed.contains(&("Trade".to_string(), "SPX".to_string())));
    assert!(subscribed.contains(&("Quote".to_string(), "SPX".to_string())));
    for ty in ["Greeks", "Summary", "Trade"] {
        assert!(subscribed.contains(&(ty.to_string(), ".SPXW251016P6010".to_string())));
    }
    // 2 price pairs + 6 contracts x 3 types
    assert_eq!(subscribed.len(), 20);
}

#[tokio::test]
async fn quote_midpoint_sets_spot_without_trade() {
    let server = FakeDxLink::start(Script {
        price_events: vec![quote("SPX", 6002.5, 6003.5)],
        ..Script::default()
    })
    .await;
    let orchestrator = orchestrator(&server, ScriptedTokens::good());

    let snapshot = orchestrator.start_collection(&params()).await.unwrap();

    assert_eq!(snapshot.spot_price, 6003.0);
    assert_reference_profile(snapshot.net_gex, snapshot.zero_gamma_level);
}

#[tokio::test]
async fn fallback_price_used_when_none_streams() {
    let server = FakeDxLink::start(Script {
        price_events: Vec::new(),
        ..Script::default()
    })
    .await;
    let orchestrator = orchestrator(&server, ScriptedTokens::good());
    let mut params = params();
    params.price_timeout = Duration::from_millis(200);
    params.fallback_price = Some(6003.0);

    let snapshot = orchestrator.start_collection(&params).await.unwrap();

    assert_eq!(snapshot.spot_price, 6003.0);
    assert_reference_profile(snapshot.net_gex, snapshot.zero_gamma_level);
}

#[tokio::test]
async fn missing_contracts_mark_coverage_partial() {
    let server = FakeDxLink::start(Script::default()).await;
    let orchestrator = orchestrator(&server, ScriptedTokens::good());
    let mut params = params();
    params.strikes_above = 2;
    params.strikes_below = 2;

    let snapshot = orchestrator.start_collection(&params).await.unwrap();

    assert_eq!(snapshot.coverage.requested, 10);
    assert_eq!(snapshot.coverage.with_data, 6);
    assert!(snapshot.coverage.partial);
    assert_reference_profile(snapshot.net_gex, snapshot.zero_gamma_level);
}

#[tokio::test]
async fn trades_without_greeks_or_open_interest_are_partial() {
    let feed = [
        ".SPXW251016C6000",
        ".SPXW251016P6000",
        ".SPXW251016C6005",
        ".SPXW251016P6005",
        ".SPXW251016C6010",
        ".SPXW251016P6010",
    ]
    .into_iter()
    .map(|symbol| trade(symbol, 1.0, 10))
    .collect();
    let server = FakeDxLink::start(Script {
        contract_events: feed,
        ..Script::default()
    })
    .await;
    let orchestrator = orchestrator(&server, ScriptedTokens::good());

    let snapshot = orchestrator.start_collection(&params()).await.unwrap();

    assert_eq!(snapshot.coverage, Coverage::new(6, 6, 0));
    assert!(snapshot.coverage.partial);
    assert_eq!(snapshot.net_gex, 0.0);
    assert!(snapshot.strikes.iter().all(|s| s.total_volume == 20));
}

#[tokio::test]
async fn events_for_unrequested_symbols_are_ignored() {
    let mut feed = common::reference_feed();
    feed.push(greeks(".SPXW251017C6000", 0.5));
    feed.push(summary(".SPXW251017C6000", 100_000));
    let server = FakeDxLink::start(Script {
        contract_events: feed,
        ..Script::default()
    })
    .await;
    let orchestrator = orchestrator(&server, ScriptedTokens::good());

    let snapshot = orchestrator.start_collection(&params()).await.unwrap();

    assert_eq!(snapshot.num_options, 6);
    assert_reference_profile(snapshot.net_gex, snapshot.zero_gamma_level);
}

// =============================================================================
// Tokens
// =============================================================================

#[tokio::test]
async fn rejected_token_is_renewed_once() {
    let server = FakeDxLink::start(Script::default()).await;
    let tokens = ScriptedTokens::new(&["stale-token", GOOD_TOKEN]);
    let orchestrator = orchestrator(&server, tokens.clone());

    let snapshot = orchestrator.start_collection(&params()).await.unwrap();

    assert_reference_profile(snapshot.net_gex, snapshot.zero_gamma_level);
    assert_eq!(tokens.invalidated(), 1);
    assert_eq!(tokens.issued(), 2);
    assert_eq!(server.recorded().connections, 2);
}

#[tokio::test]
async fn second_rejection_fails_session() {
    let server = FakeDxLink::start(Script {
        accepted_tokens: vec!["only-this-one".to_string()],
        ..Script::default()
    })
    .await;
    let tokens = ScriptedTokens::new(&["stale-token", GOOD_TOKEN]);
    let orchestrator = orchestrator(&server, tokens.clone());

    let err = orchestrator.start_collection(&params()).await.unwrap_err();

    assert!(
        matches!(err, CollectionError::Auth(AuthError::TokenRejected(_))),
        "unexpected error: {err:?}"
    );
    assert_eq!(tokens.invalidated(), 1);
    assert!(orchestrator.history().is_empty());
}

// =============================================================================
// Connection Loss
// =============================================================================

#[tokio::test]
async fn reconnects_and_resubscribes_after_drop() {
    let server = FakeDxLink::start(Script {
        drop_first_connection_after_feed: true,
        ..Script::default()
    })
    .await;
    let orchestrator = orchestrator(&server, ScriptedTokens::good());
    let mut params = params();
    params.collect_for = Duration::from_millis(800);

    let snapshot = orchestrator.start_collection(&params).await.unwrap();

    assert_reference_profile(snapshot.net_gex, snapshot.zero_gamma_level);
    assert!(!snapshot.coverage.partial);

    let recorded = server.recorded();
    assert_eq!(recorded.connections, 2);
    let resubscribed = recorded.subscriptions(1);
    assert!(resubscribed.contains(&("Greeks".to_string(), ".SPXW251016C6000".to_string())));
    assert!(!resubscribed.contains(&("Quote".to_string(), "SPX".to_string())));
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn missing_price_without_fallback_fails() {
    let server = FakeDxLink::start(Script {
        price_events: Vec::new(),
        ..Script::default()
    })
    .await;
    let orchestrator = orchestrator(&server, ScriptedTokens::good());
    let mut params = params();
    params.price_timeout = Duration::from_millis(200);

    let err = orchestrator.start_collection(&params).await.unwrap_err();

    let CollectionError::PriceUnavailable { symbol, waited } = err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(symbol, "SPX");
    assert_eq!(waited, Duration::from_millis(200));
    assert!(orchestrator.history().is_empty());

    // the connection is closed even on failure
    server
        .wait_for(|r| !r.frames_of("CHANNEL_CANCEL").is_empty())
        .await;
}

#[tokio::test]
async fn silent_contracts_yield_no_data() {
    let server = FakeDxLink::start(Script {
        contract_events: Vec::new(),
        ..Script::default()
    })
    .await;
    let orchestrator = orchestrator(&server, ScriptedTokens::good());

    let err = orchestrator.start_collection(&params()).await.unwrap_err();

    assert!(matches!(err, CollectionError::NoData { requested: 6 }), "unexpected error: {err:?}");
    assert!(orchestrator.history().is_empty());
}

#[tokio::test]
async fn session_deadline_bounds_collection() {
    let server = FakeDxLink::start(Script::default()).await;
    let mut config = OrchestratorConfig::new(server.url.clone());
    config.session_deadline = Duration::from_millis(400);
    let orchestrator =
        CollectionOrchestrator::new(ScriptedTokens::good(), Arc::new(DxLinkSymbology), config);
    let mut params = params();
    params.collect_for = Duration::from_secs(30);

    let err = orchestrator.start_collection(&params).await.unwrap_err();

    assert!(matches!(err, CollectionError::DeadlineExceeded(d) if d == Duration::from_millis(400)));
    assert!(!orchestrator.is_running());
}

// =============================================================================
// Stop
// =============================================================================

#[tokio::test]
async fn stop_ends_window_early_and_keeps_data() {
    let server = FakeDxLink::start(Script::default()).await;
    let orchestrator = Arc::new(orchestrator(&server, ScriptedTokens::good()));
    let mut params = params();
    params.collect_for = Duration::from_secs(30);

    let session = {
        let orchestrator = Arc::clone(&orchestrator);
        let params = params.clone();
        tokio::spawn(async move { orchestrator.start_collection(&params).await })
    };

    server
        .wait_for(|r| {
            r.subscriptions(0)
                .contains(&("Trade".to_string(), ".SPXW251016P6010".to_string()))
        })
        .await;
    assert!(orchestrator.is_running());

    // only one session at a time
    let err = orchestrator.start_collection(&params).await.unwrap_err();
    assert!(matches!(err, CollectionError::AlreadyRunning), "unexpected error: {err:?}");

    // let the feed land before ending the window
    tokio::time::sleep(Duration::from_millis(200)).await;
    orchestrator.stop();

    let snapshot = tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .expect("stop did not end the session")
        .unwrap()
        .unwrap();
    assert_reference_profile(snapshot.net_gex, snapshot.zero_gamma_level);
    assert!(!orchestrator.is_running());
}

#[tokio::test]
async fn stop_while_waiting_for_price_ends_session() {
    let server = FakeDxLink::start(Script {
        price_events: Vec::new(),
        ..Script::default()
    })
    .await;
    let orchestrator = Arc::new(orchestrator(&server, ScriptedTokens::good()));
    let mut params = params();
    params.price_timeout = Duration::from_secs(3);

    let session = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.start_collection(&params).await })
    };

    server
        .wait_for(|r| r.subscriptions(0).contains(&("Trade".to_string(), "SPX".to_string())))
        .await;
    orchestrator.stop();

    let err = tokio::time::timeout(Duration::from_secs(1), session)
        .await
        .expect("stop was ignored while waiting for a price")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, CollectionError::Stopped), "unexpected error: {err:?}");
    assert!(!orchestrator.is_running());
    assert!(orchestrator.history().is_empty());

    server
        .wait_for(|r| !r.frames_of("CHANNEL_CANCEL").is_empty())
        .await;
}
