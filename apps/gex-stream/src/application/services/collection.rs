//! Collection Service
//!
//! Drives one bounded collection session end to end:
//!
//! 1. obtain a streamer token and open the DXLink feed channel
//! 2. resolve the underlying price from a Trade or Quote
//! 3. generate the contract ladder around that price and subscribe it
//! 4. fold Greeks / Summary / Trade events into the [`GexEngine`] for the
//!    configured window
//! 5. close the connection and capture a [`GexSnapshot`]
//!
//! The whole session runs under a hard wall-clock deadline and the protocol
//! client is closed on every exit path. Transport drops are retried with
//! backoff inside the remaining budget; a token refused by the server is
//! renewed and retried once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::application::ports::StreamerTokenSource;
use crate::domain::gex::{DEFAULT_HISTORY_CAPACITY, GexEngine, GexSnapshot};
use crate::domain::symbols::{ChainRequest, ContractSymbology, UnderlyingPreset};
use crate::error::{CollectionError, TransportError};
use crate::infrastructure::dxlink::{
    DxLinkClient, DxLinkClientConfig, EventReceiver, EventType, MarketEvent, ReconnectConfig,
    ReconnectPolicy, StreamError,
};
use crate::infrastructure::metrics::{self, CollectionOutcome};

/// Event types subscribed for every option contract.
pub const CONTRACT_EVENTS: [EventType; 3] = [EventType::Greeks, EventType::Summary, EventType::Trade];

/// Event types subscribed on the underlying for price discovery.
pub const PRICE_EVENTS: [EventType; 2] = [EventType::Trade, EventType::Quote];

// =============================================================================
// Parameters
// =============================================================================

/// What to collect.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionParams {
    /// Underlying ticker streamed for the price, e.g. `SPX`.
    pub underlying: String,
    /// Option root prefix, e.g. `SPXW`.
    pub option_root: String,
    /// Strike increment.
    pub increment: f64,
    /// Expiration to track.
    pub expiration: NaiveDate,
    /// Strikes above the centre strike.
    pub strikes_above: u32,
    /// Strikes below the centre strike.
    pub strikes_below: u32,
    /// Accumulation window.
    pub collect_for: Duration,
    /// Limit on waiting for the underlying price.
    pub price_timeout: Duration,
    /// Price used when none arrives in time.
    pub fallback_price: Option<f64>,
}

impl CollectionParams {
    /// Defaults for a preset underlying: 25 strikes each side, 15s window,
    /// 5s price timeout, no fallback.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::InvalidParams`] for an unknown underlying.
    pub fn for_underlying(underlying: &str, expiration: NaiveDate) -> Result<Self, CollectionError> {
        let preset = UnderlyingPreset::lookup(underlying).ok_or_else(|| {
            CollectionError::InvalidParams(format!("unsupported underlying: {underlying}"))
        })?;

        Ok(Self {
            underlying: preset.symbol.to_string(),
            option_root: preset.option_root.to_string(),
            increment: preset.increment,
            expiration,
            strikes_above: 25,
            strikes_below: 25,
            collect_for: Duration::from_secs(15),
            price_timeout: Duration::from_secs(5),
            fallback_price: None,
        })
    }

    /// Check the parameters are usable.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::InvalidParams`] describing the first problem.
    pub fn validate(&self) -> Result<(), CollectionError> {
        let invalid = |msg: &str| Err(CollectionError::InvalidParams(msg.to_string()));

        if self.underlying.trim().is_empty() {
            return invalid("underlying symbol is empty");
        }
        if self.option_root.trim().is_empty() {
            return invalid("option root is empty");
        }
        if !(self.increment.is_finite() && self.increment > 0.0) {
            return invalid("strike increment must be positive");
        }
        if self.collect_for.is_zero() {
            return invalid("collection window must be non-zero");
        }
        if let Some(price) = self.fallback_price
            && !(price.is_finite() && price > 0.0)
        {
            return invalid("fallback price must be positive");
        }
        Ok(())
    }

    /// Use the preset reference price as the fallback price.
    #[must_use]
    pub fn with_preset_fallback(mut self) -> Self {
        if let Some(preset) = UnderlyingPreset::lookup(&self.underlying) {
            self.fallback_price = Some(preset.default_price);
        }
        self
    }

    fn chain_request(&self, spot: f64) -> ChainRequest {
        ChainRequest {
            option_root: self.option_root.clone(),
            spot,
            strikes_above: self.strikes_above,
            strikes_below: self.strikes_below,
            increment: self.increment,
            expiration: self.expiration,
        }
    }
}

/// Session-independent orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// DXLink client settings.
    pub client: DxLinkClientConfig,
    /// Reconnect budget per session.
    pub reconnect: ReconnectConfig,
    /// Hard wall-clock limit for one session.
    pub session_deadline: Duration,
    /// Snapshots retained for trend display.
    pub history_capacity: usize,
}

impl OrchestratorConfig {
    /// Defaults for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: DxLinkClientConfig::new(url),
            reconnect: ReconnectConfig::default(),
            session_deadline: Duration::from_secs(120),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Clears the running-session slot when the session ends or is dropped.
struct ActiveSession<'a>(&'a Mutex<Option<CancellationToken>>);

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        self.0.lock().take();
    }
}

/// Runs collection sessions against one aggregation engine.
pub struct CollectionOrchestrator {
    tokens: Arc<dyn StreamerTokenSource>,
    symbology: Arc<dyn ContractSymbology>,
    engine: Arc<GexEngine>,
    config: OrchestratorConfig,
    active: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for CollectionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionOrchestrator")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl CollectionOrchestrator {
    /// Create an orchestrator with its own engine.
    #[must_use]
    pub fn new(
        tokens: Arc<dyn StreamerTokenSource>,
        symbology: Arc<dyn ContractSymbology>,
        config: OrchestratorConfig,
    ) -> Self {
        let engine = Arc::new(GexEngine::with_history_capacity(
            Arc::clone(&symbology),
            config.history_capacity,
        ));
        Self {
            tokens,
            symbology,
            engine,
            config,
            active: Mutex::new(None),
        }
    }

    /// The aggregation engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<GexEngine> {
        &self.engine
    }

    /// Captured snapshots, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<GexSnapshot> {
        self.engine.history()
    }

    /// True while a session is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }

    /// End the running session's accumulation window early. The session
    /// still closes the connection and produces a snapshot from what it has.
    pub fn stop(&self) {
        if let Some(stop) = self.active.lock().as_ref() {
            tracing::info!("Stopping collection early");
            stop.cancel();
        }
    }

    /// Run one collection session.
    ///
    /// # Errors
    ///
    /// - [`CollectionError::InvalidParams`] for unusable parameters
    /// - [`CollectionError::AlreadyRunning`] when a session is in progress
    /// - [`CollectionError::Stopped`] when [`Self::stop`] is called while
    ///   connecting or waiting for the underlying price
    /// - [`CollectionError::Auth`] / [`CollectionError::Transport`] when the
    ///   session cannot be established or is lost before any data arrived
    /// - [`CollectionError::PriceUnavailable`] when no underlying price
    ///   arrived and no fallback is configured
    /// - [`CollectionError::NoData`] when no contract produced data
    /// - [`CollectionError::DeadlineExceeded`] when the session deadline hit
    pub async fn start_collection(
        &self,
        params: &CollectionParams,
    ) -> Result<GexSnapshot, CollectionError> {
        params.validate()?;

        let stop = CancellationToken::new();
        {
            let mut active = self.active.lock();
            if active.is_some() {
                return Err(CollectionError::AlreadyRunning);
            }
            *active = Some(stop.clone());
        }
        let _active = ActiveSession(&self.active);

        let session_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "collection",
            session = %session_id,
            underlying = %params.underlying,
            expiration = %params.expiration
        );

        let started = Instant::now();
        let client = DxLinkClient::new(self.config.client.clone());
        let deadline = self.config.session_deadline;

        let result = match tokio::time::timeout(
            deadline,
            self.run_session(&client, params, &stop).instrument(span.clone()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CollectionError::DeadlineExceeded(deadline)),
        };

        client.close().instrument(span.clone()).await;

        let elapsed = started.elapsed();
        span.in_scope(|| Self::report(&result, elapsed));

        result
    }

    fn report(result: &Result<GexSnapshot, CollectionError>, elapsed: Duration) {
        match result {
            Ok(snapshot) => {
                let outcome = if snapshot.coverage.partial {
                    CollectionOutcome::Partial
                } else {
                    CollectionOutcome::Complete
                };
                metrics::record_collection(outcome, elapsed);
                tracing::info!(
                    spot = snapshot.spot_price,
                    net_gex = snapshot.net_gex,
                    zero_gamma = ?snapshot.zero_gamma_level,
                    contracts = snapshot.num_options,
                    with_data = snapshot.coverage.with_data,
                    requested = snapshot.coverage.requested,
                    elapsed_ms = elapsed.as_millis(),
                    "Collection complete"
                );
            }
            Err(CollectionError::Stopped) => {
                metrics::record_collection(CollectionOutcome::Stopped, elapsed);
                tracing::info!(elapsed_ms = elapsed.as_millis(), "Collection stopped before data arrived");
            }
            Err(e) => {
                metrics::record_collection(CollectionOutcome::Failed, elapsed);
                tracing::error!(error = %e, elapsed_ms = elapsed.as_millis(), "Collection failed");
            }
        }
    }

    async fn run_session(
        &self,
        client: &DxLinkClient,
        params: &CollectionParams,
        stop: &CancellationToken,
    ) -> Result<GexSnapshot, CollectionError> {
        let mut events = client.events();
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        tokio::select! {
            biased;
            () = stop.cancelled() => return Err(CollectionError::Stopped),
            connected = self.connect(client, &mut policy) => connected?,
        }

        let spot = tokio::select! {
            biased;
            () = stop.cancelled() => return Err(CollectionError::Stopped),
            price = self.resolve_price(client, &mut events, params) => price?,
        };

        let symbols = self.symbology.generate(&params.chain_request(spot));
        if symbols.is_empty() {
            return Err(CollectionError::InvalidParams(
                "strike ladder produced no contracts".to_string(),
            ));
        }

        self.engine.reset(spot);
        client.subscribe(&symbols, &CONTRACT_EVENTS).await?;
        tracing::info!(
            spot,
            contracts = symbols.len(),
            window_secs = params.collect_for.as_secs(),
            "Accumulating option data"
        );

        let requested: HashSet<&str> = symbols.iter().map(String::as_str).collect();
        self.accumulate(client, &mut events, &symbols, &requested, params, &mut policy, stop)
            .await?;

        client.close().await;

        let queue = client.dispatch_stats();
        if queue.dropped > 0 {
            tracing::warn!(
                dropped = queue.dropped,
                dispatched = queue.dispatched,
                "Event queue overflowed, oldest events were dropped"
            );
        }

        let coverage = self.engine.coverage(&symbols);
        metrics::set_contracts_tracked(self.engine.contract_count());
        if coverage.with_data == 0 {
            return Err(CollectionError::NoData {
                requested: coverage.requested,
            });
        }
        if coverage.partial {
            tracing::warn!(
                with_data = coverage.with_data,
                with_gex_inputs = coverage.with_gex_inputs,
                requested = coverage.requested,
                "Partial coverage"
            );
        }

        Ok(self.engine.capture_snapshot(coverage))
    }

    /// Connect, retrying transport failures within the policy budget and a
    /// refused token once with a renewed one.
    async fn connect(
        &self,
        client: &DxLinkClient,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), CollectionError> {
        let mut renewed_token = false;

        loop {
            let token = self.tokens.streamer_token().await?;

            match client.connect(&token).await {
                Ok(()) => return Ok(()),
                Err(StreamError::Auth(e)) if e.is_token_rejected() && !renewed_token => {
                    tracing::warn!(error = %e, "Streamer token rejected, renewing");
                    self.tokens.invalidate_streamer_token().await;
                    renewed_token = true;
                }
                Err(StreamError::Transport(e)) => {
                    let Some(delay) = policy.next_delay() else {
                        return Err(e.into());
                    };
                    metrics::record_reconnect_attempt();
                    tracing::warn!(
                        error = %e,
                        attempt = policy.attempt_count(),
                        delay_ms = delay.as_millis(),
                        "DXLink connect failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Trade price preferred, Quote midpoint accepted.
    async fn resolve_price(
        &self,
        client: &DxLinkClient,
        events: &mut EventReceiver,
        params: &CollectionParams,
    ) -> Result<f64, CollectionError> {
        let underlying = std::slice::from_ref(&params.underlying);
        client.subscribe(underlying, &PRICE_EVENTS).await?;

        let wait = async {
            while let Some(event) = events.recv().await {
                if event.symbol() != params.underlying {
                    continue;
                }
                if let Some(price) = event.trade_price() {
                    return Some(price);
                }
                if let Some(mid) = event.quote_mid() {
                    // a trade queued behind the quote still wins
                    let trade = std::iter::from_fn(|| events.try_recv())
                        .filter(|e| e.symbol() == params.underlying)
                        .find_map(|e| e.trade_price());
                    return Some(trade.unwrap_or(mid));
                }
            }
            None
        };

        let disconnected = client.disconnected();
        let resolved = tokio::select! {
            price = tokio::time::timeout(params.price_timeout, wait) => price.ok().flatten(),
            () = disconnected.cancelled() => {
                let reason = client
                    .take_disconnect_reason()
                    .unwrap_or_else(|| "connection closed".to_string());
                return Err(TransportError::Closed(reason).into());
            }
        };

        match (resolved, params.fallback_price) {
            (Some(price), _) => {
                tracing::info!(symbol = %params.underlying, price, "Underlying price resolved");
                Ok(price)
            }
            (None, Some(fallback)) => {
                tracing::warn!(
                    symbol = %params.underlying,
                    fallback,
                    "No live price, using fallback"
                );
                Ok(fallback)
            }
            (None, None) => Err(CollectionError::PriceUnavailable {
                symbol: params.underlying.clone(),
                waited: params.price_timeout,
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn accumulate(
        &self,
        client: &DxLinkClient,
        events: &mut EventReceiver,
        symbols: &[String],
        requested: &HashSet<&str>,
        params: &CollectionParams,
        policy: &mut ReconnectPolicy,
        stop: &CancellationToken,
    ) -> Result<(), CollectionError> {
        let until = tokio::time::Instant::now() + params.collect_for;
        let mut disconnected = client.disconnected();

        loop {
            tokio::select! {
                () = tokio::time::sleep_until(until) => return Ok(()),
                () = stop.cancelled() => return Ok(()),
                () = disconnected.cancelled() => {
                    let reason = client
                        .take_disconnect_reason()
                        .unwrap_or_else(|| "connection closed".to_string());
                    tracing::warn!(reason = %reason, "DXLink connection lost during collection");

                    match self.resubscribe(client, symbols, policy).await {
                        Ok(()) => disconnected = client.disconnected(),
                        Err(e) if self.engine.coverage(symbols).with_data > 0 => {
                            tracing::warn!(error = %e, "Reconnect failed, keeping data collected so far");
                            return Ok(());
                        }
                        Err(e) => return Err(e),
                    }
                }
                event = events.recv() => match event {
                    Some(event) => self.fold(&event, requested),
                    None => return Err(TransportError::Closed("event queue closed".to_string()).into()),
                },
            }
        }
    }

    async fn resubscribe(
        &self,
        client: &DxLinkClient,
        symbols: &[String],
        policy: &mut ReconnectPolicy,
    ) -> Result<(), CollectionError> {
        let Some(delay) = policy.next_delay() else {
            return Err(TransportError::Closed("reconnect attempts exhausted".to_string()).into());
        };
        metrics::record_reconnect_attempt();
        tracing::info!(
            attempt = policy.attempt_count(),
            delay_ms = delay.as_millis(),
            "Reconnecting to DXLink"
        );
        tokio::time::sleep(delay).await;

        self.connect(client, policy).await?;
        client.subscribe(symbols, &CONTRACT_EVENTS).await?;
        Ok(())
    }

    fn fold(&self, event: &MarketEvent, requested: &HashSet<&str>) {
        if !requested.contains(event.symbol()) {
            return;
        }
        let fields = event.contract_fields();
        if !fields.is_empty() {
            self.engine.update_gamma(event.symbol(), &fields);
        }
    }
}
