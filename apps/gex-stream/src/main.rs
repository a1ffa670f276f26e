//! GEX Stream Binary
//!
//! Runs GEX collection sessions and prints each snapshot as one JSON line on
//! stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin gex-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required (with `GEX_CREDENTIAL_SOURCE=env`)
//! - `TASTYTRADE_CLIENT_ID`, `TASTYTRADE_CLIENT_SECRET`, `TASTYTRADE_REFRESH_TOKEN`
//!
//! ## Optional
//! - `GEX_CREDENTIAL_SOURCE`: env | file (default: env), `GEX_SECRETS_PATH`
//! - `GEX_UNDERLYING`: SPX | NDX | SPY | QQQ | IWM | DIA (default: SPX)
//! - `GEX_EXPIRATION`: YYMMDD (default: today)
//! - `GEX_STRIKES_ABOVE` / `GEX_STRIKES_BELOW` (default: 25)
//! - `GEX_COLLECT_SECS` (default: 15), `GEX_PRICE_TIMEOUT_SECS` (default: 5)
//! - `GEX_SESSION_DEADLINE_SECS` (default: 120)
//! - `GEX_REFRESH_INTERVAL_SECS`: repeat interval, 0 runs once (default: 0)
//! - `GEX_FALLBACK_PRICE`: price used when none streams in, or `preset`
//! - `GEX_TOKEN_CACHE_PATH` (default: .gex_tokens.json)
//! - `GEX_METRICS_PORT`: Prometheus port, 0 disables (default: 0)
//! - `TASTYTRADE_API_URL`, `DXLINK_URL`
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: log filter (default: gex_stream=info,warn)

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use gex_stream::application::ports::CredentialProvider;
use gex_stream::infrastructure::metrics;
use gex_stream::infrastructure::tastytrade::{EnvCredentialProvider, SecretFileCredentialProvider};
use gex_stream::infrastructure::telemetry;
use gex_stream::{
    CollectionError, CollectionOrchestrator, CredentialSource, DxLinkSymbology, GexConfig, GexSnapshot,
    TokenManager, TokenStore, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // already installed is fine
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting GEX collector");

    let config = GexConfig::from_env().context("invalid configuration")?;
    init_metrics(config.metrics_port).context("failed to install metrics recorder")?;
    log_config(&config);

    let provider: Arc<dyn CredentialProvider> = match &config.credential_source {
        CredentialSource::Env => Arc::new(EnvCredentialProvider::new()),
        CredentialSource::File(path) => Arc::new(SecretFileCredentialProvider::new(path.clone())),
    };
    let store = Arc::new(TokenStore::open(config.token_cache_path.clone()));
    let tokens = Arc::new(
        TokenManager::new(config.token_manager_config(), provider, store)
            .context("failed to build token manager")?,
    );

    let orchestrator = Arc::new(CollectionOrchestrator::new(
        tokens,
        Arc::new(DxLinkSymbology),
        config.orchestrator_config(),
    ));

    let shutdown = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown.clone(), Arc::clone(&orchestrator)));

    let refresh = config.collection.refresh_interval;
    loop {
        let params = config
            .collection_params(chrono::Local::now().date_naive())
            .context("invalid collection parameters")?;

        match orchestrator.start_collection(&params).await {
            Ok(snapshot) => print_snapshot(&snapshot)?,
            Err(CollectionError::Stopped) => {
                tracing::info!("Collection stopped by shutdown");
                break;
            }
            Err(e) if refresh.is_zero() => return Err(e).context("collection failed"),
            Err(e) => tracing::error!(error = %e, "Collection failed, retrying next interval"),
        }

        if refresh.is_zero() || shutdown.is_cancelled() {
            break;
        }

        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(refresh) => {}
        }
    }

    if let Some(rendered) = metrics::render() {
        tracing::debug!(metrics = %rendered, "Final metrics");
    }
    tracing::info!(snapshots = orchestrator.history().len(), "GEX collector stopped");
    Ok(())
}

/// Write one snapshot as a JSON line.
fn print_snapshot(snapshot: &GexSnapshot) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer(&mut out, snapshot).context("failed to serialize snapshot")?;
    writeln!(out).context("failed to write snapshot")?;
    out.flush().context("failed to flush stdout")?;
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &GexConfig) {
    tracing::info!(
        underlying = %config.collection.underlying,
        expiration = ?config.collection.expiration,
        strikes_above = config.collection.strikes_above,
        strikes_below = config.collection.strikes_below,
        collect_secs = config.collection.collect_for.as_secs(),
        refresh_secs = config.collection.refresh_interval.as_secs(),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        api_url = %config.api_url,
        dxlink_url = %config.dxlink_url,
        token_cache = %config.token_cache_path.display(),
        "Endpoints"
    );
}

/// Wait for SIGTERM or Ctrl+C, then end the running session early.
async fn await_shutdown(shutdown: CancellationToken, orchestrator: Arc<CollectionOrchestrator>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown.cancel();
    orchestrator.stop();
}
