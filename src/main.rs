//! Entry point: loads YAML config and Coinbase credentials, wires the
//! concrete adapters (Coinbase REST client, JSON state store, the bundled
//! strategies) into a [`TradingLoop`], and runs it until `--once` or a
//! termination signal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rustrade::application::alert_service::{AlertService, LoggingAlertSink};
use rustrade::application::clock_sync::ClockSyncValidator;
use rustrade::application::execution_engine::ExecutionEngine;
use rustrade::application::health_server::HealthServer;
use rustrade::application::instance_lock::InstanceLock;
use rustrade::application::metrics::Metrics;
use rustrade::application::rate_limiter::RateLimiter;
use rustrade::application::secret_rotation::{default_metadata_path, SecretRotationTracker};
use rustrade::application::strategy_registry::StrategyRegistry;
use rustrade::application::trading_loop::TradingLoop;
use rustrade::application::universe::CachedUniverse;
use rustrade::config::policy_config::OpaqueConfig;
use rustrade::domain::cost_model::{CostConfig, CostModel};
use rustrade::domain::ports::{AlertSeverity, ExchangeClient, Strategy, StateStore};
use rustrade::infrastructure::coinbase::CoinbaseClient;
use rustrade::infrastructure::state_store::JsonStateStore;
use rustrade::strategies::{DualSmaStrategy, StaticUniverseBuilder, ZScoreMeanReversionStrategy};

#[derive(Parser)]
#[command(author, version, about = "Always-on algorithmic trading bot for Coinbase Advanced Trade", long_about = None)]
struct Cli {
    /// Directory containing app.yaml, policy.yaml, signals.yaml, universe.yaml
    #[arg(long, default_value = "config")]
    config_dir: String,

    /// Run a single cycle and exit instead of looping forever
    #[arg(long)]
    once: bool,

    /// Override `loop.interval_seconds` from app.yaml
    #[arg(long)]
    interval: Option<u64>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct StrategiesFile {
    dual_sma: Option<DualSmaFile>,
    zscore_mean_reversion: Option<ZScoreFile>,
}

#[derive(Debug, serde::Deserialize)]
struct DualSmaFile {
    fast_period: usize,
    slow_period: usize,
    threshold: f64,
    trade_notional_usd: Decimal,
}

#[derive(Debug, serde::Deserialize)]
struct ZScoreFile {
    lookback_period: usize,
    entry_threshold: Decimal,
    exit_threshold: Decimal,
    trade_notional_usd: Decimal,
}

/// Builds the strategy set from `signals.yaml`'s `strategies` map, falling
/// back to a single conservatively-sized dual-SMA strategy when the file
/// configures none.
fn build_strategies(signals: &OpaqueConfig) -> Vec<Box<dyn Strategy>> {
    let parsed: StrategiesFile = signals
        .raw
        .get("strategies")
        .and_then(|raw| serde_yaml::from_value(raw.clone()).ok())
        .unwrap_or_default();

    let mut strategies: Vec<Box<dyn Strategy>> = Vec::new();
    if let Some(cfg) = parsed.dual_sma {
        strategies.push(Box::new(DualSmaStrategy::new(cfg.fast_period, cfg.slow_period, cfg.threshold, cfg.trade_notional_usd)));
    }
    if let Some(cfg) = parsed.zscore_mean_reversion {
        strategies.push(Box::new(ZScoreMeanReversionStrategy::new(
            cfg.lookback_period,
            cfg.entry_threshold,
            cfg.exit_threshold,
            cfg.trade_notional_usd,
        )));
    }
    if strategies.is_empty() {
        warn!("signals.yaml configured no strategies, falling back to a default dual-SMA strategy");
        strategies.push(Box::new(DualSmaStrategy::new(10, 30, 0.002, dec!(100))));
    }
    strategies
}

fn parse_severity(raw: &str) -> AlertSeverity {
    match raw.to_ascii_lowercase().as_str() {
        "critical" => AlertSeverity::Critical,
        "info" => AlertSeverity::Info,
        _ => AlertSeverity::Warning,
    }
}

/// Serves `/metrics` in Prometheus text format, mirroring how
/// [`HealthServer`] serves its own status endpoint.
async fn spawn_metrics_server(metrics: Arc<Metrics>, port: u16) {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let metrics = metrics.clone();
            async move { metrics.render() }
        }),
    );
    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                info!(%addr, "metrics server listening");
                if let Err(err) = axum::serve(listener, app).await {
                    tracing::error!(error = %err, "metrics server terminated");
                }
            }
            Err(err) => {
                tracing::error!(error = %err, %addr, "metrics server failed to bind");
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = rustrade::config::load(&cli.config_dir).context("failed to load configuration")?;
    let rustrade::config::LoadedConfig { app, policy, signals, universe, credentials, config_hash, .. } = loaded;

    let filter = EnvFilter::try_new(&app.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let mode = app.app.mode;
    info!(?mode, config_hash = %config_hash, "rustrade starting up");

    let state_dir = PathBuf::from("state");
    std::fs::create_dir_all(&state_dir).context("failed to create state directory")?;

    let rate_limiter = Arc::new(RateLimiter::default());
    let exchange: Arc<dyn ExchangeClient> = Arc::new(CoinbaseClient::new(credentials, rate_limiter));

    let state_store: Arc<dyn StateStore> = Arc::new(JsonStateStore::new(&state_dir, app.state.clone()));

    let universe_builder = StaticUniverseBuilder::from_config(&universe).context("failed to parse universe.yaml")?;
    let cached_universe = CachedUniverse::new(Box::new(universe_builder), app.r#loop.universe_cache_seconds as i64);

    let strategies = StrategyRegistry::new(build_strategies(&signals));

    let cost_config = CostConfig {
        maker_fee_pct: policy.execution.maker_fee_bps / Decimal::from(10_000),
        taker_fee_pct: policy.execution.taker_fee_bps / Decimal::from(10_000),
        ..CostConfig::default()
    };
    let execution_engine = ExecutionEngine::new(mode, CostModel::new(cost_config));

    let audit_logger = rustrade::application::audit_logger::AuditLogger::open(state_dir.join("audit.jsonl"))
        .context("failed to open audit log")?;

    // Alerts are never silently dropped: disabling the alerts section just
    // raises the logging sink's floor to Critical instead of removing it.
    let min_severity = if app.monitoring.alerts_enabled { parse_severity(&app.monitoring.alerts.min_severity) } else { AlertSeverity::Critical };
    let alert_service = AlertService::new(vec![Box::new(LoggingAlertSink::new(min_severity))]);

    let metrics = Arc::new(Metrics::new().context("failed to initialize metrics registry")?);
    if app.monitoring.metrics_enabled {
        spawn_metrics_server(metrics.clone(), app.monitoring.metrics_port).await;
    }

    let health_server = if app.monitoring.healthcheck_enabled {
        Some(Arc::new(HealthServer::new(app.monitoring.healthcheck_port)))
    } else {
        None
    };

    let mut loop_config = app.r#loop.clone();
    if let Some(interval) = cli.interval {
        loop_config.interval_seconds = interval;
    }

    let instance_lock = InstanceLock::new("rustrade", &state_dir);
    let clock_sync = ClockSyncValidator::default();
    let secret_rotation = SecretRotationTracker::new(default_metadata_path(&state_dir));

    let mut trading_loop = TradingLoop::new(
        mode,
        exchange,
        state_store,
        cached_universe,
        strategies,
        execution_engine,
        audit_logger,
        alert_service,
        metrics,
        health_server,
        policy,
        loop_config,
        instance_lock,
        clock_sync,
        secret_rotation,
    );

    trading_loop.startup().await.context("startup failed")?;

    let result = tokio::select! {
        _ = trading_loop.run(cli.once) => Ok(()),
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            Ok(())
        }
    };

    trading_loop.shutdown().await;
    result
}
