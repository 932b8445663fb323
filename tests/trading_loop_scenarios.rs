//! End-to-end trading-cycle scenarios exercising [`TradingLoop`] the way a
//! deployed bot would see them: one fetch -> propose -> risk-gate -> execute
//! -> persist pass per test, wired with the in-memory exchange/state-store
//! doubles instead of the real Coinbase client.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::tempdir;

use rustrade::application::alert_service::{AlertService, LoggingAlertSink};
use rustrade::application::audit_logger::AuditLogger;
use rustrade::application::clock_sync::ClockSyncValidator;
use rustrade::application::execution_engine::ExecutionEngine;
use rustrade::application::instance_lock::InstanceLock;
use rustrade::application::metrics::Metrics;
use rustrade::application::secret_rotation::SecretRotationTracker;
use rustrade::application::strategy_registry::StrategyRegistry;
use rustrade::application::trading_loop::TradingLoop;
use rustrade::application::universe::CachedUniverse;
use rustrade::config::app_config::{LoopSection, Mode};
use rustrade::config::policy_config::PolicyConfig;
use rustrade::domain::cost_model::{CostConfig, CostModel};
use rustrade::domain::errors::ErrorKind;
use rustrade::domain::market::{Candle, Quote};
use rustrade::domain::order::OrderSide;
use rustrade::domain::portfolio::PortfolioState;
use rustrade::domain::ports::{AlertSeverity, ExchangeClient, PortResult, StateStore, Strategy};
use rustrade::domain::proposal::{SizeHint, Tier, TradeProposal};
use rustrade::infrastructure::mock::{MockExchangeClient, MockStateStore};
use rustrade::strategies::StaticUniverseBuilder;

fn test_policy() -> PolicyConfig {
    serde_yaml::from_str(
        r#"
risk:
  max_total_at_risk_pct: 50
  per_symbol_cap_pct: 20
  daily_loss_pct: 5
  weekly_loss_pct: 10
  max_drawdown_pct: 20
  min_trade_notional_usd: 10
  cash_equivalents: []
execution:
  default_order_type: limit_post_only
  maker_fee_bps: 40
  taker_fee_bps: 60
  maker_max_reprices: 3
  maker_max_ttl_sec: 60
  maker_first_min_ttl_sec: 10
  cancel_after_seconds: 120
  post_only_ttl_seconds: 30
  small_order_market_threshold_usd: 25
  taker_max_slippage_bps:
    T1: 10
    default: 25
  failed_order_cooldown_seconds: 60
  post_trade_reconcile_wait_seconds: 5
  preferred_quote_currencies: [USD]
microstructure:
  max_expected_slippage_bps: 50
  max_quote_age_seconds: 30
  max_spread_bps: 100
circuit_breakers:
  max_quote_age_seconds: 30
  max_consecutive_api_errors: 5
  rate_limit_cooldown_cycles: 3
governance:
  live_trading_enabled: false
  kill_switch_file: /tmp/rustrade-scenario-test-kill-switch-does-not-exist
portfolio_management:
  auto_trim_to_risk_cap: true
  trim_target_buffer_pct: 2
  trim_tolerance_pct: 1
  trim_min_value_usd: 10
  trim_max_liquidations: 3
  trim_slippage_buffer_pct: 0.5
  min_liquidation_value_usd: 10
  max_liquidations_per_cycle: 2
  purge_execution:
    slice_usd: 100
    replace_seconds: 10
    max_duration_seconds: 600
    poll_interval_seconds: 5
    max_slices: 20
    max_residual_usd: 5
    max_consecutive_no_fill: 3
    taker_fallback_threshold_usd: 20
    taker_max_slippage_bps: 30
  max_trim_failures_before_alert: 3
twap:
  replace_seconds: 10
  max_consecutive_no_fill: 3
"#,
    )
    .unwrap()
}

/// A strategy that proposes one fixed buy for a single symbol, mirroring
/// scenario 1's `{BTC-USD, BUY, 1.0% of nav, confidence 0.8}` proposal.
struct FixedBuyStrategy {
    symbol: String,
    size_usd: rust_decimal::Decimal,
}

#[async_trait]
impl Strategy for FixedBuyStrategy {
    fn name(&self) -> &str {
        "fixed_buy"
    }

    async fn propose(
        &self,
        symbol: &str,
        _quote: &Quote,
        _candles: &[Candle],
        portfolio: &PortfolioState,
    ) -> PortResult<Option<TradeProposal>> {
        if symbol != self.symbol || portfolio.open_positions.contains_key(symbol) {
            return Ok(None);
        }
        let mut proposal = TradeProposal::new(symbol, OrderSide::Buy, SizeHint::NotionalUsd(self.size_usd), Tier::T1, "fixed_buy");
        proposal.confidence = dec!(0.8);
        Ok(Some(proposal))
    }
}

async fn build_loop(dir: &std::path::Path, exchange: Arc<MockExchangeClient>) -> TradingLoop {
    build_loop_with_portfolio(dir, exchange, PortfolioState::empty(dec!(10000))).await
}

async fn build_loop_with_portfolio(dir: &std::path::Path, exchange: Arc<MockExchangeClient>, initial_portfolio: PortfolioState) -> TradingLoop {
    let state_store: Arc<dyn StateStore> = Arc::new(MockStateStore::new(initial_portfolio));

    let mut universe_symbols = HashMap::new();
    universe_symbols.insert("BTC-USD".to_string(), 1u8);
    let universe = CachedUniverse::new(Box::new(StaticUniverseBuilder::new(universe_symbols)), 300);

    let strategies = StrategyRegistry::new(vec![Box::new(FixedBuyStrategy { symbol: "BTC-USD".to_string(), size_usd: dec!(100) })]);
    let execution_engine = ExecutionEngine::new(Mode::DryRun, CostModel::new(CostConfig::default()));
    let audit_logger = AuditLogger::open(dir.join("audit.jsonl")).unwrap();
    let alert_service = AlertService::new(vec![Box::new(LoggingAlertSink::new(AlertSeverity::Warning))]);
    let metrics = Arc::new(Metrics::new().unwrap());
    let policy = test_policy();
    let loop_config = LoopSection { interval_seconds: 60, jitter_pct: 0.0, universe_cache_seconds: 300 };
    let instance_lock = InstanceLock::new("rustrade-scenario-test", dir);
    let clock_sync = ClockSyncValidator::default();
    let secret_rotation = SecretRotationTracker::new(dir.join("secret_rotation.json"));

    let exchange: Arc<dyn ExchangeClient> = exchange;
    TradingLoop::new(
        Mode::DryRun,
        exchange,
        state_store,
        universe,
        strategies,
        execution_engine,
        audit_logger,
        alert_service,
        metrics,
        None,
        policy,
        loop_config,
        instance_lock,
        clock_sync,
        secret_rotation,
    )
}

/// Scenario 1: fresh buy happy path.
#[tokio::test]
async fn fresh_buy_happy_path_places_exactly_one_order() {
    let dir = tempdir().unwrap();
    let exchange = Arc::new(MockExchangeClient::new());
    exchange.set_quote(Quote::new("BTC-USD", dec!(49990), dec!(50010), dec!(50000), dec!(100), Utc::now())).await;

    let mut trading_loop = build_loop(dir.path(), exchange).await;
    trading_loop.startup().await.unwrap();

    let record = trading_loop.run_once(Utc::now()).await;
    assert_eq!(record.orders_placed, 1);
    assert_eq!(record.orders_filled, 1);
    assert!(record.no_trade_reasons.is_empty());

    trading_loop.shutdown().await;
}

/// Scenario 2: a quote older than `max_quote_age_seconds` is rejected before
/// any proposal is even generated; no exchange write happens.
#[tokio::test]
async fn stale_quote_yields_no_trade_and_no_exchange_write() {
    let dir = tempdir().unwrap();
    let exchange = Arc::new(MockExchangeClient::new());
    exchange.set_quote(Quote::new("BTC-USD", dec!(49990), dec!(50010), dec!(50000), dec!(100), Utc::now() - Duration::seconds(45))).await;

    let mut trading_loop = build_loop(dir.path(), exchange.clone()).await;
    trading_loop.startup().await.unwrap();

    let record = trading_loop.run_once(Utc::now()).await;
    assert_eq!(record.orders_placed, 0);
    assert!(record.no_trade_reasons.iter().any(|r| r.contains("stale")), "reasons: {:?}", record.no_trade_reasons);

    let open_orders = exchange.list_open_orders(None).await.unwrap();
    assert!(open_orders.is_empty());

    trading_loop.shutdown().await;
}

/// Scenario 5: auto-trim over cap. nav=$500, open position `PEPE-USD $440`
/// against a 20% symbol cap. Expect a liquidation attempt that frees at
/// least `excess_usd - tolerance`, and the portfolio re-read reflects it.
#[tokio::test]
async fn auto_trim_frees_an_over_cap_position_before_the_cycle_continues() {
    let dir = tempdir().unwrap();
    let exchange = Arc::new(MockExchangeClient::new());
    exchange.set_quote(Quote::new("BTC-USD", dec!(49990), dec!(50010), dec!(50000), dec!(100), Utc::now())).await;
    exchange.set_quote(Quote::new("PEPE-USD", dec!(0.00099), dec!(0.00101), dec!(0.001), dec!(1_000_000), Utc::now())).await;
    exchange
        .set_accounts(vec![rustrade::domain::ports::AccountBalance { currency: "USD".to_string(), available: dec!(60), hold: Decimal::ZERO }])
        .await;

    let mut portfolio = PortfolioState::empty(dec!(500));
    portfolio.open_positions.insert(
        "PEPE-USD".to_string(),
        rustrade::domain::portfolio::Position {
            base_qty: dec!(440000),
            entry_price: dec!(0.001),
            entry_value_usd: dec!(440),
            fees_paid: Decimal::ZERO,
            current_usd: dec!(440),
        },
    );

    let mut trading_loop = build_loop_with_portfolio(dir.path(), exchange, portfolio).await;
    trading_loop.startup().await.unwrap();

    let record = trading_loop.run_once(Utc::now()).await;
    assert!(
        record.no_trade_reasons.iter().any(|r| r.starts_with("PEPE-USD:auto_trimmed:")),
        "reasons: {:?}",
        record.no_trade_reasons
    );

    trading_loop.shutdown().await;
}

/// Scenario 4: a failed `get_accounts` call aborts the cycle fail-closed,
/// with the reason surfacing in the audit record and nothing executed.
#[tokio::test]
async fn account_data_failure_aborts_the_cycle_fail_closed() {
    let dir = tempdir().unwrap();
    let exchange = Arc::new(MockExchangeClient::new());
    exchange.set_quote(Quote::new("BTC-USD", dec!(49990), dec!(50010), dec!(50000), dec!(100), Utc::now())).await;
    exchange.fail_next_get_accounts.store(true, std::sync::atomic::Ordering::SeqCst);

    let mut trading_loop = build_loop(dir.path(), exchange).await;
    trading_loop.startup().await.unwrap();

    let record = trading_loop.run_once(Utc::now()).await;
    assert_eq!(record.orders_placed, 0);
    assert_eq!(record.proposals_considered, 0);
    assert!(
        record.no_trade_reasons.iter().any(|r| r == &ErrorKind::CriticalDataUnavailable { source: "accounts".to_string() }.no_trade_reason()),
        "reasons: {:?}",
        record.no_trade_reasons
    );

    trading_loop.shutdown().await;
}
