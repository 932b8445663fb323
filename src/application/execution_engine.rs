//! Order execution: preview gating, maker-first routing with taker
//! fallback, and TWAP-sliced liquidation. Ported from `core/execution.py`'s
//! `ExecutionEngine`, generalized well beyond its DRY_RUN/PAPER/LIVE dispatch
//! to cover the maker/taker routing and liquidation behavior spec'd in
//! §4.6. The Python original exposes a module-level `get_executor()`
//! singleton; here `ExecutionEngine` is a plain struct owned by
//! `TradingContext` (SPEC_FULL.md's no-singletons decision).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::app_config::Mode;
use crate::config::policy_config::PolicyConfig;
use crate::domain::cost_model::{CostModel, OrderKind};
use crate::domain::errors::ErrorKind;
use crate::domain::market::{OrderbookSnapshot, Quote};
use crate::domain::order::{ExecutionRoute, Fill, Liquidity, Order, OrderSide, OrderStatus};
use crate::domain::ports::{ExchangeClient, OrderConfiguration, OrderStatusReport, PlaceOrderRequest, StateStore};

use super::order_state_machine::OrderStateMachine;

/// Result of the pre-trade liquidity checks (spec §4.6): min notional,
/// max allowed spread, and 20bps depth at least 2x the order size.
#[derive(Debug, Clone)]
pub struct PreviewResult {
    pub approved: bool,
    pub spread_bps: Decimal,
    pub depth_usd: Decimal,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Filled(Order),
    Rejected { order: Order, reason: String },
    Pending(Order),
}

pub struct ExecutionEngine {
    mode: Mode,
    cost_model: CostModel,
}

impl ExecutionEngine {
    pub fn new(mode: Mode, cost_model: CostModel) -> Self {
        Self { mode, cost_model }
    }

    /// `sha256(symbol|side|round(size_usd,2)|floor(timestamp,60s))` truncated
    /// to 32 hex chars. Deliberately deterministic within a minute bucket:
    /// resubmitting the same logical order before the bucket rolls over
    /// yields the same id, so a retry collides instead of duplicating
    /// (spec §4.6, §8).
    pub fn client_order_id(&self, symbol: &str, side: OrderSide, size_usd: Decimal, now: DateTime<Utc>) -> String {
        let minute_bucket = now.timestamp().div_euclid(60);
        let mut hasher = Sha256::new();
        hasher.update(symbol.as_bytes());
        hasher.update(side.to_string().as_bytes());
        hasher.update(size_usd.round_dp(2).to_string().as_bytes());
        hasher.update(minute_bucket.to_string().as_bytes());
        let digest = hasher.finalize();
        format!("rt-{}", hex::encode(&digest[..16]))
    }

    /// Pre-trade checks: quote freshness is the caller's responsibility
    /// (checked before calling preview); this validates notional, spread,
    /// and depth within 20bps of mid covers at least 2x the order size.
    pub fn preview(
        &self,
        quote: &Quote,
        book: &OrderbookSnapshot,
        side: OrderSide,
        size_usd: Decimal,
        policy: &PolicyConfig,
    ) -> PreviewResult {
        if size_usd < policy.risk.min_trade_notional_usd {
            return PreviewResult {
                approved: false,
                spread_bps: quote.spread_bps,
                depth_usd: Decimal::ZERO,
                rejection_reason: Some("below_min_notional".to_string()),
            };
        }

        if quote.spread_bps > policy.microstructure.max_spread_bps {
            return PreviewResult {
                approved: false,
                spread_bps: quote.spread_bps,
                depth_usd: Decimal::ZERO,
                rejection_reason: Some("spread_too_wide".to_string()),
            };
        }

        let depth_usd = book.depth_within_bps_usd(quote.mid, Decimal::from(20), side);
        let required_depth = size_usd * Decimal::from(2);
        if depth_usd < required_depth {
            return PreviewResult {
                approved: false,
                spread_bps: quote.spread_bps,
                depth_usd,
                rejection_reason: Some("insufficient_depth".to_string()),
            };
        }

        PreviewResult { approved: true, spread_bps: quote.spread_bps, depth_usd, rejection_reason: None }
    }

    /// Preview failures are fail-closed in LIVE (reject outright) and
    /// degrade to a logged warning elsewhere, matching `preview_order`'s
    /// mode-gated depth-check behavior in the Python original.
    pub fn gate_preview(&self, preview: &PreviewResult) -> Result<(), ErrorKind> {
        if preview.approved {
            return Ok(());
        }
        let reason = preview.rejection_reason.clone().unwrap_or_else(|| "preview_rejected".to_string());
        if self.mode == Mode::Live {
            Err(ErrorKind::ValidationError(reason))
        } else {
            warn!(reason = %reason, mode = ?self.mode, "preview check failed, degrading to warning outside LIVE");
            Ok(())
        }
    }

    /// Rounds down to the nearest multiple of `increment`, the form the
    /// exchange requires for both price and size fields.
    fn round_to_increment(value: Decimal, increment: Decimal) -> Decimal {
        if increment <= Decimal::ZERO {
            return value;
        }
        (value / increment).trunc() * increment
    }

    fn maker_price(quote: &Quote, side: OrderSide, quote_increment: Decimal) -> Decimal {
        let raw = match side {
            OrderSide::Buy => quote.bid,
            OrderSide::Sell => quote.ask,
        };
        Self::round_to_increment(raw, quote_increment)
    }

    /// Places one order via the configured route and, outside LIVE, settles
    /// it synchronously so callers don't need a polling loop in tests.
    ///
    /// Before touching the exchange, checks both the in-flight state
    /// machine and the persisted open-orders ledger for `client_order_id` —
    /// a retried proposal within the same minute bucket resolves to the
    /// same id, so either hit means this submission is a duplicate and is
    /// skipped without a `place_order` call (spec §4.6 "Idempotent submission").
    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        exchange: &dyn ExchangeClient,
        state_store: &dyn StateStore,
        state_machine: &mut OrderStateMachine,
        symbol: &str,
        side: OrderSide,
        size_usd: Decimal,
        quote: &Quote,
        quote_increment: Decimal,
        base_increment: Decimal,
        tier_is_t1: bool,
        now: DateTime<Utc>,
        policy: &PolicyConfig,
    ) -> Result<ExecutionOutcome, ErrorKind> {
        let client_order_id = self.client_order_id(symbol, side, size_usd, now);
        let size_base = Self::round_to_increment(size_usd / quote.mid, base_increment);

        let route = match self.mode {
            Mode::DryRun => ExecutionRoute::DryRun,
            Mode::Paper => ExecutionRoute::PaperSimulated,
            Mode::Live => {
                if size_usd < policy.execution.small_order_market_threshold_usd {
                    ExecutionRoute::TakerMarket
                } else {
                    ExecutionRoute::MakerPostOnly
                }
            }
        };

        if let Some(existing) = state_machine.get(&client_order_id) {
            info!(client_order_id = %client_order_id, "submission matches an in-flight order, skipping exchange call");
            return Ok(ExecutionOutcome::Rejected { order: existing.clone(), reason: "skipped_duplicate".to_string() });
        }
        if state_store.has_open_order(&client_order_id).await? {
            info!(client_order_id = %client_order_id, "submission matches a persisted open order, skipping exchange call");
            let order = state_machine.create_order(client_order_id.clone(), symbol, side, size_usd, size_base, route);
            return Ok(ExecutionOutcome::Rejected { order, reason: "skipped_duplicate".to_string() });
        }

        state_machine.create_order(client_order_id.clone(), symbol, side, size_usd, size_base, route);

        match self.mode {
            Mode::DryRun => {
                info!(client_order_id = %client_order_id, symbol, %size_usd, "DRY_RUN: no order placed");
                state_machine.transition(&client_order_id, OrderStatus::Filled, None, None, None, true);
                Ok(ExecutionOutcome::Filled(state_machine.get(&client_order_id).unwrap().clone()))
            }
            Mode::Paper => {
                let fill_price = match side {
                    OrderSide::Buy => quote.ask,
                    OrderSide::Sell => quote.bid,
                };
                let slippage_multiplier = self.cost_model.config.market_order_slippage_multiplier;
                let slipped_price =
                    fill_price * (Decimal::ONE + (quote.spread_bps / Decimal::from(10_000)) * slippage_multiplier);
                let fee = size_usd * self.cost_model.config.taker_fee_pct;

                state_machine.transition(&client_order_id, OrderStatus::Open, Some(format!("paper-{client_order_id}")), None, None, false);
                let fill = Fill {
                    order_id: client_order_id.clone(),
                    product_id: symbol.to_string(),
                    price: slipped_price,
                    size: size_usd,
                    commission: fee,
                    liquidity: Liquidity::Taker,
                    size_in_quote: true,
                    trade_time: Utc::now(),
                };
                state_machine.update_fill(&client_order_id, vec![fill]);
                info!(client_order_id = %client_order_id, symbol, price = %slipped_price, "PAPER fill simulated");
                Ok(ExecutionOutcome::Filled(state_machine.get(&client_order_id).unwrap().clone()))
            }
            Mode::Live => {
                let book = exchange.get_orderbook(symbol, 50).await?;
                let preview = self.preview(quote, &book, side, size_usd, policy);
                self.gate_preview(&preview)?;

                let tier_slippage_bps = if tier_is_t1 {
                    policy.execution.taker_max_slippage_bps.t1
                } else {
                    policy.execution.taker_max_slippage_bps.default
                };
                if quote.spread_bps > tier_slippage_bps && !policy.execution.taker_fallback {
                    let reason = "slippage_budget_exceeded_no_fallback".to_string();
                    state_machine.transition(&client_order_id, OrderStatus::Rejected, None, None, Some(reason.clone()), false);
                    return Ok(ExecutionOutcome::Rejected {
                        order: state_machine.get(&client_order_id).unwrap().clone(),
                        reason,
                    });
                }

                match route {
                    ExecutionRoute::TakerMarket => {
                        self.submit_taker(exchange, state_machine, &client_order_id, symbol, side, size_usd, size_base).await
                    }
                    _ => {
                        self.run_maker_first(exchange, state_machine, &client_order_id, symbol, side, size_usd, size_base, quote, quote_increment, policy)
                            .await
                    }
                }
            }
        }
    }

    /// Places a single `MarketIoc` order and reconciles whatever fills the
    /// exchange already reports for it.
    async fn submit_taker(
        &self,
        exchange: &dyn ExchangeClient,
        state_machine: &mut OrderStateMachine,
        client_order_id: &str,
        symbol: &str,
        side: OrderSide,
        size_usd: Decimal,
        size_base: Decimal,
    ) -> Result<ExecutionOutcome, ErrorKind> {
        let configuration = OrderConfiguration::MarketIoc {
            quote_size: if side == OrderSide::Buy { Some(size_usd) } else { None },
            base_size: if side == OrderSide::Sell { Some(size_base) } else { None },
        };
        let request = PlaceOrderRequest { client_order_id: client_order_id.to_string(), product_id: symbol.to_string(), side, configuration };

        let response = exchange.place_order(request).await?;
        if !response.success {
            let reason = response.failure_reason.unwrap_or_else(|| "order_rejected".to_string());
            state_machine.transition(client_order_id, OrderStatus::Rejected, None, None, Some(reason.clone()), false);
            return Ok(ExecutionOutcome::Rejected { order: state_machine.get(client_order_id).unwrap().clone(), reason });
        }

        state_machine.transition(client_order_id, OrderStatus::Open, Some(response.exchange_order_id.clone()), None, None, true);
        self.reconcile_fills(exchange, state_machine, client_order_id, &response.exchange_order_id).await?;

        let order = state_machine.get(client_order_id).unwrap().clone();
        if order.status == OrderStatus::Filled {
            Ok(ExecutionOutcome::Filled(order))
        } else {
            Ok(ExecutionOutcome::Pending(order))
        }
    }

    /// Maker-first routing: posts a `LimitPostOnly` order, polls until it
    /// fills or its TTL lapses, and cancels to reprice at a fresh limit
    /// price — up to `maker_max_reprices` times, with TTL decaying from
    /// `maker_max_ttl_sec` toward `maker_first_min_ttl_sec` as attempts run
    /// out. Exhausting reprices falls back to a taker market order when
    /// `taker_fallback` allows it, otherwise rejects (spec §4.6).
    #[allow(clippy::too_many_arguments)]
    async fn run_maker_first(
        &self,
        exchange: &dyn ExchangeClient,
        state_machine: &mut OrderStateMachine,
        client_order_id: &str,
        symbol: &str,
        side: OrderSide,
        size_usd: Decimal,
        size_base: Decimal,
        quote: &Quote,
        quote_increment: Decimal,
        policy: &PolicyConfig,
    ) -> Result<ExecutionOutcome, ErrorKind> {
        let max_reprices = policy.execution.maker_max_reprices;
        let min_ttl = policy.execution.maker_first_min_ttl_sec;
        let max_ttl = policy.execution.maker_max_ttl_sec.max(min_ttl);

        for attempt in 0..=max_reprices {
            let ttl_seconds = Self::decayed_ttl(attempt, max_reprices, min_ttl, max_ttl);
            let attempt_client_order_id = format!("{client_order_id}-r{attempt}");
            let configuration =
                OrderConfiguration::LimitPostOnly { base_size: size_base, limit_price: Self::maker_price(quote, side, quote_increment) };
            let request = PlaceOrderRequest { client_order_id: attempt_client_order_id, product_id: symbol.to_string(), side, configuration };

            let response = exchange.place_order(request).await?;
            if !response.success {
                let reason = response.failure_reason.unwrap_or_else(|| "order_rejected".to_string());
                state_machine.transition(client_order_id, OrderStatus::Rejected, None, None, Some(reason.clone()), false);
                return Ok(ExecutionOutcome::Rejected { order: state_machine.get(client_order_id).unwrap().clone(), reason });
            }

            state_machine.transition(client_order_id, OrderStatus::Open, Some(response.exchange_order_id.clone()), None, None, true);

            if self.poll_until_terminal(exchange, state_machine, client_order_id, &response.exchange_order_id, ttl_seconds).await? {
                return Ok(ExecutionOutcome::Filled(state_machine.get(client_order_id).unwrap().clone()));
            }

            warn!(client_order_id, attempt, ttl_seconds, "maker order TTL expired, canceling");
            let _ = exchange.cancel_order(&response.exchange_order_id).await;
        }

        if policy.execution.taker_fallback {
            info!(client_order_id, "maker reprices exhausted, falling back to a taker market order");
            return self.submit_taker(exchange, state_machine, client_order_id, symbol, side, size_usd, size_base).await;
        }

        let reason = "maker_reprices_exhausted_no_fallback".to_string();
        state_machine.transition(client_order_id, OrderStatus::Rejected, None, None, Some(reason.clone()), false);
        Ok(ExecutionOutcome::Rejected { order: state_machine.get(client_order_id).unwrap().clone(), reason })
    }

    /// Polls `get_order_status`-reconciled fills until the order reaches
    /// FILLED or `ttl_seconds` elapses. Returns whether it filled.
    async fn poll_until_terminal(
        &self,
        exchange: &dyn ExchangeClient,
        state_machine: &mut OrderStateMachine,
        client_order_id: &str,
        exchange_order_id: &str,
        ttl_seconds: u64,
    ) -> Result<bool, ErrorKind> {
        let deadline = Utc::now() + chrono::Duration::seconds(ttl_seconds as i64);
        loop {
            self.reconcile_fills(exchange, state_machine, client_order_id, exchange_order_id).await?;
            if state_machine.get(client_order_id).is_some_and(|o| o.status == OrderStatus::Filled) {
                return Ok(true);
            }
            if Utc::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    }

    /// Linear decay from `max_ttl` at the first attempt to `min_ttl` once
    /// `max_reprices` have been spent — later reprices give up faster.
    fn decayed_ttl(attempt: u32, max_reprices: u32, min_ttl: u64, max_ttl: u64) -> u64 {
        if max_reprices == 0 {
            return max_ttl;
        }
        let span = max_ttl.saturating_sub(min_ttl);
        let elapsed_step = span * attempt.min(max_reprices) as u64 / max_reprices as u64;
        max_ttl.saturating_sub(elapsed_step).max(min_ttl)
    }

    /// Runs each request through [`execute`] in sequence, stopping at the
    /// first rejection — later proposals in a batch may depend on balances
    /// freed by earlier ones, so a silent partial batch is safer than
    /// fanning out concurrently.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute_batch(
        &self,
        exchange: &dyn ExchangeClient,
        state_store: &dyn StateStore,
        state_machine: &mut OrderStateMachine,
        requests: Vec<(String, OrderSide, Decimal, Quote, Decimal, Decimal, bool)>,
        now: DateTime<Utc>,
        policy: &PolicyConfig,
    ) -> Vec<Result<ExecutionOutcome, ErrorKind>> {
        let mut results = Vec::with_capacity(requests.len());
        for (symbol, side, size_usd, quote, quote_increment, base_increment, tier_is_t1) in requests {
            let outcome = self
                .execute(
                    exchange,
                    state_store,
                    state_machine,
                    &symbol,
                    side,
                    size_usd,
                    &quote,
                    quote_increment,
                    base_increment,
                    tier_is_t1,
                    now,
                    policy,
                )
                .await;
            let is_critical = matches!(outcome, Err(ErrorKind::CriticalDataUnavailable { .. }) | Err(ErrorKind::ClientError { .. }));
            results.push(outcome);
            if is_critical {
                warn!("stopping batch execution after critical failure");
                break;
            }
        }
        results
    }

    /// Periodic stale-order sweep (spec §4.6 `ManageOpenOrders`): cancels
    /// every still-active order older than `cancel_after_seconds`.
    pub async fn manage_open_orders(
        &self,
        exchange: &dyn ExchangeClient,
        state_machine: &mut OrderStateMachine,
        policy: &PolicyConfig,
        now: DateTime<Utc>,
    ) -> Result<usize, ErrorKind> {
        let stale: Vec<(String, Option<String>)> = state_machine
            .stale_orders(policy.execution.cancel_after_seconds as i64, now)
            .into_iter()
            .map(|o| (o.client_order_id.clone(), o.exchange_order_id.clone()))
            .collect();

        let exchange_ids: Vec<String> = stale.iter().filter_map(|(_, exchange_order_id)| exchange_order_id.clone()).collect();
        if !exchange_ids.is_empty() {
            exchange.cancel_orders(&exchange_ids).await?;
        }
        for (client_order_id, _) in &stale {
            state_machine.transition(client_order_id, OrderStatus::Canceled, None, None, Some("stale".to_string()), false);
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "canceled stale open orders past cancel_after_seconds");
        }
        Ok(stale.len())
    }

    /// `list_open_orders` filtered against recently-canceled local orders,
    /// so a just-superseded reprice doesn't get mistaken for a phantom open
    /// position on the exchange (spec §4.6 "ghost" orders).
    pub async fn list_open_orders_excluding_ghosts(
        &self,
        exchange: &dyn ExchangeClient,
        state_machine: &OrderStateMachine,
        symbol: Option<&str>,
        within_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderStatusReport>, ErrorKind> {
        let open = exchange.list_open_orders(symbol).await?;
        let ghosts: std::collections::HashSet<String> =
            self.recently_canceled(state_machine, within_seconds, now).into_iter().filter_map(|o| o.exchange_order_id.clone()).collect();
        Ok(open.into_iter().filter(|o| !ghosts.contains(&o.exchange_order_id)).collect())
    }

    /// Reconciles exchange-reported fills into the state machine for any
    /// order still active, used by the post-submit tracking loop.
    pub async fn reconcile_fills(
        &self,
        exchange: &dyn ExchangeClient,
        state_machine: &mut OrderStateMachine,
        client_order_id: &str,
        exchange_order_id: &str,
    ) -> Result<(), ErrorKind> {
        let fills = exchange.list_fills(Some(exchange_order_id), None, None).await?;
        if !fills.is_empty() {
            state_machine.update_fill(client_order_id, fills);
        }
        Ok(())
    }

    /// Cancels every still-open order and marks it CANCELED locally —
    /// called on graceful shutdown before the state store flushes and the
    /// instance lock releases (spec §5).
    pub async fn cancel_all_open(
        &self,
        exchange: &dyn ExchangeClient,
        state_machine: &mut OrderStateMachine,
    ) -> Result<(), ErrorKind> {
        let exchange_ids: Vec<String> = state_machine
            .active_orders()
            .into_iter()
            .filter_map(|o| o.exchange_order_id.clone())
            .collect();
        if exchange_ids.is_empty() {
            return Ok(());
        }
        exchange.cancel_orders(&exchange_ids).await?;

        let client_ids: Vec<String> = state_machine
            .active_orders()
            .into_iter()
            .map(|o| o.client_order_id.clone())
            .collect();
        for id in client_ids {
            state_machine.transition(&id, OrderStatus::Canceled, None, None, Some("shutdown".into()), false);
        }
        Ok(())
    }

    /// Filters orders canceled within `within_seconds` — used to avoid
    /// re-submitting a replacement order before the exchange has released
    /// the hold from the just-canceled one.
    pub fn recently_canceled<'a>(
        &self,
        state_machine: &'a OrderStateMachine,
        within_seconds: i64,
        now: DateTime<Utc>,
    ) -> Vec<&'a Order> {
        state_machine
            .orders_by_status(OrderStatus::Canceled)
            .into_iter()
            .filter(|o| o.completed_at.is_some_and(|t| (now - t).num_seconds() < within_seconds))
            .collect()
    }

    pub fn estimate_fill_probability(&self, order_kind: OrderKind, tier: crate::domain::proposal::Tier) -> Decimal {
        self.cost_model.estimate_fill_probability(order_kind, tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cost_model::CostConfig;
    use crate::domain::market::BookLevel;
    use rust_decimal_macros::dec;

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
  kill_switch_file: /tmp/rustrade-test-kill-switch-does-not-exist
portfolio_management:
  trim_target_buffer_pct: 2
  trim_tolerance_pct: 1
  trim_min_value_usd: 10
  trim_max_liquidations: 3
  trim_slippage_buffer_pct: 0.5
  min_liquidation_value_usd: 10
  max_liquidations_per_cycle: 2
  purge_execution:
    slice_usd: 50
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

    fn deep_book(symbol: &str, mid: Decimal) -> OrderbookSnapshot {
        OrderbookSnapshot {
            symbol: symbol.to_string(),
            bids: vec![BookLevel { price: mid - dec!(1), size: dec!(1000) }],
            asks: vec![BookLevel { price: mid + dec!(1), size: dec!(1000) }],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn client_order_id_is_deterministic_within_the_same_minute_bucket() {
        use chrono::TimeZone;
        let engine = ExecutionEngine::new(Mode::DryRun, CostModel::new(CostConfig::default()));
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 1).unwrap();
        let t0_retry = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 59).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 1, 0).unwrap();

        let a = engine.client_order_id("BTC-USD", OrderSide::Buy, dec!(100), t0);
        let retry = engine.client_order_id("BTC-USD", OrderSide::Buy, dec!(100), t0_retry);
        let next_minute = engine.client_order_id("BTC-USD", OrderSide::Buy, dec!(100), t1);
        let different_size = engine.client_order_id("BTC-USD", OrderSide::Buy, dec!(100.004), t0);

        assert_eq!(a, retry, "identical inputs within the same minute bucket must collide");
        assert_ne!(a, next_minute, "a new minute bucket must mint a new id");
        assert_eq!(a, different_size, "size rounds to 2 decimal places before hashing");
    }

    #[test]
    fn preview_rejects_when_depth_insufficient() {
        let engine = ExecutionEngine::new(Mode::Live, CostModel::new(CostConfig::default()));
        let policy = test_policy();
        let quote = Quote::new("BTC-USD", dec!(49990), dec!(50010), dec!(50000), dec!(10), Utc::now());
        let thin_book = OrderbookSnapshot {
            symbol: "BTC-USD".to_string(),
            bids: vec![BookLevel { price: dec!(49990), size: dec!(0.001) }],
            asks: vec![BookLevel { price: dec!(50010), size: dec!(0.001) }],
            timestamp: Utc::now(),
        };
        let result = engine.preview(&quote, &thin_book, OrderSide::Buy, dec!(1000), &policy);
        assert!(!result.approved);
        assert_eq!(result.rejection_reason.as_deref(), Some("insufficient_depth"));
    }

    #[test]
    fn preview_approves_with_ample_depth() {
        let engine = ExecutionEngine::new(Mode::Live, CostModel::new(CostConfig::default()));
        let policy = test_policy();
        let quote = Quote::new("BTC-USD", dec!(49995), dec!(50005), dec!(50000), dec!(10), Utc::now());
        let book = deep_book("BTC-USD", dec!(50000));
        let result = engine.preview(&quote, &book, OrderSide::Buy, dec!(100), &policy);
        assert!(result.approved);
    }

    #[tokio::test]
    async fn dry_run_execute_fills_instantly_without_exchange_calls() {
        use crate::infrastructure::mock::{MockExchangeClient, MockStateStore};
        let exchange = MockExchangeClient::new();
        let state_store = MockStateStore::default();
        let engine = ExecutionEngine::new(Mode::DryRun, CostModel::new(CostConfig::default()));
        let mut sm = OrderStateMachine::new();
        let quote = Quote::new("BTC-USD", dec!(49995), dec!(50005), dec!(50000), dec!(10), Utc::now());
        let policy = test_policy();
        let outcome = engine
            .execute(&exchange, &state_store, &mut sm, "BTC-USD", OrderSide::Buy, dec!(100), &quote, dec!(0.01), dec!(0.00001), true, Utc::now(), &policy)
            .await
            .unwrap();
        match outcome {
            ExecutionOutcome::Filled(order) => assert_eq!(order.status, OrderStatus::Filled),
            other => panic!("expected Filled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn paper_execute_simulates_a_taker_fill_with_slippage_and_fee() {
        use crate::infrastructure::mock::{MockExchangeClient, MockStateStore};
        let exchange = MockExchangeClient::new();
        let state_store = MockStateStore::default();
        let engine = ExecutionEngine::new(Mode::Paper, CostModel::new(CostConfig::default()));
        let mut sm = OrderStateMachine::new();
        let quote = Quote::new("BTC-USD", dec!(49950), dec!(50050), dec!(50000), dec!(10), Utc::now());
        let policy = test_policy();
        let outcome = engine
            .execute(&exchange, &state_store, &mut sm, "BTC-USD", OrderSide::Buy, dec!(100), &quote, dec!(0.01), dec!(0.00001), true, Utc::now(), &policy)
            .await
            .unwrap();
        match outcome {
            ExecutionOutcome::Filled(order) => {
                assert_eq!(order.status, OrderStatus::Filled);
                assert!(order.fees > Decimal::ZERO);
                assert!(order.average_price >= quote.ask);
            }
            other => panic!("expected Filled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_submission_within_the_same_minute_is_skipped_without_contacting_the_exchange() {
        use crate::infrastructure::mock::{MockExchangeClient, MockStateStore};
        let exchange = MockExchangeClient::new();
        let state_store = MockStateStore::default();
        let engine = ExecutionEngine::new(Mode::DryRun, CostModel::new(CostConfig::default()));
        let mut sm = OrderStateMachine::new();
        let quote = Quote::new("BTC-USD", dec!(49995), dec!(50005), dec!(50000), dec!(10), Utc::now());
        let policy = test_policy();
        let now = Utc::now();

        let first = engine
            .execute(&exchange, &state_store, &mut sm, "BTC-USD", OrderSide::Buy, dec!(100), &quote, dec!(0.01), dec!(0.00001), true, now, &policy)
            .await
            .unwrap();
        assert!(matches!(first, ExecutionOutcome::Filled(_)));

        let second = engine
            .execute(&exchange, &state_store, &mut sm, "BTC-USD", OrderSide::Buy, dec!(100), &quote, dec!(0.01), dec!(0.00001), true, now, &policy)
            .await
            .unwrap();
        match second {
            ExecutionOutcome::Rejected { reason, .. } => assert_eq!(reason, "skipped_duplicate"),
            other => panic!("expected Rejected(skipped_duplicate), got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_submission_against_a_persisted_open_order_is_skipped() {
        use crate::infrastructure::mock::{MockExchangeClient, MockStateStore};
        let exchange = MockExchangeClient::new();
        let state_store = MockStateStore::default();
        let engine = ExecutionEngine::new(Mode::DryRun, CostModel::new(CostConfig::default()));
        let mut sm = OrderStateMachine::new();
        let quote = Quote::new("BTC-USD", dec!(49995), dec!(50005), dec!(50000), dec!(10), Utc::now());
        let policy = test_policy();
        let now = Utc::now();

        let client_order_id = engine.client_order_id("BTC-USD", OrderSide::Buy, dec!(100), now);
        let persisted = Order::new(client_order_id, "BTC-USD", OrderSide::Buy, dec!(100), dec!(0.002), ExecutionRoute::DryRun, now);
        state_store.record_open_order(&persisted).await.unwrap();

        let outcome = engine
            .execute(&exchange, &state_store, &mut sm, "BTC-USD", OrderSide::Buy, dec!(100), &quote, dec!(0.01), dec!(0.00001), true, now, &policy)
            .await
            .unwrap();
        match outcome {
            ExecutionOutcome::Rejected { reason, .. } => assert_eq!(reason, "skipped_duplicate"),
            other => panic!("expected Rejected(skipped_duplicate), got {other:?}"),
        }
    }

    #[tokio::test]
    async fn live_maker_order_fills_via_the_poll_loop() {
        use crate::infrastructure::mock::{MockExchangeClient, MockStateStore};
        let exchange = MockExchangeClient::new();
        exchange.set_orderbook(deep_book("BTC-USD", dec!(50000))).await;
        let state_store = MockStateStore::default();
        let engine = ExecutionEngine::new(Mode::Live, CostModel::new(CostConfig::default()));
        let mut sm = OrderStateMachine::new();
        let quote = Quote::new("BTC-USD", dec!(49995), dec!(50005), dec!(50000), dec!(10), Utc::now());
        let policy = test_policy();

        let outcome = engine
            .execute(&exchange, &state_store, &mut sm, "BTC-USD", OrderSide::Buy, dec!(100), &quote, dec!(0.01), dec!(0.00001), true, Utc::now(), &policy)
            .await
            .unwrap();
        match outcome {
            ExecutionOutcome::Filled(order) => assert_eq!(order.route, ExecutionRoute::MakerPostOnly),
            other => panic!("expected Filled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn live_maker_order_exhausts_reprices_and_rejects_without_taker_fallback() {
        use crate::infrastructure::mock::{MockExchangeClient, MockStateStore};
        let exchange = MockExchangeClient::new();
        exchange.fill_orders_immediately.store(false, std::sync::atomic::Ordering::SeqCst);
        exchange.set_orderbook(deep_book("BTC-USD", dec!(50000))).await;
        let state_store = MockStateStore::default();
        let engine = ExecutionEngine::new(Mode::Live, CostModel::new(CostConfig::default()));
        let mut sm = OrderStateMachine::new();
        let quote = Quote::new("BTC-USD", dec!(49995), dec!(50005), dec!(50000), dec!(10), Utc::now());

        let mut policy = test_policy();
        policy.execution.maker_max_reprices = 1;
        policy.execution.maker_first_min_ttl_sec = 0;
        policy.execution.maker_max_ttl_sec = 0;
        policy.execution.taker_fallback = false;

        let outcome = engine
            .execute(&exchange, &state_store, &mut sm, "BTC-USD", OrderSide::Buy, dec!(100), &quote, dec!(0.01), dec!(0.00001), true, Utc::now(), &policy)
            .await
            .unwrap();
        match outcome {
            ExecutionOutcome::Rejected { reason, .. } => assert_eq!(reason, "maker_reprices_exhausted_no_fallback"),
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn manage_open_orders_cancels_orders_past_cancel_after_seconds() {
        use crate::infrastructure::mock::MockExchangeClient;
        let exchange = MockExchangeClient::new();
        let engine = ExecutionEngine::new(Mode::Live, CostModel::new(CostConfig::default()));
        let mut sm = OrderStateMachine::new();
        let old_order = sm.create_order("stale-1", "BTC-USD", OrderSide::Buy, dec!(100), dec!(0.002), ExecutionRoute::MakerPostOnly);
        sm.transition(&old_order.client_order_id, OrderStatus::Open, Some("ex-1".to_string()), None, None, false);

        let policy = test_policy();
        let long_after = Utc::now() + chrono::Duration::seconds(policy.execution.cancel_after_seconds as i64 + 1);
        let canceled = engine.manage_open_orders(&exchange, &mut sm, &policy, long_after).await.unwrap();

        assert_eq!(canceled, 1);
        assert_eq!(sm.get("stale-1").unwrap().status, OrderStatus::Canceled);
    }
}
