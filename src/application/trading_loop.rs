//! The always-on trading cycle: startup validation once, then a repeating
//! fetch -> propose -> risk-gate -> execute -> persist -> audit pipeline
//! (spec §5, §6). Every step inside one iteration runs sequentially on this
//! task — no internal `tokio::spawn` fan-out. `tokio::spawn` is reserved for
//! the health server and, at the call site in `main.rs`, the metrics
//! exporter; this struct itself never spawns except via [`HealthServer::spawn`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant as StdInstant};

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::app_config::{LoopSection, Mode};
use crate::config::policy_config::PolicyConfig;
use crate::domain::errors::ErrorKind;
use crate::domain::market::CandleInterval;
use crate::domain::portfolio::PortfolioState;
use crate::domain::ports::{Alert, AlertSeverity, ExchangeClient, StateStore};
use crate::domain::proposal::{SizeHint, TradeProposal};

use super::alert_service::AlertService;
use super::audit_logger::{AuditLogger, CycleAuditRecord};
use super::clock_sync::ClockSyncValidator;
use super::execution_engine::{ExecutionEngine, ExecutionOutcome};
use super::health_server::{HealthServer, HealthStatus};
use super::instance_lock::InstanceLock;
use super::metrics::Metrics;
use super::order_state_machine::OrderStateMachine;
use super::portfolio_trimmer::PortfolioTrimmer;
use super::position_manager::PositionManager;
use super::risk_engine::{CircuitBreakerState, RiskEngine};
use super::secret_rotation::SecretRotationTracker;
use super::strategy_registry::StrategyRegistry;
use super::universe::CachedUniverse;

fn proposal_notional_usd(proposal: &TradeProposal, nav: Decimal) -> Decimal {
    match proposal.size {
        SizeHint::NotionalUsd(usd) => usd,
        SizeHint::TargetWeightPct(pct) => nav * pct / Decimal::from(100),
    }
}

/// Everything one cycle needs, wired together once at startup by `main.rs`.
pub struct TradingLoop {
    mode: Mode,
    exchange: Arc<dyn ExchangeClient>,
    state_store: Arc<dyn StateStore>,
    universe: CachedUniverse,
    strategies: StrategyRegistry,
    portfolio_trimmer: PortfolioTrimmer,
    position_manager: PositionManager,
    risk_engine: RiskEngine,
    execution_engine: ExecutionEngine,
    order_state_machine: OrderStateMachine,
    audit_logger: AuditLogger,
    alert_service: AlertService,
    metrics: Arc<Metrics>,
    health_server: Option<Arc<HealthServer>>,
    policy: PolicyConfig,
    loop_config: LoopSection,
    circuits: CircuitBreakerState,
    instance_lock: InstanceLock,
    clock_sync: ClockSyncValidator,
    secret_rotation: SecretRotationTracker,
    portfolio: PortfolioState,
}

impl TradingLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mode: Mode,
        exchange: Arc<dyn ExchangeClient>,
        state_store: Arc<dyn StateStore>,
        universe: CachedUniverse,
        strategies: StrategyRegistry,
        execution_engine: ExecutionEngine,
        audit_logger: AuditLogger,
        alert_service: AlertService,
        metrics: Arc<Metrics>,
        health_server: Option<Arc<HealthServer>>,
        policy: PolicyConfig,
        loop_config: LoopSection,
        instance_lock: InstanceLock,
        clock_sync: ClockSyncValidator,
        secret_rotation: SecretRotationTracker,
    ) -> Self {
        Self {
            mode,
            exchange,
            state_store,
            universe,
            strategies,
            portfolio_trimmer: PortfolioTrimmer::new(),
            position_manager: PositionManager::new(),
            risk_engine: RiskEngine::new(),
            execution_engine,
            order_state_machine: OrderStateMachine::new(),
            audit_logger,
            alert_service,
            metrics,
            health_server,
            policy,
            loop_config,
            circuits: CircuitBreakerState { last_connectivity_ok: true, ..Default::default() },
            instance_lock,
            clock_sync,
            secret_rotation,
            portfolio: PortfolioState::empty(Decimal::ZERO),
        }
    }

    /// Clock sync, instance lock, secret-rotation check, and the initial
    /// state load — everything that must happen once before the loop
    /// starts repeating (spec §5).
    pub async fn startup(&mut self) -> Result<(), ErrorKind> {
        self.clock_sync.validate_or_fail(self.mode).await?;
        self.instance_lock.acquire(false)?;
        self.secret_rotation
            .ensure_initialized()
            .map_err(|err| ErrorKind::ValidationError(format!("failed to initialize secret rotation metadata: {err}")))?;
        let rotation_status = self.secret_rotation.check();
        if rotation_status.rotation_due {
            self.alert_service
                .dispatch(Alert {
                    severity: AlertSeverity::Critical,
                    summary: "API secrets overdue for rotation".to_string(),
                    detail: serde_json::json!({"days_since_rotation": rotation_status.days_since_rotation}),
                })
                .await;
        }

        self.portfolio = self.state_store.load().await?;

        if let Some(health_server) = &self.health_server {
            health_server.spawn();
        }

        info!(mode = ?self.mode, "trading loop startup complete");
        Ok(())
    }

    /// Runs cycles until `once` is set, sleeping `loop.interval_seconds`
    /// (+/- `loop.jitter_pct`) between them.
    pub async fn run(&mut self, once: bool) {
        loop {
            let now = Utc::now();
            let record = self.run_once(now).await;
            self.update_health(&record).await;
            self.audit_logger.record(&record);

            if once {
                break;
            }
            tokio::time::sleep(self.sleep_duration()).await;
        }
    }

    /// Cancels every open order, flushes final state, and releases the
    /// instance lock — the reverse order of startup (spec §5).
    pub async fn shutdown(&mut self) {
        if let Err(err) = self.execution_engine.cancel_all_open(self.exchange.as_ref(), &mut self.order_state_machine).await {
            error!(error = %err, "failed to cancel open orders during shutdown");
        }
        if let Err(err) = self.state_store.save(&self.portfolio).await {
            error!(error = %err, "failed to persist final state during shutdown");
        }
        self.instance_lock.release();
        info!("trading loop shutdown complete");
    }

    async fn refresh_portfolio(&mut self) -> Result<(), ErrorKind> {
        let balances = self.exchange.get_accounts().await?;
        self.portfolio.cash_balances.clear();
        let mut cash_usd = Decimal::ZERO;
        for balance in balances {
            let total = balance.available + balance.hold;
            if balance.currency == "USD" {
                cash_usd += total;
            }
            self.portfolio.cash_balances.insert(balance.currency, total);
        }
        let positions_usd: Decimal = self.portfolio.open_positions.values().map(|p| p.current_usd).sum();
        self.portfolio.account_value_usd = cash_usd + positions_usd;
        self.portfolio.update_high_water_mark();
        Ok(())
    }

    /// One fetch -> propose -> risk-gate -> execute -> persist pass. Never
    /// panics: every fallible step degrades to a no-trade reason rather than
    /// aborting the whole cycle, per the fail-closed data policy (spec §7).
    pub async fn run_once(&mut self, now: DateTime<Utc>) -> CycleAuditRecord {
        let cycle_start = StdInstant::now();
        let cycle_id = Uuid::new_v4().to_string();
        let mut no_trade_reasons = Vec::new();

        if let Err(err) = self.refresh_portfolio().await {
            self.circuits.consecutive_api_errors += 1;
            self.circuits.last_connectivity_ok = false;
            no_trade_reasons.push(err.no_trade_reason());
            return self.finish_cycle(cycle_id, now, cycle_start, 0, 0, 0, 0, 0, no_trade_reasons);
        }
        self.circuits.consecutive_api_errors = 0;
        self.circuits.last_connectivity_ok = true;

        if let Err(err) = self.execution_engine.manage_open_orders(self.exchange.as_ref(), &mut self.order_state_machine, &self.policy, now).await {
            warn!(error = %err, "failed to sweep stale open orders");
        }

        let trims = self.portfolio_trimmer.trim_over_cap_positions(self.exchange.as_ref(), &self.portfolio, &self.policy).await;
        if !trims.is_empty() {
            for trim in &trims {
                no_trade_reasons.push(format!("{}:auto_trimmed:{}", trim.symbol, trim.freed_usd));
                if let Some(position) = self.portfolio.open_positions.get_mut(&trim.symbol) {
                    let remaining_fraction = (Decimal::ONE - trim.freed_usd / position.current_usd).max(Decimal::ZERO);
                    position.current_usd *= remaining_fraction;
                    position.base_qty *= remaining_fraction;
                    if position.current_usd <= Decimal::ZERO {
                        self.portfolio.open_positions.remove(&trim.symbol);
                    }
                }
            }
            if let Err(err) = self.refresh_portfolio().await {
                no_trade_reasons.push(err.no_trade_reason());
                return self.finish_cycle(cycle_id, now, cycle_start, 0, 0, 0, 0, 0, no_trade_reasons);
            }
        }

        let universe = match self.universe.get(now).await {
            Ok(universe) => universe,
            Err(err) => {
                no_trade_reasons.push(err.no_trade_reason());
                return self.finish_cycle(cycle_id, now, cycle_start, 0, 0, 0, 0, 0, no_trade_reasons);
            }
        };

        let mut quotes = HashMap::new();
        let mut proposals = Vec::new();
        for symbol in universe.keys() {
            let quote = match self.exchange.get_quote(symbol).await {
                Ok(quote) => quote,
                Err(err) => {
                    no_trade_reasons.push(format!("{symbol}:{}", err.no_trade_reason()));
                    continue;
                }
            };
            if quote.is_stale(now, self.policy.microstructure.max_quote_age_seconds) {
                self.circuits.stale_or_invalid_snapshot_count += 1;
                no_trade_reasons.push(format!("{symbol}:stale_quote"));
                continue;
            }
            self.circuits.stale_or_invalid_snapshot_count = 0;

            let candles = self
                .exchange
                .get_candles(symbol, CandleInterval::OneHour, now - Duration::hours(48), now)
                .await
                .unwrap_or_default();

            let symbol_proposals = self.strategies.propose_for_symbol(symbol, &quote, &candles, &self.portfolio).await;
            proposals.extend(symbol_proposals);
            quotes.insert(symbol.clone(), quote);
        }

        let exit_proposals = self.position_manager.evaluate_exits(&self.portfolio, &quotes, now);
        proposals.extend(exit_proposals);
        let proposals = StrategyRegistry::dedupe_by_symbol(proposals);
        let proposals_considered = proposals.len();

        let decision = self.risk_engine.evaluate(self.mode.is_live(), proposals, &self.portfolio, &self.policy, &self.circuits, now);
        if !decision.approved {
            if let Some(reason) = &decision.reason {
                no_trade_reasons.push(reason.clone());
            }
            return self.finish_cycle(cycle_id, now, cycle_start, universe.len(), proposals_considered, 0, 0, 0, no_trade_reasons);
        }
        for (symbol, reasons) in &decision.proposal_rejections {
            no_trade_reasons.push(format!("{symbol}:{}", reasons.join(",")));
        }

        let mut requests = Vec::new();
        let mut request_proposals = Vec::new();
        for proposal in &decision.approved_proposals {
            let Some(quote) = quotes.get(&proposal.symbol) else {
                no_trade_reasons.push(format!("{}:no_quote_for_approved_proposal", proposal.symbol));
                continue;
            };
            let metadata = match self.exchange.get_product_metadata(&proposal.symbol).await {
                Ok(metadata) => metadata,
                Err(err) => {
                    no_trade_reasons.push(format!("{}:{}", proposal.symbol, err.no_trade_reason()));
                    continue;
                }
            };
            let tier_is_t1 = universe.get(&proposal.symbol).copied() == Some(1);
            let size_usd = proposal_notional_usd(proposal, self.portfolio.account_value_usd);
            requests.push((
                proposal.symbol.clone(),
                proposal.side,
                size_usd,
                quote.clone(),
                metadata.quote_increment,
                metadata.base_increment,
                tier_is_t1,
            ));
            request_proposals.push(proposal.clone());
        }

        let proposals_approved = decision.approved_proposals.len();
        let outcomes = self
            .execution_engine
            .execute_batch(self.exchange.as_ref(), self.state_store.as_ref(), &mut self.order_state_machine, requests, now, &self.policy)
            .await;

        let mut orders_placed = 0;
        let mut orders_filled = 0;
        for (outcome, proposal) in outcomes.iter().zip(request_proposals.iter()) {
            match outcome {
                Ok(ExecutionOutcome::Filled(order)) => {
                    orders_placed += 1;
                    orders_filled += 1;
                    self.metrics.inc_orders(&order.side.to_string(), "filled");
                    if matches!(proposal.trigger_name.as_str(), "stop_loss" | "take_profit" | "max_hold_duration") {
                        self.risk_engine.apply_symbol_cooldown(&proposal.symbol, proposal.trigger_name == "stop_loss", now);
                    }
                    if let Err(err) = self.state_store.record_open_order(order).await {
                        warn!(error = %err, "failed to record filled order before closing it");
                    }
                    if let Err(err) = self.state_store.close_order(&order.client_order_id, order.status, "filled").await {
                        warn!(error = %err, "failed to close filled order in the open-orders ledger");
                    }
                }
                Ok(ExecutionOutcome::Pending(order)) => {
                    orders_placed += 1;
                    self.metrics.inc_orders(&order.side.to_string(), "pending");
                    if let Err(err) = self.state_store.record_open_order(order).await {
                        warn!(error = %err, "failed to record pending order");
                    }
                }
                Ok(ExecutionOutcome::Rejected { order, reason }) => {
                    self.metrics.inc_orders(&order.side.to_string(), "rejected");
                    no_trade_reasons.push(format!("{}:{reason}", order.symbol));
                }
                Err(err) => {
                    no_trade_reasons.push(err.no_trade_reason());
                }
            }
        }

        if let Err(err) = self.state_store.save(&self.portfolio).await {
            error!(error = %err, "failed to persist portfolio state after cycle");
        }

        self.finish_cycle(
            cycle_id,
            now,
            cycle_start,
            universe.len(),
            proposals_considered,
            orders_placed,
            orders_filled,
            proposals_approved,
            no_trade_reasons,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_cycle(
        &mut self,
        cycle_id: String,
        now: DateTime<Utc>,
        started: StdInstant,
        universe_size: usize,
        proposals_considered: usize,
        orders_placed: usize,
        orders_filled: usize,
        proposals_approved: usize,
        no_trade_reasons: Vec<String>,
    ) -> CycleAuditRecord {
        let duration_ms = started.elapsed().as_millis() as u64;

        self.metrics.account_value_usd.set(self.portfolio.account_value_usd.to_f64().unwrap_or(0.0));
        self.metrics.positions_count.set(self.portfolio.open_position_count(Decimal::ZERO) as f64);
        self.metrics.daily_pnl_pct.set(self.portfolio.daily_pnl_pct.to_f64().unwrap_or(0.0));
        self.metrics.drawdown_pct.set(self.portfolio.drawdown_from_high_water_mark_pct().to_f64().unwrap_or(0.0));
        self.metrics.observe_cycle_stage("full_cycle", duration_ms as f64 / 1000.0);
        for reason in &no_trade_reasons {
            self.metrics.inc_no_trade(reason);
        }
        for (name, tripped) in &self.circuits.tripped {
            self.metrics.set_circuit_status(name, *tripped);
        }

        CycleAuditRecord {
            cycle_id,
            timestamp: now,
            mode: format!("{:?}", self.mode).to_uppercase(),
            universe_size,
            proposals_considered,
            proposals_approved,
            proposals_rejected: proposals_considered.saturating_sub(proposals_approved),
            orders_placed,
            orders_filled,
            no_trade_reasons,
            account_value_usd: self.portfolio.account_value_usd,
            cycle_duration_ms: duration_ms,
        }
    }

    async fn update_health(&self, record: &CycleAuditRecord) {
        let Some(health_server) = &self.health_server else { return };
        let ok = self.circuits.any_tripped(&self.policy).is_none() && self.circuits.consecutive_api_errors == 0;
        health_server
            .update(HealthStatus {
                ok,
                mode: record.mode.clone(),
                last_cycle_at: Some(record.timestamp),
                last_cycle_duration_ms: Some(record.cycle_duration_ms),
                consecutive_errors: self.circuits.consecutive_api_errors,
                account_value_usd: Some(record.account_value_usd),
                open_position_count: self.portfolio.open_position_count(Decimal::ZERO),
                circuit_breakers_tripped: self.circuits.tripped.iter().filter(|(_, tripped)| **tripped).map(|(name, _)| name.clone()).collect(),
            })
            .await;
    }

    fn sleep_duration(&self) -> StdDuration {
        let base = self.loop_config.interval_seconds as f64;
        let jitter_range = base * (self.loop_config.jitter_pct / 100.0);
        let jitter = if jitter_range > 0.0 { rand::rng().random_range(-jitter_range..=jitter_range) } else { 0.0 };
        StdDuration::from_secs_f64((base + jitter).max(1.0))
    }
}
