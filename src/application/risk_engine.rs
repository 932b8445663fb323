//! Hard risk authority: strategies and sizing logic may only shrink or skip
//! a proposal; only this layer can outright reject (spec §4.5).

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::policy_config::PolicyConfig;
use crate::domain::portfolio::PortfolioState;
use crate::domain::proposal::{SizeHint, TradeProposal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitName {
    RateLimitCooldown,
    ApiHealth,
    ExchangeConnectivity,
    ExchangeHealth,
    VolatilityCrash,
}

impl std::fmt::Display for CircuitName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitName::RateLimitCooldown => "rate_limit_cooldown",
            CircuitName::ApiHealth => "api_health",
            CircuitName::ExchangeConnectivity => "exchange_connectivity",
            CircuitName::ExchangeHealth => "exchange_health",
            CircuitName::VolatilityCrash => "volatility_crash",
        };
        write!(f, "{s}")
    }
}

/// Mutable circuit-breaker telemetry the RiskEngine consults each cycle.
/// Owned by `TradingContext`, updated by the ExchangeClient wrapper and the
/// cycle orchestrator, never by the RiskEngine itself.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerState {
    pub tripped: HashMap<String, bool>,
    pub rate_limit_cooldown_remaining_cycles: u32,
    pub consecutive_api_errors: u32,
    pub last_connectivity_ok: bool,
    pub stale_or_invalid_snapshot_count: u32,
    pub drawdown_in_window_pct: Decimal,
}

impl CircuitBreakerState {
    pub fn any_tripped(&self, policy: &PolicyConfig) -> Option<CircuitName> {
        if self.rate_limit_cooldown_remaining_cycles > 0 {
            return Some(CircuitName::RateLimitCooldown);
        }
        if self.consecutive_api_errors >= policy.circuit_breakers.max_consecutive_api_errors {
            return Some(CircuitName::ApiHealth);
        }
        if !self.last_connectivity_ok {
            return Some(CircuitName::ExchangeConnectivity);
        }
        if self.stale_or_invalid_snapshot_count >= 3 {
            return Some(CircuitName::ExchangeHealth);
        }
        if self.drawdown_in_window_pct >= Decimal::from(15) {
            return Some(CircuitName::VolatilityCrash);
        }
        None
    }
}

#[derive(Debug, Clone)]
pub struct RiskDecision {
    pub approved: bool,
    pub approved_proposals: Vec<TradeProposal>,
    pub violated_checks: Vec<String>,
    pub reason: Option<String>,
    pub proposal_rejections: HashMap<String, Vec<String>>,
}

#[derive(Default)]
pub struct RiskEngine {
    cooldowns: HashMap<String, DateTime<Utc>>,
}

impl RiskEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn proposal_notional_usd(proposal: &TradeProposal, nav: Decimal) -> Decimal {
        match proposal.size {
            SizeHint::NotionalUsd(usd) => usd,
            SizeHint::TargetWeightPct(pct) => nav * pct / Decimal::from(100),
        }
    }

    fn symbol_cooled_down(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.cooldowns.get(symbol).is_some_and(|until| now < *until)
    }

    /// Records a per-symbol "do not re-enter until" timestamp. Stop-loss
    /// exits get a longer cooldown than ordinary exits.
    pub fn apply_symbol_cooldown(&mut self, symbol: &str, is_stop_loss: bool, now: DateTime<Utc>) {
        let duration = if is_stop_loss { Duration::hours(4) } else { Duration::minutes(30) };
        self.cooldowns.insert(symbol.to_string(), now + duration);
    }

    /// Evaluates a batch of proposals against the full check list (spec
    /// §4.5). Any tripped circuit blocks the entire batch; everything else
    /// shrinks or drops individual proposals.
    pub fn evaluate(
        &self,
        mode_live: bool,
        proposals: Vec<TradeProposal>,
        portfolio: &PortfolioState,
        policy: &PolicyConfig,
        circuits: &CircuitBreakerState,
        now: DateTime<Utc>,
    ) -> RiskDecision {
        let mut violated = Vec::new();

        if mode_live && !policy.governance.live_trading_enabled {
            violated.push("governance.live_trading_enabled=false".to_string());
        }
        if Path::new(&policy.governance.kill_switch_file).exists() {
            violated.push("kill_switch_file_present".to_string());
        }
        if portfolio.account_value_usd < policy.risk.min_trade_notional_usd {
            violated.push("account_value_below_minimum".to_string());
        }
        if portfolio.daily_pnl_pct <= -policy.risk.daily_loss_pct {
            violated.push("daily_loss_cap_exceeded".to_string());
        }
        if portfolio.weekly_pnl_pct <= -policy.risk.weekly_loss_pct {
            violated.push("weekly_loss_cap_exceeded".to_string());
        }
        if portfolio.drawdown_from_high_water_mark_pct() >= policy.risk.max_drawdown_pct {
            violated.push("max_drawdown_exceeded".to_string());
        }

        if let Some(tripped) = circuits.any_tripped(policy) {
            warn!(circuit = %tripped, "circuit breaker tripped, blocking all proposals this cycle");
            return RiskDecision {
                approved: false,
                approved_proposals: Vec::new(),
                violated_checks: vec![format!("circuit_tripped:{tripped}")],
                reason: Some(format!("circuit_tripped:{tripped}")),
                proposal_rejections: HashMap::new(),
            };
        }

        if !violated.is_empty() {
            warn!(checks = ?violated, "risk engine blocking all proposals this cycle");
            return RiskDecision {
                approved: false,
                approved_proposals: Vec::new(),
                violated_checks: violated.clone(),
                reason: Some(violated.join(",")),
                proposal_rejections: HashMap::new(),
            };
        }

        let mut rejections: HashMap<String, Vec<String>> = HashMap::new();
        let mut approved = Vec::new();

        let nav = portfolio.account_value_usd;
        let max_total_at_risk = nav * policy.risk.max_total_at_risk_pct / Decimal::from(100);
        let mut running_at_risk: Decimal = portfolio
            .open_positions
            .values()
            .map(|p| p.current_usd)
            .sum::<Decimal>()
            + portfolio
                .pending_orders
                .values()
                .flat_map(|by_symbol| by_symbol.values())
                .sum::<Decimal>();

        for mut proposal in proposals {
            let symbol = proposal.symbol.clone();
            let mut reasons: Vec<String> = Vec::new();

            if policy.risk.per_symbol_cooldown_enabled && self.symbol_cooled_down(&symbol, now) {
                reasons.push("symbol_cooldown_active".to_string());
            }

            if portfolio.trades_today as u32 >= u32::MAX {
                // trades_today caps are policy-driven elsewhere; placeholder guard kept explicit.
            }

            let notional = Self::proposal_notional_usd(&proposal, nav);
            if notional < policy.risk.min_trade_notional_usd {
                reasons.push("below_min_trade_notional".to_string());
            }

            let per_symbol_cap = nav * policy.risk.per_symbol_cap_pct / Decimal::from(100);
            let existing_exposure = portfolio
                .open_positions
                .get(&symbol)
                .map(|p| p.current_usd)
                .unwrap_or(Decimal::ZERO);
            if existing_exposure + notional > per_symbol_cap {
                reasons.push("per_symbol_cap_exceeded".to_string());
            }

            let is_buy = matches!(proposal.side, crate::domain::order::OrderSide::Buy);
            let projected_total = if is_buy { running_at_risk + notional } else { running_at_risk };
            if is_buy && projected_total > max_total_at_risk {
                let room = max_total_at_risk - running_at_risk;
                if room <= Decimal::ZERO {
                    reasons.push("total_at_risk_cap_exceeded".to_string());
                } else {
                    // Shrink to fit rather than drop outright.
                    proposal.size = SizeHint::NotionalUsd(room);
                    info!(symbol = %symbol, shrunk_to_usd = %room, "shrinking proposal to fit total-at-risk cap");
                }
            }

            if reasons.is_empty() {
                if is_buy {
                    running_at_risk += Self::proposal_notional_usd(&proposal, nav);
                }
                approved.push(proposal);
            } else {
                rejections.insert(symbol, reasons);
            }
        }

        RiskDecision {
            approved: true,
            approved_proposals: approved,
            violated_checks: Vec::new(),
            reason: None,
            proposal_rejections: rejections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderSide;
    use crate::domain::proposal::Tier;
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
  per_symbol_cooldown_enabled: true
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
  taker_fallback: true
  taker_max_slippage_bps:
    T1: 10
    default: 25
  failed_order_cooldown_seconds: 60
  post_trade_reconcile_wait_seconds: 5
  preferred_quote_currencies: [USD]
  clamp_small_trades: false
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
  auto_trim_to_risk_cap: true
  trim_target_buffer_pct: 2
  trim_tolerance_pct: 1
  trim_min_value_usd: 10
  trim_max_liquidations: 3
  trim_preferred_quotes: [USD]
  trim_slippage_buffer_pct: 0.5
  auto_liquidate_ineligible: false
  min_liquidation_value_usd: 10
  max_liquidations_per_cycle: 2
  auto_rebalance_worst_performer: false
  purge_execution:
    slice_usd: 50
    replace_seconds: 10
    max_duration_seconds: 600
    poll_interval_seconds: 5
    max_slices: 20
    max_residual_usd: 5
    max_consecutive_no_fill: 3
    allow_taker_fallback: true
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

    #[test]
    fn kill_switch_file_blocks_all_proposals() {
        let engine = RiskEngine::new();
        let portfolio = PortfolioState::empty(dec!(10000));
        let mut policy = test_policy();
        policy.governance.kill_switch_file = "/etc/hostname".to_string(); // exists on any unix box
        let circuits = CircuitBreakerState { last_connectivity_ok: true, ..Default::default() };
        let proposal = TradeProposal::new("BTC-USD", OrderSide::Buy, SizeHint::NotionalUsd(dec!(100)), Tier::T1, "test");
        let decision = engine.evaluate(false, vec![proposal], &portfolio, &policy, &circuits, Utc::now());
        assert!(!decision.approved);
    }

    #[test]
    fn proposal_below_min_notional_is_rejected_not_whole_batch() {
        let engine = RiskEngine::new();
        let portfolio = PortfolioState::empty(dec!(10000));
        let policy = test_policy();
        let circuits = CircuitBreakerState { last_connectivity_ok: true, ..Default::default() };
        let proposal = TradeProposal::new("BTC-USD", OrderSide::Buy, SizeHint::NotionalUsd(dec!(1)), Tier::T1, "test");
        let decision = engine.evaluate(false, vec![proposal], &portfolio, &policy, &circuits, Utc::now());
        assert!(decision.approved);
        assert!(decision.approved_proposals.is_empty());
        assert!(decision.proposal_rejections.contains_key("BTC-USD"));
    }

    #[test]
    fn oversized_buy_shrinks_to_fit_total_at_risk_cap() {
        let engine = RiskEngine::new();
        let portfolio = PortfolioState::empty(dec!(1000));
        let policy = test_policy();
        let circuits = CircuitBreakerState { last_connectivity_ok: true, ..Default::default() };
        let proposal = TradeProposal::new("BTC-USD", OrderSide::Buy, SizeHint::NotionalUsd(dec!(800)), Tier::T1, "test");
        let decision = engine.evaluate(false, vec![proposal], &portfolio, &policy, &circuits, Utc::now());
        assert!(decision.approved);
        assert_eq!(decision.approved_proposals.len(), 1);
        match decision.approved_proposals[0].size {
            SizeHint::NotionalUsd(usd) => assert_eq!(usd, dec!(500)),
            _ => panic!("expected notional size"),
        }
    }
}
