//! Auto-trim: liquidates part of an over-cap position at the very start of
//! a cycle, before any new proposal is generated (spec data flow: "refresh
//! portfolio -> auto-trim if over cap -> UniverseBuilder"). Slices the
//! excess into `purge_execution.slice_usd` chunks the way the original's
//! TWAP liquidation does, stopping once the freed amount covers the excess
//! (less tolerance) or the slice/no-fill budget runs out. Simplified from
//! the original's full post-only-then-IOC-fallback polling loop to
//! synchronous taker slices, since this engine's `ExchangeClient` reports
//! fills immediately rather than needing a poll-to-terminal step.

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::policy_config::PolicyConfig;
use crate::domain::errors::ErrorKind;
use crate::domain::order::OrderSide;
use crate::domain::portfolio::PortfolioState;
use crate::domain::ports::{ExchangeClient, OrderConfiguration, PlaceOrderRequest};

/// One symbol's trim result, surfaced to the audit record as a no-trade
/// reason so operators can see what got liquidated and why.
#[derive(Debug, Clone)]
pub struct TrimOutcome {
    pub symbol: String,
    pub excess_usd: Decimal,
    pub freed_usd: Decimal,
}

pub struct PortfolioTrimmer;

impl PortfolioTrimmer {
    pub fn new() -> Self {
        Self
    }

    /// Positions whose USD value exceeds `per_symbol_cap_pct` of NAV by
    /// more than `trim_tolerance_pct`, worst offender first.
    fn over_cap_symbols(portfolio: &PortfolioState, policy: &PolicyConfig) -> Vec<(String, Decimal)> {
        if portfolio.account_value_usd <= Decimal::ZERO {
            return Vec::new();
        }
        let cap_usd = portfolio.account_value_usd * policy.risk.per_symbol_cap_pct / Decimal::from(100);
        let tolerance_usd = portfolio.account_value_usd * policy.portfolio_management.trim_tolerance_pct / Decimal::from(100);

        let mut offenders: Vec<(String, Decimal)> = portfolio
            .open_positions
            .iter()
            .filter_map(|(symbol, position)| {
                let excess = position.current_usd - cap_usd;
                (excess > tolerance_usd).then(|| (symbol.clone(), excess))
            })
            .collect();
        offenders.sort_by(|a, b| b.1.cmp(&a.1));
        offenders
    }

    /// Trims every over-cap symbol, up to `max_liquidations_per_cycle` per
    /// call. No-op when `auto_trim_to_risk_cap` is off.
    pub async fn trim_over_cap_positions(
        &self,
        exchange: &dyn ExchangeClient,
        portfolio: &PortfolioState,
        policy: &PolicyConfig,
    ) -> Vec<TrimOutcome> {
        if !policy.portfolio_management.auto_trim_to_risk_cap {
            return Vec::new();
        }

        let offenders = Self::over_cap_symbols(portfolio, policy);
        let mut outcomes = Vec::new();
        for (symbol, excess_usd) in offenders.into_iter().take(policy.portfolio_management.max_liquidations_per_cycle as usize) {
            let buffer_usd = portfolio.account_value_usd * policy.portfolio_management.trim_target_buffer_pct / Decimal::from(100);
            let target_usd = excess_usd + buffer_usd;
            if target_usd < policy.portfolio_management.trim_min_value_usd {
                continue;
            }

            match self.liquidate_slices(exchange, &symbol, target_usd, policy).await {
                Ok(freed_usd) => {
                    info!(symbol = %symbol, %freed_usd, %excess_usd, "auto-trimmed over-cap position");
                    outcomes.push(TrimOutcome { symbol, excess_usd, freed_usd });
                }
                Err(err) => warn!(symbol = %symbol, error = %err, "auto-trim liquidation failed"),
            }
        }
        outcomes
    }

    /// Sells `target_usd` worth of `symbol` in `slice_usd`-sized market IOC
    /// chunks, giving up after `max_consecutive_no_fill` empty slices or
    /// `max_slices` attempts.
    async fn liquidate_slices(
        &self,
        exchange: &dyn ExchangeClient,
        symbol: &str,
        target_usd: Decimal,
        policy: &PolicyConfig,
    ) -> Result<Decimal, ErrorKind> {
        let cfg = &policy.portfolio_management.purge_execution;
        let mut filled_usd = Decimal::ZERO;
        let mut consecutive_no_fill = 0u32;

        for slice_index in 0..cfg.max_slices {
            let remaining = target_usd - filled_usd;
            if remaining < cfg.max_residual_usd {
                break;
            }

            let quote = exchange.get_quote(symbol).await?;
            let slice_usd = remaining.min(cfg.slice_usd);
            let base_size = slice_usd / quote.mid;

            let response = exchange
                .place_order(PlaceOrderRequest {
                    client_order_id: format!("trim-{symbol}-{slice_index}"),
                    product_id: symbol.to_string(),
                    side: OrderSide::Sell,
                    configuration: OrderConfiguration::MarketIoc { quote_size: None, base_size: Some(base_size) },
                })
                .await?;

            if !response.success {
                consecutive_no_fill += 1;
                if consecutive_no_fill >= cfg.max_consecutive_no_fill {
                    break;
                }
                continue;
            }

            let fills = exchange.list_fills(Some(&response.exchange_order_id), Some(symbol), None).await?;
            let slice_filled_usd: Decimal = fills.iter().map(|f| if f.size_in_quote { f.size } else { f.size * f.price }).sum();

            if slice_filled_usd <= Decimal::ZERO {
                consecutive_no_fill += 1;
                if consecutive_no_fill >= cfg.max_consecutive_no_fill {
                    break;
                }
            } else {
                consecutive_no_fill = 0;
                filled_usd += slice_filled_usd;
            }
        }
        Ok(filled_usd)
    }
}

impl Default for PortfolioTrimmer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use crate::domain::market::Quote;
    use crate::domain::portfolio::Position;
    use crate::infrastructure::mock::MockExchangeClient;

    fn test_policy() -> PolicyConfig {
        serde_yaml::from_str(
            r#"
risk:
  max_total_at_risk_pct: 50
  per_symbol_cap_pct: 15
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
  kill_switch_file: /tmp/rustrade-trimmer-test-kill-switch-does-not-exist
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

    /// Spec scenario 5: nav=$500, a $440 position against a 15% cap
    /// produces one liquidation attempt that frees at least
    /// `excess_usd - tolerance`.
    #[tokio::test]
    async fn auto_trims_a_position_far_over_its_symbol_cap() {
        let policy = test_policy();
        let exchange = MockExchangeClient::new();
        exchange.set_quote(Quote::new("PEPE-USD", dec!(0.00099), dec!(0.00101), dec!(0.001), dec!(1_000_000), Utc::now())).await;

        let mut portfolio = PortfolioState::empty(dec!(500));
        portfolio.open_positions.insert(
            "PEPE-USD".to_string(),
            Position { base_qty: dec!(440000), entry_price: dec!(0.001), entry_value_usd: dec!(440), fees_paid: Decimal::ZERO, current_usd: dec!(440) },
        );

        let trimmer = PortfolioTrimmer::new();
        let outcomes = trimmer.trim_over_cap_positions(&exchange, &portfolio, &policy).await;

        assert_eq!(outcomes.len(), 1);
        let outcome = &outcomes[0];
        assert_eq!(outcome.symbol, "PEPE-USD");
        // cap = 15% * 500 = 75, excess = 440 - 75 = 365
        assert_eq!(outcome.excess_usd, dec!(365));
        let tolerance_usd = dec!(500) * policy.portfolio_management.trim_tolerance_pct / Decimal::from(100);
        assert!(outcome.freed_usd >= outcome.excess_usd - tolerance_usd, "freed {} too small vs excess {}", outcome.freed_usd, outcome.excess_usd);
    }

    #[tokio::test]
    async fn leaves_positions_within_cap_untouched() {
        let policy = test_policy();
        let exchange = MockExchangeClient::new();
        exchange.set_quote(Quote::new("BTC-USD", dec!(49990), dec!(50010), dec!(50000), dec!(100), Utc::now())).await;

        let mut portfolio = PortfolioState::empty(dec!(10000));
        portfolio.open_positions.insert(
            "BTC-USD".to_string(),
            Position { base_qty: dec!(0.02), entry_price: dec!(50000), entry_value_usd: dec!(1000), fees_paid: Decimal::ZERO, current_usd: dec!(1000) },
        );

        let trimmer = PortfolioTrimmer::new();
        let outcomes = trimmer.trim_over_cap_positions(&exchange, &portfolio, &policy).await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn disabled_auto_trim_is_a_no_op() {
        let mut policy = test_policy();
        policy.portfolio_management.auto_trim_to_risk_cap = false;
        let exchange = MockExchangeClient::new();
        exchange.set_quote(Quote::new("PEPE-USD", dec!(0.00099), dec!(0.00101), dec!(0.001), dec!(1_000_000), Utc::now())).await;

        let mut portfolio = PortfolioState::empty(dec!(500));
        portfolio.open_positions.insert(
            "PEPE-USD".to_string(),
            Position { base_qty: dec!(440000), entry_price: dec!(0.001), entry_value_usd: dec!(440), fees_paid: Decimal::ZERO, current_usd: dec!(440) },
        );

        let trimmer = PortfolioTrimmer::new();
        let outcomes = trimmer.trim_over_cap_positions(&exchange, &portfolio, &policy).await;
        assert!(outcomes.is_empty());
    }
}
