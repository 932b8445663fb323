//! Exit proposal generation for already-open positions (spec §4.7):
//! stop-loss, take-profit, and max-hold-duration. These proposals bypass
//! the normal risk-sizing pipeline (they only ever reduce exposure) but
//! still flow through the RiskEngine for cooldown/circuit bookkeeping.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::domain::market::Quote;
use crate::domain::order::OrderSide;
use crate::domain::portfolio::PortfolioState;
use crate::domain::proposal::{SizeHint, Tier, TradeProposal};

pub struct PositionManager;

impl PositionManager {
    pub fn new() -> Self {
        Self
    }

    /// Checks every managed position against its stop-loss/take-profit/
    /// max-hold policy using the latest quote for that symbol. Proposals
    /// are always full-exit sells sized at the position's current value.
    pub fn evaluate_exits(
        &self,
        portfolio: &PortfolioState,
        quotes: &std::collections::HashMap<String, Quote>,
        now: DateTime<Utc>,
    ) -> Vec<TradeProposal> {
        let mut proposals = Vec::new();

        for (symbol, position) in &portfolio.open_positions {
            let Some(managed) = portfolio.managed_positions.get(symbol) else {
                continue;
            };
            let Some(quote) = quotes.get(symbol) else {
                continue;
            };

            let pnl_pct = position.unrealized_pnl_pct(quote.mid);
            let mut trigger: Option<&'static str> = None;

            if let Some(stop_loss_pct) = managed.stop_loss_pct {
                if pnl_pct <= -stop_loss_pct {
                    trigger = Some("stop_loss");
                }
            }
            if trigger.is_none() {
                if let Some(take_profit_pct) = managed.take_profit_pct {
                    if pnl_pct >= take_profit_pct {
                        trigger = Some("take_profit");
                    }
                }
            }
            if trigger.is_none() && managed.exceeds_max_hold(now) {
                trigger = Some("max_hold_duration");
            }

            if let Some(trigger_name) = trigger {
                info!(symbol = %symbol, trigger = trigger_name, pnl_pct = %pnl_pct, "position exit triggered");
                let mut proposal = TradeProposal::new(
                    symbol.clone(),
                    OrderSide::Sell,
                    SizeHint::NotionalUsd(position.current_usd),
                    Tier::T1,
                    trigger_name,
                );
                proposal.confidence = Decimal::ONE;
                proposal.notes = Some(format!("pnl_pct={pnl_pct}"));
                proposals.push(proposal);
            }
        }

        proposals
    }
}

impl Default for PositionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::portfolio::{ManagedPosition, Position};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn quote(symbol: &str, mid: Decimal) -> Quote {
        Quote::new(symbol, mid - dec!(1), mid + dec!(1), mid, dec!(100), Utc::now())
    }

    #[test]
    fn stop_loss_triggers_exit_proposal() {
        let mut portfolio = PortfolioState::empty(dec!(10000));
        portfolio.open_positions.insert(
            "BTC-USD".to_string(),
            Position { base_qty: dec!(1), entry_price: dec!(100), entry_value_usd: dec!(100), fees_paid: Decimal::ZERO, current_usd: dec!(90) },
        );
        portfolio.managed_positions.insert(
            "BTC-USD".to_string(),
            ManagedPosition { stop_loss_pct: Some(dec!(5)), take_profit_pct: None, max_hold_hours: None, opened_at: Utc::now() },
        );
        let mut quotes = HashMap::new();
        quotes.insert("BTC-USD".to_string(), quote("BTC-USD", dec!(90)));

        let pm = PositionManager::new();
        let proposals = pm.evaluate_exits(&portfolio, &quotes, Utc::now());
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].trigger_name, "stop_loss");
        assert_eq!(proposals[0].side, OrderSide::Sell);
    }

    #[test]
    fn position_within_bounds_does_not_exit() {
        let mut portfolio = PortfolioState::empty(dec!(10000));
        portfolio.open_positions.insert(
            "BTC-USD".to_string(),
            Position { base_qty: dec!(1), entry_price: dec!(100), entry_value_usd: dec!(100), fees_paid: Decimal::ZERO, current_usd: dec!(102) },
        );
        portfolio.managed_positions.insert(
            "BTC-USD".to_string(),
            ManagedPosition { stop_loss_pct: Some(dec!(5)), take_profit_pct: Some(dec!(10)), max_hold_hours: Some(dec!(24)), opened_at: Utc::now() },
        );
        let mut quotes = HashMap::new();
        quotes.insert("BTC-USD".to_string(), quote("BTC-USD", dec!(102)));

        let pm = PositionManager::new();
        let proposals = pm.evaluate_exits(&portfolio, &quotes, Utc::now());
        assert!(proposals.is_empty());
    }

    #[test]
    fn max_hold_duration_triggers_exit_even_when_flat() {
        let mut portfolio = PortfolioState::empty(dec!(10000));
        portfolio.open_positions.insert(
            "ETH-USD".to_string(),
            Position { base_qty: dec!(1), entry_price: dec!(100), entry_value_usd: dec!(100), fees_paid: Decimal::ZERO, current_usd: dec!(100) },
        );
        let opened_at = Utc::now() - chrono::Duration::hours(48);
        portfolio.managed_positions.insert(
            "ETH-USD".to_string(),
            ManagedPosition { stop_loss_pct: Some(dec!(5)), take_profit_pct: Some(dec!(10)), max_hold_hours: Some(dec!(24)), opened_at },
        );
        let mut quotes = HashMap::new();
        quotes.insert("ETH-USD".to_string(), quote("ETH-USD", dec!(100)));

        let pm = PositionManager::new();
        let proposals = pm.evaluate_exits(&portfolio, &quotes, Utc::now());
        assert_eq!(proposals[0].trigger_name, "max_hold_duration");
    }
}
