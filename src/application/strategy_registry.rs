//! Aggregates proposals from every enabled [`Strategy`], one call per
//! eligible symbol per cycle, deduping by symbol when more than one
//! strategy proposes the same trade.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::domain::market::{Candle, Quote};
use crate::domain::portfolio::PortfolioState;
use crate::domain::ports::Strategy;
use crate::domain::proposal::TradeProposal;

pub struct StrategyRegistry {
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new(strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    /// Runs every registered strategy against one symbol's market context.
    /// A strategy erroring out is logged and skipped — one bad strategy
    /// must not block proposals from the rest.
    pub async fn propose_for_symbol(
        &self,
        symbol: &str,
        quote: &Quote,
        candles: &[Candle],
        portfolio: &PortfolioState,
    ) -> Vec<TradeProposal> {
        let mut proposals = Vec::new();
        for strategy in &self.strategies {
            match strategy.propose(symbol, quote, candles, portfolio).await {
                Ok(Some(proposal)) => proposals.push(proposal),
                Ok(None) => debug!(strategy = strategy.name(), symbol, "no proposal"),
                Err(err) => warn!(strategy = strategy.name(), symbol, error = %err, "strategy errored, skipping"),
            }
        }
        proposals
    }

    /// Collapses proposals for the same symbol down to the single
    /// highest-confidence one — two strategies disagreeing on direction for
    /// the same symbol in the same cycle should not both fire.
    pub fn dedupe_by_symbol(proposals: Vec<TradeProposal>) -> Vec<TradeProposal> {
        let mut best: HashMap<String, TradeProposal> = HashMap::new();
        for proposal in proposals {
            match best.get(&proposal.symbol) {
                Some(existing) if existing.confidence >= proposal.confidence => {}
                _ => {
                    best.insert(proposal.symbol.clone(), proposal);
                }
            }
        }
        best.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderSide;
    use crate::domain::proposal::{SizeHint, Tier};
    use rust_decimal_macros::dec;

    fn proposal(symbol: &str, confidence: rust_decimal::Decimal) -> TradeProposal {
        let mut p = TradeProposal::new(symbol, OrderSide::Buy, SizeHint::NotionalUsd(dec!(100)), Tier::T1, "test");
        p.confidence = confidence;
        p
    }

    #[test]
    fn dedupe_keeps_highest_confidence_per_symbol() {
        let proposals = vec![proposal("BTC-USD", dec!(0.4)), proposal("BTC-USD", dec!(0.9)), proposal("ETH-USD", dec!(0.5))];
        let deduped = StrategyRegistry::dedupe_by_symbol(proposals);
        assert_eq!(deduped.len(), 2);
        let btc = deduped.iter().find(|p| p.symbol == "BTC-USD").unwrap();
        assert_eq!(btc.confidence, dec!(0.9));
    }
}
