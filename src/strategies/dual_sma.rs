//! Dual simple-moving-average crossover, ported from the teacher's
//! `DualSMAStrategy`. A reference plug-in: buys on a golden cross, sells on
//! a death cross only if the portfolio already holds the symbol.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::domain::market::{Candle, Quote};
use crate::domain::order::OrderSide;
use crate::domain::portfolio::PortfolioState;
use crate::domain::ports::{PortResult, Strategy};
use crate::domain::proposal::{SizeHint, Tier, TradeProposal};

pub struct DualSmaStrategy {
    pub fast_period: usize,
    pub slow_period: usize,
    pub threshold: f64,
    pub trade_notional_usd: Decimal,
}

impl DualSmaStrategy {
    pub fn new(fast_period: usize, slow_period: usize, threshold: f64, trade_notional_usd: Decimal) -> Self {
        Self { fast_period, slow_period, threshold, trade_notional_usd }
    }

    fn sma(candles: &[Candle], period: usize) -> Option<f64> {
        if candles.len() < period {
            return None;
        }
        let window = &candles[candles.len() - period..];
        let sum: f64 = window.iter().filter_map(|c| c.close.to_f64()).sum();
        Some(sum / period as f64)
    }
}

#[async_trait]
impl Strategy for DualSmaStrategy {
    fn name(&self) -> &str {
        "dual_sma"
    }

    async fn propose(
        &self,
        symbol: &str,
        _quote: &Quote,
        candles: &[Candle],
        portfolio: &PortfolioState,
    ) -> PortResult<Option<TradeProposal>> {
        let (Some(fast), Some(slow)) = (Self::sma(candles, self.fast_period), Self::sma(candles, self.slow_period))
        else {
            return Ok(None);
        };

        let has_position = portfolio.open_positions.contains_key(symbol);

        if fast > slow * (1.0 + self.threshold) {
            debug!(symbol, fast, slow, "golden cross detected");
            return Ok(Some(TradeProposal::new(
                symbol,
                OrderSide::Buy,
                SizeHint::NotionalUsd(self.trade_notional_usd),
                Tier::T1,
                "dual_sma_golden_cross",
            )));
        }

        if fast < slow * (1.0 - self.threshold) && has_position {
            debug!(symbol, fast, slow, "death cross detected");
            let position = &portfolio.open_positions[symbol];
            return Ok(Some(TradeProposal::new(
                symbol,
                OrderSide::Sell,
                SizeHint::NotionalUsd(position.current_usd),
                Tier::T1,
                "dual_sma_death_cross",
            )));
        }

        Ok(None)
    }
}
