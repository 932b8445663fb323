//! Z-score mean reversion, ported from the teacher's
//! `ZScoreMeanReversionStrategy`. Buys when price sits significantly below
//! its recent mean, sells once it has reverted — a reference plug-in, not
//! tuned for any particular regime.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::{Data, Distribution};
use tracing::debug;

use crate::domain::market::{Candle, Quote};
use crate::domain::order::OrderSide;
use crate::domain::portfolio::PortfolioState;
use crate::domain::ports::{PortResult, Strategy};
use crate::domain::proposal::{SizeHint, Tier, TradeProposal};

pub struct ZScoreMeanReversionStrategy {
    pub lookback_period: usize,
    pub entry_threshold: Decimal,
    pub exit_threshold: Decimal,
    pub min_data_points: usize,
    pub trade_notional_usd: Decimal,
}

impl ZScoreMeanReversionStrategy {
    pub fn new(lookback_period: usize, entry_threshold: Decimal, exit_threshold: Decimal, trade_notional_usd: Decimal) -> Self {
        Self {
            lookback_period,
            entry_threshold,
            exit_threshold,
            min_data_points: lookback_period.max(20),
            trade_notional_usd,
        }
    }

    fn zscore(&self, candles: &[Candle], current_price: Decimal) -> Option<Decimal> {
        if candles.len() < self.min_data_points {
            return None;
        }
        let prices: Vec<f64> = candles
            .iter()
            .rev()
            .take(self.lookback_period)
            .filter_map(|c| c.close.to_f64())
            .collect();
        if prices.len() < self.lookback_period {
            return None;
        }

        let data = Data::new(prices);
        let mean = data.mean()?;
        let std_dev = data.std_dev()?;
        if std_dev == 0.0 {
            return None;
        }

        let mean_d = Decimal::from_f64_retain(mean).unwrap_or(Decimal::ZERO);
        let std_d = Decimal::from_f64_retain(std_dev).unwrap_or(Decimal::ONE);
        Some((current_price - mean_d) / std_d)
    }
}

#[async_trait]
impl Strategy for ZScoreMeanReversionStrategy {
    fn name(&self) -> &str {
        "zscore_mean_reversion"
    }

    async fn propose(
        &self,
        symbol: &str,
        quote: &Quote,
        candles: &[Candle],
        portfolio: &PortfolioState,
    ) -> PortResult<Option<TradeProposal>> {
        let Some(zscore) = self.zscore(candles, quote.mid) else {
            return Ok(None);
        };
        let has_position = portfolio.open_positions.contains_key(symbol);

        if !has_position && zscore < self.entry_threshold {
            let excess = (zscore.abs() - self.entry_threshold.abs()).to_f64().unwrap_or(0.0);
            let confidence = (0.5 + excess * 0.15).min(0.95);
            debug!(symbol, %zscore, "price below entry threshold, proposing buy");
            let mut proposal = TradeProposal::new(
                symbol,
                OrderSide::Buy,
                SizeHint::NotionalUsd(self.trade_notional_usd),
                Tier::T2,
                "zscore_mean_reversion_entry",
            );
            proposal.confidence = Decimal::from_f64_retain(confidence).unwrap_or(Decimal::ONE);
            return Ok(Some(proposal));
        }

        if has_position && zscore > self.exit_threshold {
            let distance = (zscore - self.exit_threshold).abs().to_f64().unwrap_or(0.0);
            let confidence = (0.5 + distance * 0.10).min(0.90);
            debug!(symbol, %zscore, "price reverted to mean, proposing sell");
            let position = &portfolio.open_positions[symbol];
            let mut proposal = TradeProposal::new(
                symbol,
                OrderSide::Sell,
                SizeHint::NotionalUsd(position.current_usd),
                Tier::T2,
                "zscore_mean_reversion_exit",
            );
            proposal.confidence = Decimal::from_f64_retain(confidence).unwrap_or(Decimal::ONE);
            return Ok(Some(proposal));
        }

        Ok(None)
    }
}
