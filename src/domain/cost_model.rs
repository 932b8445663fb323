//! Centralized fee and slippage calculations, shared by sizing and PnL
//! attribution so there is one source of truth for trading costs.
//!
//! Ported from the 247trader-v2 `core/cost_model.py` tier-based spread
//! model. The Python original keeps a process-global singleton
//! (`get_cost_model()`); here `CostModel` is a plain value threaded through
//! the `TradingContext` instead — see SPEC_FULL.md's no-singletons decision.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::domain::proposal::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Market,
    LimitPostOnly,
    LimitAggressive,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TradeCost {
    pub fee_usd: Decimal,
    pub fee_pct: Decimal,
    pub slippage_usd: Decimal,
    pub slippage_bps: Decimal,
    pub total_cost_usd: Decimal,
    pub total_cost_pct: Decimal,
    pub is_maker: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    pub maker_fee_pct: Decimal,
    pub taker_fee_pct: Decimal,

    pub tier1_spread_bps: Decimal,
    pub tier2_spread_bps: Decimal,
    pub tier3_spread_bps: Decimal,

    pub market_order_slippage_multiplier: Decimal,
    pub aggressive_limit_slippage_multiplier: Decimal,
    pub post_only_slippage_multiplier: Decimal,

    pub post_only_fill_rate: Decimal,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            maker_fee_pct: dec!(0.004),
            taker_fee_pct: dec!(0.006),
            tier1_spread_bps: dec!(10.0),
            tier2_spread_bps: dec!(20.0),
            tier3_spread_bps: dec!(40.0),
            market_order_slippage_multiplier: dec!(0.5),
            aggressive_limit_slippage_multiplier: dec!(0.25),
            post_only_slippage_multiplier: dec!(0.1),
            post_only_fill_rate: dec!(0.85),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CostModel {
    pub config: CostConfig,
}

impl CostModel {
    pub fn new(config: CostConfig) -> Self {
        Self { config }
    }

    fn tier_spread_bps(&self, tier: Tier) -> Decimal {
        match tier {
            Tier::T1 => self.config.tier1_spread_bps,
            Tier::T2 => self.config.tier2_spread_bps,
            Tier::T3 => self.config.tier3_spread_bps,
        }
    }

    pub fn calculate_trade_cost(
        &self,
        size_usd: Decimal,
        is_maker: bool,
        tier: Tier,
        spread_bps: Option<Decimal>,
        order_type: OrderKind,
    ) -> TradeCost {
        let fee_pct = if is_maker {
            self.config.maker_fee_pct
        } else {
            self.config.taker_fee_pct
        };
        let fee_usd = size_usd * fee_pct;

        let spread_bps = spread_bps.unwrap_or_else(|| self.tier_spread_bps(tier));

        let slippage_bps = match order_type {
            OrderKind::Market => spread_bps * self.config.market_order_slippage_multiplier,
            OrderKind::LimitAggressive => spread_bps * self.config.aggressive_limit_slippage_multiplier,
            OrderKind::LimitPostOnly => spread_bps * self.config.post_only_slippage_multiplier,
        };

        let slippage_usd = size_usd * (slippage_bps / Decimal::from(10_000));

        let total_cost_usd = fee_usd + slippage_usd;
        let total_cost_pct = if size_usd > Decimal::ZERO {
            total_cost_usd / size_usd
        } else {
            Decimal::ZERO
        };

        TradeCost {
            fee_usd,
            fee_pct,
            slippage_usd,
            slippage_bps,
            total_cost_usd,
            total_cost_pct,
            is_maker,
        }
    }

    /// Minimum price move (as a fraction, e.g. `0.012` = 1.2%) needed to
    /// break even after costs. Round trip doubles entry + exit costs.
    pub fn calculate_min_profitable_move(
        &self,
        is_maker: bool,
        tier: Tier,
        spread_bps: Option<Decimal>,
        round_trip: bool,
    ) -> Decimal {
        let cost = self.calculate_trade_cost(
            dec!(1000),
            is_maker,
            tier,
            spread_bps,
            OrderKind::LimitPostOnly,
        );
        let multiplier = if round_trip { dec!(2) } else { dec!(1) };
        cost.total_cost_pct * multiplier
    }

    /// Round a target size up so the post-fee amount still clears
    /// `ensure_post_fee_minimum` (used when sizing would otherwise fall
    /// below an exchange minimum after fees are deducted).
    pub fn adjust_size_for_fees(
        &self,
        target_size_usd: Decimal,
        is_maker: bool,
        ensure_post_fee_minimum: Decimal,
    ) -> Decimal {
        let fee_pct = if is_maker {
            self.config.maker_fee_pct
        } else {
            self.config.taker_fee_pct
        };
        let post_fee_amount = target_size_usd * (Decimal::ONE - fee_pct);
        if post_fee_amount >= ensure_post_fee_minimum {
            return target_size_usd;
        }
        ensure_post_fee_minimum / (Decimal::ONE - fee_pct)
    }

    pub fn estimate_fill_probability(&self, order_type: OrderKind, tier: Tier) -> Decimal {
        match order_type {
            OrderKind::Market => dec!(0.98),
            OrderKind::LimitAggressive => match tier {
                Tier::T1 => dec!(0.95),
                Tier::T2 => dec!(0.90),
                Tier::T3 => dec!(0.80),
            },
            OrderKind::LimitPostOnly => match tier {
                Tier::T1 => self.config.post_only_fill_rate,
                Tier::T2 => dec!(0.75),
                Tier::T3 => dec!(0.60),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maker_fee_cheaper_than_taker() {
        let model = CostModel::new(CostConfig::default());
        let maker = model.calculate_trade_cost(dec!(1000), true, Tier::T2, None, OrderKind::LimitPostOnly);
        let taker = model.calculate_trade_cost(dec!(1000), false, Tier::T2, None, OrderKind::Market);
        assert!(maker.total_cost_usd < taker.total_cost_usd);
    }

    #[test]
    fn round_trip_doubles_single_leg_cost() {
        let model = CostModel::new(CostConfig::default());
        let single = model.calculate_min_profitable_move(true, Tier::T2, None, false);
        let round_trip = model.calculate_min_profitable_move(true, Tier::T2, None, true);
        assert_eq!(round_trip, single * dec!(2));
    }

    #[test]
    fn adjust_size_for_fees_only_rounds_up_when_needed() {
        let model = CostModel::new(CostConfig::default());
        let unaffected = model.adjust_size_for_fees(dec!(1000), true, dec!(5));
        assert_eq!(unaffected, dec!(1000));

        let adjusted = model.adjust_size_for_fees(dec!(10), false, dec!(10));
        assert!(adjusted > dec!(10));
    }

    #[test]
    fn tier1_has_tighter_default_spread_than_tier3() {
        let model = CostModel::new(CostConfig::default());
        let t1 = model.calculate_trade_cost(dec!(1000), false, Tier::T1, None, OrderKind::Market);
        let t3 = model.calculate_trade_cost(dec!(1000), false, Tier::T3, None, OrderKind::Market);
        assert!(t1.slippage_usd < t3.slippage_usd);
    }
}
