use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::OrderSide;

/// Liquidity tier, T1 highest, used to pick slippage budgets and spread
/// defaults (spec §4.4, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Tier {
    T1 = 1,
    T2 = 2,
    T3 = 3,
}

impl Tier {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Tier::T1),
            2 => Some(Tier::T2),
            3 => Some(Tier::T3),
            _ => None,
        }
    }
}

/// How a strategy sizes its desired position: either a target portfolio
/// weight or a flat notional.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum SizeHint {
    TargetWeightPct(Decimal),
    NotionalUsd(Decimal),
}

/// A candidate trade produced by a strategy or the position manager,
/// before risk adjustment (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeProposal {
    pub symbol: String,
    pub side: OrderSide,
    pub size: SizeHint,
    pub confidence: Decimal,
    pub conviction: Decimal,
    pub tier: Tier,
    pub stop_loss_pct: Option<Decimal>,
    pub take_profit_pct: Option<Decimal>,
    pub max_hold_hours: Option<Decimal>,
    pub trigger_name: String,
    pub notes: Option<String>,
}

impl TradeProposal {
    pub fn new(
        symbol: impl Into<String>,
        side: OrderSide,
        size: SizeHint,
        tier: Tier,
        trigger_name: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            size,
            confidence: Decimal::ONE,
            conviction: Decimal::ONE,
            tier,
            stop_loss_pct: None,
            take_profit_pct: None,
            max_hold_hours: None,
            trigger_name: trigger_name.into(),
            notes: None,
        }
    }
}
