use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::order::OrderSide;

/// An open position in one symbol. Created on first filled buy, mutated by
/// subsequent fills, removed when fully exited (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub base_qty: Decimal,
    pub entry_price: Decimal,
    pub entry_value_usd: Decimal,
    pub fees_paid: Decimal,
    pub current_usd: Decimal,
}

impl Position {
    /// Unrealized P&L in USD at the given mark price.
    pub fn unrealized_pnl_usd(&self, mark_price: Decimal) -> Decimal {
        self.base_qty * mark_price - self.entry_value_usd
    }

    pub fn unrealized_pnl_pct(&self, mark_price: Decimal) -> Decimal {
        if self.entry_value_usd > Decimal::ZERO {
            self.unrealized_pnl_usd(mark_price) / self.entry_value_usd * Decimal::from(100)
        } else {
            Decimal::ZERO
        }
    }

    pub fn is_dust(&self, dust_threshold_usd: Decimal) -> bool {
        self.current_usd < dust_threshold_usd
    }
}

/// Per-symbol exit policy attached to an open position when it's first
/// opened, so later exit evaluation doesn't depend on the strategy that
/// created it still being enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedPosition {
    pub stop_loss_pct: Option<Decimal>,
    pub take_profit_pct: Option<Decimal>,
    pub max_hold_hours: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
}

impl ManagedPosition {
    pub fn age_hours(&self, now: DateTime<Utc>) -> Decimal {
        let seconds = (now - self.opened_at).num_seconds();
        Decimal::from(seconds) / Decimal::from(3600)
    }

    pub fn exceeds_max_hold(&self, now: DateTime<Utc>) -> bool {
        match self.max_hold_hours {
            Some(max_hours) => self.age_hours(now) >= max_hours,
            None => false,
        }
    }
}

/// Running snapshot of account and risk-relevant portfolio state, refreshed
/// once per cycle from exchange-reported balances and reconciled fills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioState {
    pub account_value_usd: Decimal,
    pub open_positions: HashMap<String, Position>,
    pub cash_balances: HashMap<String, Decimal>,
    pub pending_orders: HashMap<OrderSide, HashMap<String, Decimal>>,

    pub daily_pnl_pct: Decimal,
    pub weekly_pnl_pct: Decimal,
    pub max_drawdown_pct: Decimal,
    pub trades_today: u32,
    pub trades_this_hour: u32,
    pub consecutive_losses: u32,
    pub last_loss_time: Option<DateTime<Utc>>,
    pub high_water_mark: Decimal,

    pub managed_positions: HashMap<String, ManagedPosition>,
}

impl PortfolioState {
    pub fn empty(account_value_usd: Decimal) -> Self {
        Self {
            account_value_usd,
            open_positions: HashMap::new(),
            cash_balances: HashMap::new(),
            pending_orders: HashMap::new(),
            daily_pnl_pct: Decimal::ZERO,
            weekly_pnl_pct: Decimal::ZERO,
            max_drawdown_pct: Decimal::ZERO,
            trades_today: 0,
            trades_this_hour: 0,
            consecutive_losses: 0,
            last_loss_time: None,
            high_water_mark: account_value_usd,
            managed_positions: HashMap::new(),
        }
    }

    /// Open position count excluding dust below the configured threshold.
    pub fn open_position_count(&self, dust_threshold_usd: Decimal) -> usize {
        self.open_positions
            .values()
            .filter(|p| !p.is_dust(dust_threshold_usd))
            .count()
    }

    pub fn pending_notional_usd(&self, side: OrderSide, symbol: &str) -> Decimal {
        self.pending_orders
            .get(&side)
            .and_then(|by_symbol| by_symbol.get(symbol))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn drawdown_from_high_water_mark_pct(&self) -> Decimal {
        if self.high_water_mark > Decimal::ZERO {
            (self.high_water_mark - self.account_value_usd) / self.high_water_mark * Decimal::from(100)
        } else {
            Decimal::ZERO
        }
    }

    /// Roll `account_value_usd` into the high water mark if it's a new peak.
    pub fn update_high_water_mark(&mut self) {
        if self.account_value_usd > self.high_water_mark {
            self.high_water_mark = self.account_value_usd;
        }
    }
}
