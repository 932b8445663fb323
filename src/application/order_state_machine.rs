//! In-memory order registry keyed by `client_order_id`, with transition
//! validation and fill-driven auto-transitions (spec §4.3).
//!
//! Ported from `core/order_state.py`'s `OrderStateMachine`. The Python
//! original exposes this as a module-level singleton (`get_order_state_machine`);
//! here it is a plain struct owned by `TradingContext` (SPEC_FULL.md's
//! no-global-mutable-state decision).

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::domain::order::{
    aggregate_fills, allows_late_fill_override, ExecutionRoute, Fill, Order, OrderSide, OrderStatus,
};

/// Fill percentage at or above which an order is considered fully filled,
/// matching `core/order_state.py`'s `fill_pct >= 99.9`.
const FILL_COMPLETE_THRESHOLD_PCT: Decimal = Decimal::from_parts(999, 0, 0, false, 1);

#[derive(Debug, Clone)]
pub struct OrderSummary {
    pub total_orders: usize,
    pub active_orders: usize,
    pub terminal_orders: usize,
    pub status_breakdown: HashMap<OrderStatus, usize>,
    pub oldest_active_age_seconds: i64,
}

#[derive(Default)]
pub struct OrderStateMachine {
    orders: HashMap<String, Order>,
}

impl OrderStateMachine {
    pub fn new() -> Self {
        Self { orders: HashMap::new() }
    }

    /// Idempotent: returns the existing order if `client_order_id` is already known.
    pub fn create_order(
        &mut self,
        client_order_id: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        size_usd: Decimal,
        size_base: Decimal,
        route: ExecutionRoute,
    ) -> Order {
        let client_order_id = client_order_id.into();
        if let Some(existing) = self.orders.get(&client_order_id) {
            warn!(client_order_id, "order already exists, returning existing");
            return existing.clone();
        }

        let order = Order::new(client_order_id.clone(), symbol, side, size_usd, size_base, route, Utc::now());
        info!(client_order_id = %order.client_order_id, symbol = %order.symbol, side = %order.side, "created order");
        self.orders.insert(client_order_id, order.clone());
        order
    }

    /// Validates against the transition table unless `allow_override` is
    /// set or the documented late-fill rule applies.
    pub fn transition(
        &mut self,
        client_order_id: &str,
        new_status: OrderStatus,
        exchange_order_id: Option<String>,
        error: Option<String>,
        rejection_reason: Option<String>,
        allow_override: bool,
    ) -> bool {
        let Some(order) = self.orders.get_mut(client_order_id) else {
            warn!(client_order_id, "order not found for transition");
            return false;
        };

        let current = order.status;
        let override_allowed = allow_override || allows_late_fill_override(current, new_status);

        if !current.can_transition_to(new_status) {
            if !override_allowed {
                warn!(client_order_id, ?current, ?new_status, "invalid order state transition rejected");
                return false;
            }
            info!(client_order_id, ?current, ?new_status, "overriding order state transition");
        }

        order.status = new_status;
        let now = Utc::now();

        match new_status {
            OrderStatus::Open => {
                order.submitted_at = Some(now);
                if let Some(id) = exchange_order_id {
                    order.exchange_order_id = Some(id);
                }
            }
            OrderStatus::PartialFill => {
                if order.first_fill_at.is_none() {
                    order.first_fill_at = Some(now);
                }
            }
            status if status.is_terminal() => {
                order.completed_at = Some(now);
                if let Some(err) = error {
                    order.error = Some(err);
                }
                if let Some(reason) = rejection_reason {
                    order.rejection_reason = Some(reason);
                }
            }
            _ => {}
        }

        info!(client_order_id, ?current, ?new_status, "order transitioned");
        true
    }

    /// Aggregates fills into the order and auto-transitions to
    /// PARTIAL_FILL/FILLED based on fill percentage thresholds.
    pub fn update_fill(&mut self, client_order_id: &str, fills: Vec<Fill>) -> bool {
        let Some(order) = self.orders.get_mut(client_order_id) else {
            warn!(client_order_id, "order not found for fill update");
            return false;
        };

        let (filled_size, average_price, fees, filled_value) = aggregate_fills(&fills);
        order.filled_size = filled_size;
        order.filled_value = filled_value;
        order.fees = fees;
        order.fills = fills;
        if filled_size > Decimal::ZERO {
            order.average_price = average_price;
        }

        if filled_size <= Decimal::ZERO {
            return true;
        }

        let fill_pct = order.fill_percentage();
        let target_status = if fill_pct >= FILL_COMPLETE_THRESHOLD_PCT {
            Some(OrderStatus::Filled)
        } else if fill_pct > Decimal::ZERO {
            Some(OrderStatus::PartialFill)
        } else {
            None
        };

        if order.first_fill_at.is_none() {
            order.first_fill_at = Some(Utc::now());
        }

        if let Some(target) = target_status {
            if order.status != target {
                self.transition(client_order_id, target, None, None, None, true);
            }
        }

        true
    }

    pub fn get(&self, client_order_id: &str) -> Option<&Order> {
        self.orders.get(client_order_id)
    }

    pub fn active_orders(&self) -> Vec<&Order> {
        self.orders.values().filter(|o| o.status.is_active()).collect()
    }

    pub fn terminal_orders(&self) -> Vec<&Order> {
        self.orders.values().filter(|o| o.status.is_terminal()).collect()
    }

    pub fn orders_by_status(&self, status: OrderStatus) -> Vec<&Order> {
        self.orders.values().filter(|o| o.status == status).collect()
    }

    pub fn stale_orders(&self, max_age_seconds: i64, now: chrono::DateTime<Utc>) -> Vec<&Order> {
        self.orders
            .values()
            .filter(|o| o.status.is_active() && o.age_seconds(now) > max_age_seconds)
            .collect()
    }

    /// Drops the oldest terminal orders beyond `keep_last_n`.
    pub fn cleanup_old_orders(&mut self, keep_last_n: usize) {
        let mut terminal: Vec<String> = self
            .orders
            .values()
            .filter(|o| o.status.is_terminal())
            .map(|o| o.client_order_id.clone())
            .collect();

        terminal.sort_by_key(|id| {
            let order = &self.orders[id];
            order.completed_at.unwrap_or(order.created_at)
        });
        terminal.reverse();

        if terminal.len() > keep_last_n {
            let removed = terminal.split_off(keep_last_n);
            for id in &removed {
                self.orders.remove(id);
            }
            info!(count = removed.len(), "cleaned up old terminal orders");
        }
    }

    pub fn summary(&self, now: chrono::DateTime<Utc>) -> OrderSummary {
        let active: Vec<&Order> = self.active_orders();
        let terminal_count = self.terminal_orders().len();

        let mut status_breakdown = HashMap::new();
        for order in self.orders.values() {
            *status_breakdown.entry(order.status).or_insert(0) += 1;
        }

        let oldest_active_age_seconds = active.iter().map(|o| o.age_seconds(now)).max().unwrap_or(0);

        OrderSummary {
            total_orders: self.orders.len(),
            active_orders: active.len(),
            terminal_orders: terminal_count,
            status_breakdown,
            oldest_active_age_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::Liquidity;
    use rust_decimal_macros::dec;

    fn new_machine_with_order(size_base: Decimal) -> (OrderStateMachine, String) {
        let mut sm = OrderStateMachine::new();
        let order = sm.create_order(
            "client-1",
            "BTC-USD",
            OrderSide::Buy,
            dec!(100),
            size_base,
            ExecutionRoute::MakerPostOnly,
        );
        (sm, order.client_order_id)
    }

    #[test]
    fn create_order_is_idempotent() {
        let (mut sm, id) = new_machine_with_order(dec!(0.002));
        let again = sm.create_order("client-1", "ETH-USD", OrderSide::Sell, dec!(999), dec!(1), ExecutionRoute::TakerMarket);
        assert_eq!(again.symbol, "BTC-USD");
        assert_eq!(sm.get(&id).unwrap().symbol, "BTC-USD");
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let (mut sm, id) = new_machine_with_order(dec!(0.002));
        let ok = sm.transition(&id, OrderStatus::Filled, None, None, None, false);
        assert!(!ok);
        assert_eq!(sm.get(&id).unwrap().status, OrderStatus::New);
    }

    #[test]
    fn late_fill_after_cancel_upgrades_without_override_flag() {
        let (mut sm, id) = new_machine_with_order(dec!(0.002));
        sm.transition(&id, OrderStatus::Open, Some("ex-1".into()), None, None, false);
        sm.transition(&id, OrderStatus::Canceled, None, None, None, false);
        let ok = sm.transition(&id, OrderStatus::Filled, None, None, None, false);
        assert!(ok);
        assert_eq!(sm.get(&id).unwrap().status, OrderStatus::Filled);
    }

    #[test]
    fn update_fill_auto_transitions_to_filled_above_threshold() {
        let (mut sm, id) = new_machine_with_order(dec!(0.002));
        sm.transition(&id, OrderStatus::Open, Some("ex-1".into()), None, None, false);
        let fills = vec![Fill {
            order_id: "ex-1".into(),
            product_id: "BTC-USD".into(),
            price: dec!(50000),
            size: dec!(0.002),
            commission: dec!(0.2),
            liquidity: Liquidity::Maker,
            size_in_quote: false,
            trade_time: Utc::now(),
        }];
        sm.update_fill(&id, fills);
        assert_eq!(sm.get(&id).unwrap().status, OrderStatus::Filled);
    }

    #[test]
    fn update_fill_below_threshold_goes_partial() {
        let (mut sm, id) = new_machine_with_order(dec!(0.002));
        sm.transition(&id, OrderStatus::Open, Some("ex-1".into()), None, None, false);
        let fills = vec![Fill {
            order_id: "ex-1".into(),
            product_id: "BTC-USD".into(),
            price: dec!(50000),
            size: dec!(0.001),
            commission: dec!(0.1),
            liquidity: Liquidity::Maker,
            size_in_quote: false,
            trade_time: Utc::now(),
        }];
        sm.update_fill(&id, fills);
        assert_eq!(sm.get(&id).unwrap().status, OrderStatus::PartialFill);
    }

    #[test]
    fn cleanup_old_orders_keeps_newest_n() {
        let mut sm = OrderStateMachine::new();
        for i in 0..5 {
            let id = format!("client-{i}");
            sm.create_order(id.clone(), "BTC-USD", OrderSide::Buy, dec!(10), dec!(0.001), ExecutionRoute::DryRun);
            sm.transition(&id, OrderStatus::Open, None, None, None, false);
            sm.transition(&id, OrderStatus::Rejected, None, None, Some("test".into()), false);
        }
        sm.cleanup_old_orders(2);
        assert_eq!(sm.summary(Utc::now()).total_orders, 2);
    }
}
