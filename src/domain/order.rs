use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Open,
    PartialFill,
    Filled,
    Canceled,
    Expired,
    Rejected,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Expired
                | OrderStatus::Rejected
                | OrderStatus::Failed
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::Open | OrderStatus::PartialFill)
    }

    /// Valid next states per the transition table in spec §3. Does not
    /// include the documented late-fill override — callers consult
    /// [`allows_late_fill_override`] separately.
    fn valid_next_states(self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::New => &[OrderStatus::Open, OrderStatus::Failed, OrderStatus::Rejected],
            OrderStatus::Open => &[
                OrderStatus::PartialFill,
                OrderStatus::Filled,
                OrderStatus::Canceled,
                OrderStatus::Expired,
                OrderStatus::Rejected,
            ],
            OrderStatus::PartialFill => &[
                OrderStatus::Filled,
                OrderStatus::Canceled,
                OrderStatus::Expired,
            ],
            OrderStatus::Filled
            | OrderStatus::Canceled
            | OrderStatus::Expired
            | OrderStatus::Rejected
            | OrderStatus::Failed => &[],
        }
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        self.valid_next_states().contains(&next)
    }
}

/// The one documented exception to the transition table: a late fill
/// reconciled after cancel/expiry/failure still upgrades the order to
/// FILLED. See spec §3 and SPEC_FULL.md Open Question 3 — this is
/// deliberately NOT symmetric with PARTIAL_FILL.
pub fn allows_late_fill_override(current: OrderStatus, next: OrderStatus) -> bool {
    next == OrderStatus::Filled
        && matches!(
            current,
            OrderStatus::Canceled | OrderStatus::Expired | OrderStatus::Failed
        )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Liquidity {
    Maker,
    Taker,
}

/// A single exchange fill event. `size_in_quote` governs unit interpretation:
/// when true, `size` is quote-currency notional and base units MUST be
/// derived as `size / price`, never used directly (spec §3 critical note).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub product_id: String,
    pub price: Decimal,
    pub size: Decimal,
    pub commission: Decimal,
    pub liquidity: Liquidity,
    pub size_in_quote: bool,
    pub trade_time: DateTime<Utc>,
}

impl Fill {
    /// Returns `(base_size, quote_size)` honoring `size_in_quote`.
    pub fn base_and_quote(&self) -> (Decimal, Decimal) {
        if self.size_in_quote {
            let base = if self.price > Decimal::ZERO {
                self.size / self.price
            } else {
                Decimal::ZERO
            };
            (base, self.size)
        } else {
            (self.size, self.price * self.size)
        }
    }
}

/// Aggregate a list of fills into `(total_base, avg_price, total_fees, total_quote)`.
///
/// Each fill reports a single `size` plus `size_in_quote`; `Fill::base_and_quote`
/// derives whichever side wasn't reported directly, so there's no base/quote
/// disagreement to reconcile here.
pub fn aggregate_fills(fills: &[Fill]) -> (Decimal, Decimal, Decimal, Decimal) {
    let mut total_base = Decimal::ZERO;
    let mut total_quote = Decimal::ZERO;
    let mut total_fees = Decimal::ZERO;

    for fill in fills {
        let (base, quote) = fill.base_and_quote();
        total_base += base;
        total_quote += quote;
        total_fees += fill.commission;
    }

    let avg_price = if total_base > Decimal::ZERO {
        total_quote / total_base
    } else {
        Decimal::ZERO
    };

    (total_base, avg_price, total_fees, total_quote)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionRoute {
    MakerPostOnly,
    TakerIoc,
    TakerMarket,
    DryRun,
    PaperSimulated,
}

impl fmt::Display for ExecutionRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionRoute::MakerPostOnly => "maker_post_only",
            ExecutionRoute::TakerIoc => "taker_ioc",
            ExecutionRoute::TakerMarket => "taker_market",
            ExecutionRoute::DryRun => "dry_run",
            ExecutionRoute::PaperSimulated => "paper_simulated",
        };
        write!(f, "{s}")
    }
}

/// In-memory order lifecycle record keyed by `client_order_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub size_usd: Decimal,
    pub size_base: Decimal,
    pub status: OrderStatus,

    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub first_fill_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub filled_size: Decimal,
    pub filled_value: Decimal,
    pub fees: Decimal,
    pub average_price: Decimal,
    pub fills: Vec<Fill>,

    pub route: ExecutionRoute,
    pub error: Option<String>,
    pub rejection_reason: Option<String>,
}

impl Order {
    pub fn new(
        client_order_id: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        size_usd: Decimal,
        size_base: Decimal,
        route: ExecutionRoute,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            exchange_order_id: None,
            symbol: symbol.into(),
            side,
            size_usd,
            size_base,
            status: OrderStatus::New,
            created_at: now,
            submitted_at: None,
            first_fill_at: None,
            completed_at: None,
            filled_size: Decimal::ZERO,
            filled_value: Decimal::ZERO,
            fees: Decimal::ZERO,
            average_price: Decimal::ZERO,
            fills: Vec::new(),
            route,
            error: None,
            rejection_reason: None,
        }
    }

    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }

    /// Fill percentage against whichever of size_base/size_usd is nonzero.
    pub fn fill_percentage(&self) -> Decimal {
        if self.size_base > Decimal::ZERO {
            (self.filled_size / self.size_base) * Decimal::from(100)
        } else if self.size_usd > Decimal::ZERO {
            (self.filled_value / self.size_usd) * Decimal::from(100)
        } else {
            Decimal::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn transition_table_matches_spec() {
        assert!(OrderStatus::New.can_transition_to(OrderStatus::Open));
        assert!(OrderStatus::New.can_transition_to(OrderStatus::Rejected));
        assert!(!OrderStatus::New.can_transition_to(OrderStatus::Filled));

        assert!(OrderStatus::Open.can_transition_to(OrderStatus::PartialFill));
        assert!(OrderStatus::Open.can_transition_to(OrderStatus::Canceled));
        assert!(!OrderStatus::Open.can_transition_to(OrderStatus::New));

        assert!(OrderStatus::PartialFill.can_transition_to(OrderStatus::Filled));
        assert!(!OrderStatus::PartialFill.can_transition_to(OrderStatus::Rejected));

        for terminal in [
            OrderStatus::Filled,
            OrderStatus::Canceled,
            OrderStatus::Expired,
            OrderStatus::Rejected,
            OrderStatus::Failed,
        ] {
            assert!(terminal.valid_next_states().is_empty());
        }
    }

    #[test]
    fn late_fill_override_is_narrow() {
        assert!(allows_late_fill_override(OrderStatus::Canceled, OrderStatus::Filled));
        assert!(allows_late_fill_override(OrderStatus::Expired, OrderStatus::Filled));
        assert!(allows_late_fill_override(OrderStatus::Failed, OrderStatus::Filled));
        // Symmetric widening to PARTIAL_FILL is explicitly not granted (Open Question 3).
        assert!(!allows_late_fill_override(OrderStatus::Canceled, OrderStatus::PartialFill));
        assert!(!allows_late_fill_override(OrderStatus::Rejected, OrderStatus::Filled));
    }

    #[test]
    fn fill_with_size_in_quote_derives_base_from_price() {
        let fill = Fill {
            order_id: "o1".into(),
            product_id: "ETH-USD".into(),
            price: dec!(2975.32),
            size: dec!(2.6399716828),
            commission: dec!(0.0316796601936),
            liquidity: Liquidity::Taker,
            size_in_quote: true,
            trade_time: Utc::now(),
        };
        let (base, quote) = fill.base_and_quote();
        assert_eq!(quote, dec!(2.6399716828));
        // base ~= 0.000887
        assert!((base - dec!(0.000887)).abs() < dec!(0.00001));
    }

    #[test]
    fn aggregate_fills_mixes_quote_and_base_denominated_fills() {
        let fills = vec![
            Fill {
                order_id: "o1".into(),
                product_id: "BTC-USD".into(),
                price: dec!(50000),
                size: dec!(0.01),
                commission: dec!(0.2),
                liquidity: Liquidity::Maker,
                size_in_quote: false,
                trade_time: Utc::now(),
            },
            Fill {
                order_id: "o1".into(),
                product_id: "BTC-USD".into(),
                price: dec!(50010),
                size: dec!(500.1),
                commission: dec!(0.3),
                liquidity: Liquidity::Taker,
                size_in_quote: true,
                trade_time: Utc::now(),
            },
        ];
        let (total_base, avg_price, total_fees, total_quote) = aggregate_fills(&fills);
        assert!(total_base > Decimal::ZERO);
        assert!(avg_price > Decimal::ZERO);
        assert_eq!(total_fees, dec!(0.5));
        assert_eq!(total_quote, dec!(500) + dec!(500.1));
    }
}
