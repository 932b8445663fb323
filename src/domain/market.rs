use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Real-time two-sided quote. Invariant: `ask >= bid >= 0`, `mid = (bid+ask)/2`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub mid: Decimal,
    pub spread_bps: Decimal,
    pub last: Decimal,
    pub volume_24h: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    pub fn new(
        symbol: impl Into<String>,
        bid: Decimal,
        ask: Decimal,
        last: Decimal,
        volume_24h: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mid = (bid + ask) / Decimal::TWO;
        let spread_bps = if mid > Decimal::ZERO {
            (ask - bid) / mid * Decimal::from(10_000)
        } else {
            Decimal::ZERO
        };
        Self {
            symbol: symbol.into(),
            bid,
            ask,
            mid,
            spread_bps,
            last,
            volume_24h,
            timestamp,
        }
    }

    /// Age of this quote relative to `now`, in seconds. Negative means the
    /// quote's timestamp is in the future (clock skew).
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_seconds()
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age_seconds: i64) -> bool {
        let age = self.age_seconds(now);
        age < 0 || age >= max_age_seconds
    }
}

/// One side's depth level in an orderbook.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Aggregate USD depth within +/-20bps of mid, separated by side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderbookSnapshot {
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp: DateTime<Utc>,
}

impl OrderbookSnapshot {
    /// USD depth within `bps` of `mid` on the side a buy would consume (asks)
    /// or a sell would consume (bids).
    pub fn depth_within_bps_usd(&self, mid: Decimal, bps: Decimal, side: crate::domain::order::OrderSide) -> Decimal {
        let threshold = bps / Decimal::from(10_000);
        match side {
            crate::domain::order::OrderSide::Buy => {
                let max_price = mid * (Decimal::ONE + threshold);
                self.asks
                    .iter()
                    .filter(|lvl| lvl.price <= max_price)
                    .fold(Decimal::ZERO, |acc, lvl| acc + lvl.price * lvl.size)
            }
            crate::domain::order::OrderSide::Sell => {
                let min_price = mid * (Decimal::ONE - threshold);
                self.bids
                    .iter()
                    .filter(|lvl| lvl.price >= min_price)
                    .fold(Decimal::ZERO, |acc, lvl| acc + lvl.price * lvl.size)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CandleInterval {
    OneMinute,
    FiveMinute,
    FifteenMinute,
    OneHour,
    SixHour,
    OneDay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Exchange-reported product metadata needed for increment rounding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductMetadata {
    pub product_id: String,
    pub base_increment: Decimal,
    pub quote_increment: Decimal,
    pub min_market_funds: Decimal,
    pub tier: u8,
}
