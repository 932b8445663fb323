//! Abstract contracts the core trading cycle depends on. Concrete adapters
//! live in `infrastructure` and `strategies`, wired together in `main.rs`.
//!
//! Per SPEC_FULL.md, strategy formulas, universe-eligibility heuristics, and
//! alert transports are plug-in surfaces — the core never depends on a
//! concrete implementation, only on these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::errors::ErrorKind;
use crate::domain::market::{Candle, CandleInterval, OrderbookSnapshot, ProductMetadata, Quote};
use crate::domain::order::{ExecutionRoute, Fill, Order, OrderSide, OrderStatus};
use crate::domain::portfolio::PortfolioState;
use crate::domain::proposal::TradeProposal;

pub type PortResult<T> = Result<T, ErrorKind>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderConfiguration {
    MarketIoc { quote_size: Option<Decimal>, base_size: Option<Decimal> },
    LimitPostOnly { base_size: Decimal, limit_price: Decimal },
    LimitIoc { base_size: Decimal, limit_price: Decimal },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub client_order_id: String,
    pub product_id: String,
    pub side: OrderSide,
    pub configuration: OrderConfiguration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderResponse {
    pub exchange_order_id: String,
    pub client_order_id: String,
    pub success: bool,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusReport {
    pub exchange_order_id: String,
    pub client_order_id: String,
    pub status: OrderStatus,
    pub filled_size: Decimal,
    pub average_filled_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    pub currency: String,
    pub available: Decimal,
    pub hold: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertQuote {
    pub trade_id: String,
    pub from_currency: String,
    pub to_currency: String,
    pub from_amount: Decimal,
    pub to_amount: Decimal,
}

/// Authenticated REST client for quotes, books, candles, accounts, orders,
/// fills, and convert. Implementations own their own per-endpoint retry and
/// rate-limit policy (spec §4.1).
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_quote(&self, symbol: &str) -> PortResult<Quote>;
    async fn get_orderbook(&self, symbol: &str, levels: u32) -> PortResult<OrderbookSnapshot>;
    async fn get_candles(
        &self,
        symbol: &str,
        interval: CandleInterval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<Vec<Candle>>;
    async fn get_accounts(&self) -> PortResult<Vec<AccountBalance>>;
    async fn list_public_products(&self) -> PortResult<Vec<String>>;
    async fn get_product_metadata(&self, symbol: &str) -> PortResult<ProductMetadata>;

    async fn place_order(&self, request: PlaceOrderRequest) -> PortResult<PlaceOrderResponse>;
    async fn cancel_order(&self, exchange_order_id: &str) -> PortResult<()>;
    async fn cancel_orders(&self, exchange_order_ids: &[String]) -> PortResult<()>;
    async fn get_order_status(&self, exchange_order_id: &str) -> PortResult<OrderStatusReport>;
    async fn list_open_orders(&self, symbol: Option<&str>) -> PortResult<Vec<OrderStatusReport>>;
    async fn list_fills(
        &self,
        order_id: Option<&str>,
        product_id: Option<&str>,
        start_time: Option<DateTime<Utc>>,
    ) -> PortResult<Vec<Fill>>;

    async fn preview_order(&self, request: &PlaceOrderRequest) -> PortResult<Decimal>;
    async fn create_convert_quote(
        &self,
        from_currency: &str,
        to_currency: &str,
        amount: Decimal,
    ) -> PortResult<ConvertQuote>;
    async fn commit_convert(&self, trade_id: &str) -> PortResult<()>;
}

/// Durable snapshot of positions, cash, open orders, pending markers, PnL,
/// high-water-mark, and latency stats (spec §4.8). A single writer (the
/// trading cycle) plus a background flusher serialize under this trait's
/// implementation.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> PortResult<PortfolioState>;
    async fn save(&self, state: &PortfolioState) -> PortResult<()>;
    async fn record_open_order(&self, order: &Order) -> PortResult<()>;
    async fn close_order(&self, client_order_id: &str, status: OrderStatus, details: &str) -> PortResult<()>;
    /// Whether `client_order_id` already has a persisted open-order record —
    /// the idempotent-submission check a retried proposal consults before
    /// `place_order` (spec §4.6).
    async fn has_open_order(&self, client_order_id: &str) -> PortResult<bool>;
    async fn purge_expired_pending(&self, now: DateTime<Utc>) -> PortResult<()>;
    async fn update_latency_stats(&self, endpoint: &str, latency_ms: u64) -> PortResult<()>;
}

/// Produces `TradeProposal`s from a symbol's market context. Strategy
/// formulas are deliberately out of core scope — this is the seam.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;
    async fn propose(
        &self,
        symbol: &str,
        quote: &Quote,
        candles: &[Candle],
        portfolio: &PortfolioState,
    ) -> PortResult<Option<TradeProposal>>;
}

/// Produces the tiered set of tradeable symbols per regime. Universe
/// eligibility heuristics are out of core scope — this is the seam.
#[async_trait]
pub trait UniverseBuilder: Send + Sync {
    async fn build(&self) -> PortResult<HashMap<String, u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub summary: String,
    pub detail: serde_json::Value,
}

/// Typed severity events routed to configured sinks. Transports (Slack,
/// email) are out of core scope — this is the seam; the default sink logs.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: Alert) -> PortResult<()>;
}
