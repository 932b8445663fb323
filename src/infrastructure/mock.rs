//! In-memory [`ExchangeClient`] and [`StateStore`] for tests. Ported from
//! `infrastructure/mock.rs`'s mock execution/market-data services, adapted
//! to this crate's exchange port surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::RwLock;

use crate::domain::errors::ErrorKind;
use crate::domain::market::{Candle, CandleInterval, OrderbookSnapshot, ProductMetadata, Quote};
use crate::domain::order::{Fill, Order, OrderSide, OrderStatus};
use crate::domain::portfolio::PortfolioState;
use crate::domain::ports::{
    AccountBalance, ConvertQuote, ExchangeClient, OrderConfiguration, OrderStatusReport, PlaceOrderRequest,
    PlaceOrderResponse, PortResult, StateStore,
};

/// Exchange double with canned quotes/books and an in-memory order book.
/// Placed orders fill immediately at the request's implied price so tests
/// don't need to poll.
pub struct MockExchangeClient {
    quotes: RwLock<HashMap<String, Quote>>,
    books: RwLock<HashMap<String, OrderbookSnapshot>>,
    accounts: RwLock<Vec<AccountBalance>>,
    orders: RwLock<HashMap<String, OrderStatusReport>>,
    fills: RwLock<Vec<Fill>>,
    next_id: AtomicU64,
    pub fail_next_place_order: std::sync::atomic::AtomicBool,
    pub fail_next_get_accounts: std::sync::atomic::AtomicBool,
    /// When false, `place_order` accepts the order but records no fill —
    /// lets tests exercise a maker order that sits open until TTL/cancel.
    pub fill_orders_immediately: std::sync::atomic::AtomicBool,
}

impl MockExchangeClient {
    pub fn new() -> Self {
        Self {
            quotes: RwLock::new(HashMap::new()),
            books: RwLock::new(HashMap::new()),
            accounts: RwLock::new(vec![AccountBalance { currency: "USD".to_string(), available: dec!(10000), hold: Decimal::ZERO }]),
            orders: RwLock::new(HashMap::new()),
            fills: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            fail_next_place_order: std::sync::atomic::AtomicBool::new(false),
            fail_next_get_accounts: std::sync::atomic::AtomicBool::new(false),
            fill_orders_immediately: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub async fn set_quote(&self, quote: Quote) {
        self.quotes.write().await.insert(quote.symbol.clone(), quote);
    }

    pub async fn set_orderbook(&self, book: OrderbookSnapshot) {
        self.books.write().await.insert(book.symbol.clone(), book);
    }

    pub async fn set_accounts(&self, accounts: Vec<AccountBalance>) {
        *self.accounts.write().await = accounts;
    }
}

impl Default for MockExchangeClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeClient for MockExchangeClient {
    async fn get_quote(&self, symbol: &str) -> PortResult<Quote> {
        self.quotes
            .read()
            .await
            .get(symbol)
            .cloned()
            .ok_or_else(|| ErrorKind::CriticalDataUnavailable { source: format!("quote:{symbol}") })
    }

    async fn get_orderbook(&self, symbol: &str, _levels: u32) -> PortResult<OrderbookSnapshot> {
        self.books
            .read()
            .await
            .get(symbol)
            .cloned()
            .ok_or_else(|| ErrorKind::CriticalDataUnavailable { source: format!("orderbook:{symbol}") })
    }

    async fn get_candles(
        &self,
        _symbol: &str,
        _interval: CandleInterval,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> PortResult<Vec<Candle>> {
        Ok(Vec::new())
    }

    async fn get_accounts(&self) -> PortResult<Vec<AccountBalance>> {
        if self.fail_next_get_accounts.swap(false, Ordering::SeqCst) {
            return Err(ErrorKind::CriticalDataUnavailable { source: "accounts".to_string() });
        }
        Ok(self.accounts.read().await.clone())
    }

    async fn list_public_products(&self) -> PortResult<Vec<String>> {
        Ok(self.quotes.read().await.keys().cloned().collect())
    }

    async fn get_product_metadata(&self, symbol: &str) -> PortResult<ProductMetadata> {
        Ok(ProductMetadata {
            product_id: symbol.to_string(),
            base_increment: dec!(0.00000001),
            quote_increment: dec!(0.01),
            min_market_funds: dec!(1),
            tier: 1,
        })
    }

    async fn place_order(&self, request: PlaceOrderRequest) -> PortResult<PlaceOrderResponse> {
        if self.fail_next_place_order.swap(false, Ordering::SeqCst) {
            return Ok(PlaceOrderResponse {
                exchange_order_id: String::new(),
                client_order_id: request.client_order_id,
                success: false,
                failure_reason: Some("simulated_failure".to_string()),
            });
        }

        let exchange_order_id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let (size, price) = match &request.configuration {
            OrderConfiguration::MarketIoc { quote_size, base_size } => {
                let quote = self.quotes.read().await.get(&request.product_id).cloned();
                let price = quote.as_ref().map(|q| q.mid).unwrap_or(dec!(1));
                let size = base_size.unwrap_or_else(|| quote_size.unwrap_or(Decimal::ZERO) / price);
                (size, price)
            }
            OrderConfiguration::LimitPostOnly { base_size, limit_price } => (*base_size, *limit_price),
            OrderConfiguration::LimitIoc { base_size, limit_price } => (*base_size, *limit_price),
        };

        self.orders.write().await.insert(
            exchange_order_id.clone(),
            OrderStatusReport {
                exchange_order_id: exchange_order_id.clone(),
                client_order_id: request.client_order_id.clone(),
                status: OrderStatus::Open,
                filled_size: size,
                average_filled_price: price,
            },
        );
        if self.fill_orders_immediately.load(Ordering::SeqCst) {
            self.fills.write().await.push(Fill {
                order_id: exchange_order_id.clone(),
                product_id: request.product_id,
                price,
                size,
                commission: size * price * dec!(0.006),
                liquidity: crate::domain::order::Liquidity::Taker,
                size_in_quote: false,
                trade_time: Utc::now(),
            });
        }

        Ok(PlaceOrderResponse {
            exchange_order_id,
            client_order_id: request.client_order_id,
            success: true,
            failure_reason: None,
        })
    }

    async fn cancel_order(&self, exchange_order_id: &str) -> PortResult<()> {
        self.orders.write().await.remove(exchange_order_id);
        Ok(())
    }

    async fn cancel_orders(&self, exchange_order_ids: &[String]) -> PortResult<()> {
        let mut orders = self.orders.write().await;
        for id in exchange_order_ids {
            orders.remove(id);
        }
        Ok(())
    }

    async fn get_order_status(&self, exchange_order_id: &str) -> PortResult<OrderStatusReport> {
        self.orders
            .read()
            .await
            .get(exchange_order_id)
            .cloned()
            .ok_or_else(|| ErrorKind::ValidationError(format!("unknown order {exchange_order_id}")))
    }

    async fn list_open_orders(&self, symbol: Option<&str>) -> PortResult<Vec<OrderStatusReport>> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .filter(|o| symbol.is_none_or(|s| o.client_order_id.contains(s)))
            .cloned()
            .collect())
    }

    async fn list_fills(
        &self,
        order_id: Option<&str>,
        product_id: Option<&str>,
        _start_time: Option<DateTime<Utc>>,
    ) -> PortResult<Vec<Fill>> {
        let fills = self.fills.read().await;
        Ok(fills
            .iter()
            .filter(|f| order_id.is_none_or(|id| f.order_id == id))
            .filter(|f| product_id.is_none_or(|p| f.product_id == p))
            .cloned()
            .collect())
    }

    async fn preview_order(&self, _request: &PlaceOrderRequest) -> PortResult<Decimal> {
        Ok(Decimal::ZERO)
    }

    async fn create_convert_quote(&self, from_currency: &str, to_currency: &str, amount: Decimal) -> PortResult<ConvertQuote> {
        Ok(ConvertQuote {
            trade_id: format!("convert-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            from_currency: from_currency.to_string(),
            to_currency: to_currency.to_string(),
            from_amount: amount,
            to_amount: amount,
        })
    }

    async fn commit_convert(&self, _trade_id: &str) -> PortResult<()> {
        Ok(())
    }
}

/// In-memory [`StateStore`] for tests — no filesystem side effects.
pub struct MockStateStore {
    state: RwLock<PortfolioState>,
    open_orders: RwLock<HashMap<String, Order>>,
}

impl MockStateStore {
    pub fn new(initial: PortfolioState) -> Self {
        Self { state: RwLock::new(initial), open_orders: RwLock::new(HashMap::new()) }
    }
}

impl Default for MockStateStore {
    fn default() -> Self {
        Self::new(PortfolioState::empty(Decimal::ZERO))
    }
}

#[async_trait]
impl StateStore for MockStateStore {
    async fn load(&self) -> PortResult<PortfolioState> {
        Ok(self.state.read().await.clone())
    }

    async fn save(&self, state: &PortfolioState) -> PortResult<()> {
        *self.state.write().await = state.clone();
        Ok(())
    }

    async fn record_open_order(&self, order: &Order) -> PortResult<()> {
        self.open_orders.write().await.insert(order.client_order_id.clone(), order.clone());
        Ok(())
    }

    async fn close_order(&self, client_order_id: &str, _status: OrderStatus, _details: &str) -> PortResult<()> {
        self.open_orders.write().await.remove(client_order_id);
        Ok(())
    }

    async fn has_open_order(&self, client_order_id: &str) -> PortResult<bool> {
        Ok(self.open_orders.read().await.contains_key(client_order_id))
    }

    async fn purge_expired_pending(&self, _now: DateTime<Utc>) -> PortResult<()> {
        Ok(())
    }

    async fn update_latency_stats(&self, _endpoint: &str, _latency_ms: u64) -> PortResult<()> {
        Ok(())
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn place_order_records_a_fill_immediately() {
        let exchange = MockExchangeClient::new();
        exchange
            .set_quote(Quote::new("BTC-USD", dec!(49990), dec!(50010), dec!(50000), dec!(10), Utc::now()))
            .await;

        let response = exchange
            .place_order(PlaceOrderRequest {
                client_order_id: "c1".to_string(),
                product_id: "BTC-USD".to_string(),
                side: OrderSide::Buy,
                configuration: OrderConfiguration::MarketIoc { quote_size: Some(dec!(100)), base_size: None },
            })
            .await
            .unwrap();

        assert!(response.success);
        let fills = exchange.list_fills(Some(&response.exchange_order_id), None, None).await.unwrap();
        assert_eq!(fills.len(), 1);
    }

    #[tokio::test]
    async fn place_order_can_be_forced_to_fail() {
        let exchange = MockExchangeClient::new();
        exchange.fail_next_place_order.store(true, Ordering::SeqCst);
        let response = exchange
            .place_order(PlaceOrderRequest {
                client_order_id: "c1".to_string(),
                product_id: "BTC-USD".to_string(),
                side: OrderSide::Buy,
                configuration: OrderConfiguration::LimitPostOnly { base_size: dec!(0.01), limit_price: dec!(100) },
            })
            .await
            .unwrap();
        assert!(!response.success);
    }
}
