//! Authenticated REST client for Coinbase Advanced Trade, implementing
//! [`ExchangeClient`]. Structured the way `infrastructure/alpaca/execution.rs`
//! builds its Alpaca client: a `ClientWithMiddleware` from
//! [`HttpClientFactory`], one method per endpoint, DTOs mapped into domain
//! types at the boundary. Every call goes through [`RateLimiter`] first.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::application::rate_limiter::RateLimiter;
use crate::config::credentials::Credentials;
use crate::domain::errors::ErrorKind;
use crate::domain::market::{BookLevel, Candle, CandleInterval, OrderbookSnapshot, ProductMetadata, Quote};
use crate::domain::order::{Fill, Liquidity, OrderStatus};
use crate::domain::ports::{
    AccountBalance, ConvertQuote, ExchangeClient, OrderConfiguration, OrderStatusReport, PlaceOrderRequest,
    PlaceOrderResponse, PortResult,
};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;

use super::auth;
use super::models::*;

const BASE_URL: &str = "https://api.coinbase.com";

fn candle_interval_granularity(interval: CandleInterval) -> &'static str {
    match interval {
        CandleInterval::OneMinute => "ONE_MINUTE",
        CandleInterval::FiveMinute => "FIVE_MINUTE",
        CandleInterval::FifteenMinute => "FIFTEEN_MINUTE",
        CandleInterval::OneHour => "ONE_HOUR",
        CandleInterval::SixHour => "SIX_HOUR",
        CandleInterval::OneDay => "ONE_DAY",
    }
}

fn order_status_from_str(status: &str) -> OrderStatus {
    match status {
        "OPEN" => OrderStatus::Open,
        "FILLED" => OrderStatus::Filled,
        "CANCELLED" => OrderStatus::Canceled,
        "EXPIRED" => OrderStatus::Expired,
        "FAILED" => OrderStatus::Failed,
        "PENDING" => OrderStatus::New,
        _ => OrderStatus::Rejected,
    }
}

pub struct CoinbaseClient {
    http: ClientWithMiddleware,
    credentials: Credentials,
    rate_limiter: Arc<RateLimiter>,
    base_url: String,
}

impl CoinbaseClient {
    pub fn new(credentials: Credentials, rate_limiter: Arc<RateLimiter>) -> Self {
        Self { http: HttpClientFactory::create_client(), credentials, rate_limiter, base_url: BASE_URL.to_string() }
    }

    #[cfg(test)]
    pub fn with_base_url(credentials: Credentials, rate_limiter: Arc<RateLimiter>, base_url: String) -> Self {
        Self { http: HttpClientFactory::create_client(), credentials, rate_limiter, base_url }
    }

    fn map_transport_error(err: reqwest_middleware::Error) -> ErrorKind {
        ErrorKind::TransientNetworkError(err.to_string())
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        is_private: bool,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&str>,
    ) -> PortResult<T> {
        self.rate_limiter.acquire(endpoint, is_private, 1.0).await;

        let mut url = url::Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|err| ErrorKind::ValidationError(format!("invalid url: {err}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        let body_str = body.unwrap_or("");
        let headers = auth::sign_request(&self.credentials, method.as_str(), path, body_str)?;

        let mut builder = self.http.request(method, url);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        builder = builder.header("Content-Type", "application/json");
        if let Some(body) = body {
            builder = builder.body(body.to_string());
        }

        let response = builder.send().await.map_err(Self::map_transport_error)?;
        let status = response.status();

        if status.as_u16() == 429 {
            self.rate_limiter.record_violation(endpoint, is_private);
            return Err(ErrorKind::RateLimitExceeded { endpoint: endpoint.to_string() });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ErrorKind::ClientError { status: status.as_u16(), body });
        }

        let text = response.text().await.map_err(|err| ErrorKind::TransientNetworkError(err.to_string()))?;
        serde_json::from_str(&text)
            .map_err(|err| ErrorKind::ValidationError(format!("failed to decode {endpoint} response: {err}: {text}")))
    }
}

#[async_trait]
impl ExchangeClient for CoinbaseClient {
    async fn get_quote(&self, symbol: &str) -> PortResult<Quote> {
        let path = "/api/v3/brokerage/best_bid_ask";
        let resp: BestBidAskResponse = self
            .request("best_bid_ask", false, reqwest::Method::GET, path, &[("product_ids", symbol.to_string())], None)
            .await?;

        let book = resp
            .pricebooks
            .into_iter()
            .find(|pb| pb.product_id == symbol)
            .ok_or_else(|| ErrorKind::CriticalDataUnavailable { source: format!("quote:{symbol}") })?;

        let bid = book.bids.first().map(|l| l.price).unwrap_or(Decimal::ZERO);
        let ask = book.asks.first().map(|l| l.price).unwrap_or(Decimal::ZERO);

        let product: ProductResponse = self
            .request(
                "get_product",
                false,
                reqwest::Method::GET,
                &format!("/api/v3/brokerage/products/{symbol}"),
                &[],
                None,
            )
            .await?;

        Ok(Quote::new(symbol, bid, ask, product.price, product.volume_24h, Utc::now()))
    }

    async fn get_orderbook(&self, symbol: &str, levels: u32) -> PortResult<OrderbookSnapshot> {
        let resp: ProductBookResponse = self
            .request(
                "product_book",
                false,
                reqwest::Method::GET,
                "/api/v3/brokerage/product_book",
                &[("product_id", symbol.to_string()), ("limit", levels.to_string())],
                None,
            )
            .await?;

        let to_levels = |levels: Vec<PriceLevelDto>| {
            levels.into_iter().map(|l| BookLevel { price: l.price, size: l.size }).collect::<Vec<_>>()
        };

        Ok(OrderbookSnapshot {
            symbol: symbol.to_string(),
            bids: to_levels(resp.pricebook.bids),
            asks: to_levels(resp.pricebook.asks),
            timestamp: Utc::now(),
        })
    }

    async fn get_candles(
        &self,
        symbol: &str,
        interval: CandleInterval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<Vec<Candle>> {
        let path = format!("/api/v3/brokerage/products/{symbol}/candles");
        let resp: CandlesResponse = self
            .request(
                "candles",
                false,
                reqwest::Method::GET,
                &path,
                &[
                    ("start", start.timestamp().to_string()),
                    ("end", end.timestamp().to_string()),
                    ("granularity", candle_interval_granularity(interval).to_string()),
                ],
                None,
            )
            .await?;

        Ok(resp
            .candles
            .into_iter()
            .map(|c| {
                let ts = c
                    .start
                    .parse::<i64>()
                    .ok()
                    .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
                    .unwrap_or(Utc::now());
                Candle {
                    symbol: symbol.to_string(),
                    open: c.open,
                    high: c.high,
                    low: c.low,
                    close: c.close,
                    volume: c.volume,
                    timestamp: ts,
                }
            })
            .collect())
    }

    async fn get_accounts(&self) -> PortResult<Vec<AccountBalance>> {
        let resp: ListAccountsResponse = self
            .request("accounts", true, reqwest::Method::GET, "/api/v3/brokerage/accounts", &[("limit", "250".to_string())], None)
            .await?;

        Ok(resp
            .accounts
            .into_iter()
            .map(|a| AccountBalance { currency: a.currency, available: a.available_balance.value, hold: a.hold.value })
            .collect())
    }

    async fn list_public_products(&self) -> PortResult<Vec<String>> {
        let resp: ListProductsResponse = self
            .request("list_products", false, reqwest::Method::GET, "/api/v3/brokerage/products", &[], None)
            .await?;
        Ok(resp.products.into_iter().map(|p| p.product_id).collect())
    }

    async fn get_product_metadata(&self, symbol: &str) -> PortResult<ProductMetadata> {
        let product: ProductResponse = self
            .request(
                "get_product",
                false,
                reqwest::Method::GET,
                &format!("/api/v3/brokerage/products/{symbol}"),
                &[],
                None,
            )
            .await?;

        Ok(ProductMetadata {
            product_id: product.product_id,
            base_increment: product.base_increment,
            quote_increment: product.quote_increment,
            min_market_funds: product.quote_min_size.unwrap_or(Decimal::ONE),
            tier: 1,
        })
    }

    async fn place_order(&self, request: PlaceOrderRequest) -> PortResult<PlaceOrderResponse> {
        let side = match request.side {
            crate::domain::order::OrderSide::Buy => "BUY",
            crate::domain::order::OrderSide::Sell => "SELL",
        };

        let configuration = match request.configuration {
            OrderConfiguration::MarketIoc { quote_size, base_size } => OrderConfigurationDto {
                market_market_ioc: Some(MarketIocConfig {
                    quote_size: quote_size.map(|d| d.to_string()),
                    base_size: base_size.map(|d| d.to_string()),
                }),
                limit_limit_gtc: None,
                limit_limit_ioc: None,
            },
            OrderConfiguration::LimitPostOnly { base_size, limit_price } => OrderConfigurationDto {
                market_market_ioc: None,
                limit_limit_gtc: Some(LimitGtcConfig { base_size: base_size.to_string(), limit_price: limit_price.to_string(), post_only: true }),
                limit_limit_ioc: None,
            },
            OrderConfiguration::LimitIoc { base_size, limit_price } => OrderConfigurationDto {
                market_market_ioc: None,
                limit_limit_gtc: None,
                limit_limit_ioc: Some(LimitGtcConfig { base_size: base_size.to_string(), limit_price: limit_price.to_string(), post_only: false }),
            },
        };

        let body = CreateOrderRequest {
            client_order_id: request.client_order_id.clone(),
            product_id: request.product_id,
            side: side.to_string(),
            order_configuration: configuration,
        };
        let body_json = serde_json::to_string(&body)
            .map_err(|err| ErrorKind::ValidationError(format!("failed to serialize order: {err}")))?;

        let resp: CreateOrderResponse = self
            .request("create_order", true, reqwest::Method::POST, "/api/v3/brokerage/orders", &[], Some(&body_json))
            .await?;

        if resp.success {
            Ok(PlaceOrderResponse {
                exchange_order_id: resp.order_id.unwrap_or_default(),
                client_order_id: request.client_order_id,
                success: true,
                failure_reason: None,
            })
        } else {
            let reason = resp
                .error_response
                .and_then(|e| e.message.or(e.error))
                .unwrap_or_else(|| "order rejected".to_string());
            warn!(client_order_id = %request.client_order_id, %reason, "order rejected by exchange");
            Ok(PlaceOrderResponse {
                exchange_order_id: String::new(),
                client_order_id: request.client_order_id,
                success: false,
                failure_reason: Some(reason),
            })
        }
    }

    async fn cancel_order(&self, exchange_order_id: &str) -> PortResult<()> {
        self.cancel_orders(std::slice::from_ref(&exchange_order_id.to_string())).await
    }

    async fn cancel_orders(&self, exchange_order_ids: &[String]) -> PortResult<()> {
        #[derive(serde::Serialize)]
        struct CancelBody<'a> {
            order_ids: &'a [String],
        }
        let body_json = serde_json::to_string(&CancelBody { order_ids: exchange_order_ids })
            .map_err(|err| ErrorKind::ValidationError(err.to_string()))?;
        let _: serde_json::Value = self
            .request("cancel_orders", true, reqwest::Method::POST, "/api/v3/brokerage/orders/batch_cancel", &[], Some(&body_json))
            .await?;
        Ok(())
    }

    async fn get_order_status(&self, exchange_order_id: &str) -> PortResult<OrderStatusReport> {
        let resp: GetOrderResponse = self
            .request(
                "get_order",
                true,
                reqwest::Method::GET,
                &format!("/api/v3/brokerage/orders/historical/{exchange_order_id}"),
                &[],
                None,
            )
            .await?;

        Ok(OrderStatusReport {
            exchange_order_id: resp.order.order_id,
            client_order_id: resp.order.client_order_id,
            status: order_status_from_str(&resp.order.status),
            filled_size: resp.order.filled_size.unwrap_or(Decimal::ZERO),
            average_filled_price: resp.order.average_filled_price.unwrap_or(Decimal::ZERO),
        })
    }

    async fn list_open_orders(&self, symbol: Option<&str>) -> PortResult<Vec<OrderStatusReport>> {
        let mut query = vec![("order_status", "OPEN".to_string())];
        if let Some(symbol) = symbol {
            query.push(("product_id", symbol.to_string()));
        }
        let resp: ListOrdersResponse = self
            .request("list_orders", true, reqwest::Method::GET, "/api/v3/brokerage/orders/historical/batch", &query, None)
            .await?;

        Ok(resp
            .orders
            .into_iter()
            .map(|o| OrderStatusReport {
                exchange_order_id: o.order_id,
                client_order_id: o.client_order_id,
                status: order_status_from_str(&o.status),
                filled_size: o.filled_size.unwrap_or(Decimal::ZERO),
                average_filled_price: o.average_filled_price.unwrap_or(Decimal::ZERO),
            })
            .collect())
    }

    async fn list_fills(
        &self,
        order_id: Option<&str>,
        product_id: Option<&str>,
        start_time: Option<DateTime<Utc>>,
    ) -> PortResult<Vec<Fill>> {
        let mut query = Vec::new();
        if let Some(order_id) = order_id {
            query.push(("order_id", order_id.to_string()));
        }
        if let Some(product_id) = product_id {
            query.push(("product_id", product_id.to_string()));
        }
        if let Some(start_time) = start_time {
            query.push(("start_sequence_timestamp", start_time.to_rfc3339()));
        }

        let resp: ListFillsResponse = self
            .request("list_fills", true, reqwest::Method::GET, "/api/v3/brokerage/orders/historical/fills", &query, None)
            .await?;

        Ok(resp
            .fills
            .into_iter()
            .map(|f| Fill {
                order_id: f.order_id,
                product_id: f.product_id,
                price: f.price,
                size: f.size,
                commission: f.commission,
                liquidity: if f.liquidity_indicator == "MAKER" { Liquidity::Maker } else { Liquidity::Taker },
                size_in_quote: f.size_in_quote,
                trade_time: DateTime::from_str(&f.trade_time).unwrap_or_else(|_| Utc::now()),
            })
            .collect())
    }

    async fn preview_order(&self, request: &PlaceOrderRequest) -> PortResult<Decimal> {
        debug!(client_order_id = %request.client_order_id, "preview_order not yet wired to the exchange preview endpoint");
        Ok(Decimal::ZERO)
    }

    async fn create_convert_quote(&self, from_currency: &str, to_currency: &str, amount: Decimal) -> PortResult<ConvertQuote> {
        let body = CreateConvertQuoteRequest {
            from_account: from_currency.to_string(),
            to_account: to_currency.to_string(),
            amount: amount.to_string(),
        };
        let body_json = serde_json::to_string(&body).map_err(|err| ErrorKind::ValidationError(err.to_string()))?;

        let resp: CreateConvertQuoteResponse = self
            .request("convert_quote", true, reqwest::Method::POST, "/api/v3/brokerage/convert/quote", &[], Some(&body_json))
            .await?;

        Ok(ConvertQuote {
            trade_id: resp.trade.id,
            from_currency: from_currency.to_string(),
            to_currency: to_currency.to_string(),
            from_amount: resp.trade.user_entered_amount.value,
            to_amount: resp.trade.amount.value,
        })
    }

    async fn commit_convert(&self, trade_id: &str) -> PortResult<()> {
        let _: serde_json::Value = self
            .request(
                "convert_commit",
                true,
                reqwest::Method::POST,
                &format!("/api/v3/brokerage/convert/trade/{trade_id}"),
                &[],
                Some("{}"),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::credentials::AuthMode;

    fn test_client() -> CoinbaseClient {
        let credentials = Credentials { api_key: "k".to_string(), secret: "deadbeef".to_string(), mode: AuthMode::Hmac };
        CoinbaseClient::new(credentials, Arc::new(RateLimiter::default()))
    }

    #[test]
    fn candle_granularity_maps_every_interval() {
        assert_eq!(candle_interval_granularity(CandleInterval::OneMinute), "ONE_MINUTE");
        assert_eq!(candle_interval_granularity(CandleInterval::OneDay), "ONE_DAY");
    }

    #[test]
    fn order_status_maps_known_strings() {
        assert_eq!(order_status_from_str("OPEN"), OrderStatus::Open);
        assert_eq!(order_status_from_str("FILLED"), OrderStatus::Filled);
        assert_eq!(order_status_from_str("UNKNOWN_FUTURE_STATUS"), OrderStatus::Rejected);
    }

    #[test]
    fn client_constructs_with_default_base_url() {
        let client = test_client();
        assert_eq!(client.base_url, BASE_URL);
    }
}
