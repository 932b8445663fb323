//! Wire DTOs for the Coinbase Advanced Trade REST API (`/api/v3/brokerage/*`).
//! Deliberately permissive: unknown fields are ignored rather than rejected,
//! since Coinbase has a history of adding response fields without notice.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

fn decimal_from_str<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Decimal::from_str(&raw).map_err(serde::de::Error::custom)
}

fn option_decimal_from_str<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        Some(s) if !s.is_empty() => Decimal::from_str(&s).map(Some).map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
pub struct BestBidAskResponse {
    pub pricebooks: Vec<Pricebook>,
}

#[derive(Debug, Deserialize)]
pub struct Pricebook {
    pub product_id: String,
    pub bids: Vec<PriceLevelDto>,
    pub asks: Vec<PriceLevelDto>,
}

#[derive(Debug, Deserialize)]
pub struct PriceLevelDto {
    #[serde(deserialize_with = "decimal_from_str")]
    pub price: Decimal,
    #[serde(deserialize_with = "decimal_from_str")]
    pub size: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct ProductResponse {
    pub product_id: String,
    #[serde(deserialize_with = "decimal_from_str")]
    pub price: Decimal,
    #[serde(default, deserialize_with = "option_decimal_from_str")]
    pub price_percentage_change_24h: Option<Decimal>,
    #[serde(deserialize_with = "decimal_from_str")]
    pub volume_24h: Decimal,
    #[serde(deserialize_with = "decimal_from_str")]
    pub base_increment: Decimal,
    #[serde(deserialize_with = "decimal_from_str")]
    pub quote_increment: Decimal,
    #[serde(default, deserialize_with = "option_decimal_from_str")]
    pub quote_min_size: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct ProductBookResponse {
    pub pricebook: Pricebook,
}

#[derive(Debug, Deserialize)]
pub struct ListProductsResponse {
    pub products: Vec<ProductResponse>,
}

#[derive(Debug, Deserialize)]
pub struct CandleDto {
    pub start: String,
    #[serde(deserialize_with = "decimal_from_str")]
    pub low: Decimal,
    #[serde(deserialize_with = "decimal_from_str")]
    pub high: Decimal,
    #[serde(deserialize_with = "decimal_from_str")]
    pub open: Decimal,
    #[serde(deserialize_with = "decimal_from_str")]
    pub close: Decimal,
    #[serde(deserialize_with = "decimal_from_str")]
    pub volume: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct CandlesResponse {
    pub candles: Vec<CandleDto>,
}

#[derive(Debug, Deserialize)]
pub struct AccountDto {
    pub currency: String,
    pub available_balance: BalanceDto,
    pub hold: BalanceDto,
}

#[derive(Debug, Deserialize)]
pub struct BalanceDto {
    #[serde(deserialize_with = "decimal_from_str")]
    pub value: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct ListAccountsResponse {
    pub accounts: Vec<AccountDto>,
    #[serde(default)]
    pub has_next: bool,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "order_type")]
pub struct MarketIocConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_size: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LimitGtcConfig {
    pub base_size: String,
    pub limit_price: String,
    pub post_only: bool,
}

#[derive(Debug, Serialize)]
pub struct OrderConfigurationDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_market_ioc: Option<MarketIocConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_limit_gtc: Option<LimitGtcConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_limit_ioc: Option<LimitGtcConfig>,
}

#[derive(Debug, Serialize)]
pub struct CreateOrderRequest {
    pub client_order_id: String,
    pub product_id: String,
    pub side: String,
    pub order_configuration: OrderConfigurationDto,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderResponse {
    pub success: bool,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub error_response: Option<OrderErrorResponse>,
}

#[derive(Debug, Deserialize)]
pub struct OrderErrorResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrderDto {
    pub order_id: String,
    pub client_order_id: String,
    pub status: String,
    #[serde(default, deserialize_with = "option_decimal_from_str")]
    pub filled_size: Option<Decimal>,
    #[serde(default, deserialize_with = "option_decimal_from_str")]
    pub average_filled_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct GetOrderResponse {
    pub order: OrderDto,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersResponse {
    pub orders: Vec<OrderDto>,
}

#[derive(Debug, Deserialize)]
pub struct FillDto {
    pub order_id: String,
    pub product_id: String,
    #[serde(deserialize_with = "decimal_from_str")]
    pub price: Decimal,
    #[serde(deserialize_with = "decimal_from_str")]
    pub size: Decimal,
    #[serde(deserialize_with = "decimal_from_str")]
    pub commission: Decimal,
    pub liquidity_indicator: String,
    pub size_in_quote: bool,
    pub trade_time: String,
}

#[derive(Debug, Deserialize)]
pub struct ListFillsResponse {
    pub fills: Vec<FillDto>,
}

#[derive(Debug, Serialize)]
pub struct CreateConvertQuoteRequest {
    pub from_account: String,
    pub to_account: String,
    pub amount: String,
}

#[derive(Debug, Deserialize)]
pub struct ConvertQuoteDto {
    pub id: String,
    pub user_entered_amount: AmountDto,
    pub amount: AmountDto,
}

#[derive(Debug, Deserialize)]
pub struct AmountDto {
    #[serde(deserialize_with = "decimal_from_str")]
    pub value: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct CreateConvertQuoteResponse {
    pub trade: ConvertQuoteDto,
}
