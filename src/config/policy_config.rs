use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskSection {
    pub max_total_at_risk_pct: Decimal,
    pub per_symbol_cap_pct: Decimal,
    pub daily_loss_pct: Decimal,
    pub weekly_loss_pct: Decimal,
    pub max_drawdown_pct: Decimal,
    pub min_trade_notional_usd: Decimal,
    #[serde(default)]
    pub cash_equivalents: Vec<String>,
    #[serde(default = "default_true")]
    pub per_symbol_cooldown_enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TakerMaxSlippageBps {
    #[serde(rename = "T1")]
    pub t1: Decimal,
    pub default: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionSection {
    #[serde(default = "default_order_type")]
    pub default_order_type: String,
    pub maker_fee_bps: Decimal,
    pub taker_fee_bps: Decimal,
    pub maker_max_reprices: u32,
    pub maker_max_ttl_sec: u64,
    pub maker_first_min_ttl_sec: u64,
    pub cancel_after_seconds: u64,
    pub post_only_ttl_seconds: u64,
    pub small_order_market_threshold_usd: Decimal,
    #[serde(default = "default_true")]
    pub taker_fallback: bool,
    pub taker_max_slippage_bps: TakerMaxSlippageBps,
    pub failed_order_cooldown_seconds: u64,
    pub post_trade_reconcile_wait_seconds: u64,
    #[serde(default)]
    pub preferred_quote_currencies: Vec<String>,
    #[serde(default)]
    pub clamp_small_trades: bool,
}

fn default_order_type() -> String {
    "limit_post_only".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MicrostructureSection {
    pub max_expected_slippage_bps: Decimal,
    pub max_quote_age_seconds: i64,
    pub max_spread_bps: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakersSection {
    pub max_quote_age_seconds: i64,
    pub max_consecutive_api_errors: u32,
    pub rate_limit_cooldown_cycles: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GovernanceSection {
    #[serde(default)]
    pub live_trading_enabled: bool,
    pub kill_switch_file: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PurgeExecutionSection {
    pub slice_usd: Decimal,
    pub replace_seconds: u64,
    pub max_duration_seconds: u64,
    pub poll_interval_seconds: u64,
    pub max_slices: u32,
    pub max_residual_usd: Decimal,
    pub max_consecutive_no_fill: u32,
    #[serde(default)]
    pub allow_taker_fallback: bool,
    pub taker_fallback_threshold_usd: Decimal,
    pub taker_max_slippage_bps: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortfolioManagementSection {
    #[serde(default)]
    pub auto_trim_to_risk_cap: bool,
    pub trim_target_buffer_pct: Decimal,
    pub trim_tolerance_pct: Decimal,
    pub trim_min_value_usd: Decimal,
    pub trim_max_liquidations: u32,
    #[serde(default)]
    pub trim_preferred_quotes: Vec<String>,
    pub trim_slippage_buffer_pct: Decimal,
    #[serde(default)]
    pub auto_liquidate_ineligible: bool,
    pub min_liquidation_value_usd: Decimal,
    pub max_liquidations_per_cycle: u32,
    #[serde(default)]
    pub auto_rebalance_worst_performer: bool,
    pub purge_execution: PurgeExecutionSection,
    pub max_trim_failures_before_alert: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TwapSection {
    pub replace_seconds: u64,
    pub max_consecutive_no_fill: u32,
}

/// Deserialized shape of `policy.yaml` (spec §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    pub risk: RiskSection,
    pub execution: ExecutionSection,
    pub microstructure: MicrostructureSection,
    pub circuit_breakers: CircuitBreakersSection,
    pub governance: GovernanceSection,
    pub portfolio_management: PortfolioManagementSection,
    pub twap: TwapSection,
}

/// Free-form strategy/universe config (spec §6: "treated as opaque by the
/// core"). Held as a parsed YAML value so strategy plug-ins can read their
/// own sections without the core needing to know the schema.
#[derive(Debug, Clone, Deserialize)]
pub struct OpaqueConfig {
    #[serde(flatten)]
    pub raw: HashMap<String, serde_yaml::Value>,
}
