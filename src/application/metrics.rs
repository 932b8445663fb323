//! Prometheus metrics, all under the `rustrade_` prefix, exposed via the
//! monitoring section of config. Adapted from `infrastructure/observability/metrics.rs`.

use prometheus::{
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub account_value_usd: GenericGauge<AtomicF64>,
    pub positions_count: GenericGauge<AtomicF64>,
    pub position_value_usd: GenericGaugeVec<AtomicF64>,
    pub daily_pnl_pct: GenericGauge<AtomicF64>,
    pub drawdown_pct: GenericGauge<AtomicF64>,
    pub orders_total: CounterVec,
    pub circuit_breaker_status: GaugeVec,
    pub cycle_duration_seconds: HistogramVec,
    pub api_latency_seconds: HistogramVec,
    pub rate_limit_utilization: GaugeVec,
    pub trade_signals_total: CounterVec,
    pub no_trade_total: CounterVec,
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let account_value_usd = Gauge::with_opts(Opts::new("rustrade_account_value_usd", "Total account value in USD"))?;
        registry.register(Box::new(account_value_usd.clone()))?;

        let positions_count = Gauge::with_opts(Opts::new("rustrade_positions_count", "Number of open positions"))?;
        registry.register(Box::new(positions_count.clone()))?;

        let position_value_usd = GaugeVec::new(
            Opts::new("rustrade_position_value_usd", "Position value per symbol in USD"),
            &["symbol"],
        )?;
        registry.register(Box::new(position_value_usd.clone()))?;

        let daily_pnl_pct = Gauge::with_opts(Opts::new("rustrade_daily_pnl_pct", "Daily P&L percentage"))?;
        registry.register(Box::new(daily_pnl_pct.clone()))?;

        let drawdown_pct = Gauge::with_opts(Opts::new("rustrade_drawdown_pct", "Drawdown from high water mark"))?;
        registry.register(Box::new(drawdown_pct.clone()))?;

        let orders_total = CounterVec::new(
            Opts::new("rustrade_orders_total", "Total orders by side and terminal status"),
            &["side", "status"],
        )?;
        registry.register(Box::new(orders_total.clone()))?;

        let circuit_breaker_status = GaugeVec::new(
            Opts::new("rustrade_circuit_breaker_status", "Circuit breaker status (0=open, 1=tripped)"),
            &["name"],
        )?;
        registry.register(Box::new(circuit_breaker_status.clone()))?;

        let cycle_duration_seconds = HistogramVec::new(
            HistogramOpts::new("rustrade_cycle_duration_seconds", "Trading cycle duration in seconds")
                .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["stage"],
        )?;
        registry.register(Box::new(cycle_duration_seconds.clone()))?;

        let api_latency_seconds = HistogramVec::new(
            HistogramOpts::new("rustrade_api_latency_seconds", "Exchange API request latency in seconds")
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["endpoint"],
        )?;
        registry.register(Box::new(api_latency_seconds.clone()))?;

        let rate_limit_utilization = GaugeVec::new(
            Opts::new("rustrade_rate_limit_utilization", "Rate limiter bucket utilization (0-1)"),
            &["endpoint"],
        )?;
        registry.register(Box::new(rate_limit_utilization.clone()))?;

        let trade_signals_total = CounterVec::new(
            Opts::new("rustrade_trade_signals_total", "Total strategy signals generated"),
            &["strategy"],
        )?;
        registry.register(Box::new(trade_signals_total.clone()))?;

        let no_trade_total = CounterVec::new(
            Opts::new("rustrade_no_trade_total", "Total cycles with no trade, by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(no_trade_total.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new("rustrade_uptime_seconds", "Process uptime in seconds"))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            account_value_usd,
            positions_count,
            position_value_usd,
            daily_pnl_pct,
            drawdown_pct,
            orders_total,
            circuit_breaker_status,
            cycle_duration_seconds,
            api_latency_seconds,
            rate_limit_utilization,
            trade_signals_total,
            no_trade_total,
            uptime_seconds,
        })
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode_to_string(&metric_families).unwrap_or_default()
    }

    pub fn set_position_value(&self, symbol: &str, value_usd: f64) {
        self.position_value_usd.with_label_values(&[symbol]).set(value_usd);
    }

    pub fn inc_orders(&self, side: &str, status: &str) {
        self.orders_total.with_label_values(&[side, status]).inc();
    }

    pub fn set_circuit_status(&self, name: &str, tripped: bool) {
        self.circuit_breaker_status.with_label_values(&[name]).set(if tripped { 1.0 } else { 0.0 });
    }

    pub fn observe_cycle_stage(&self, stage: &str, seconds: f64) {
        self.cycle_duration_seconds.with_label_values(&[stage]).observe(seconds);
    }

    pub fn observe_api_latency(&self, endpoint: &str, seconds: f64) {
        self.api_latency_seconds.with_label_values(&[endpoint]).observe(seconds);
    }

    pub fn inc_no_trade(&self, reason: &str) {
        self.no_trade_total.with_label_values(&[reason]).inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to construct default metrics registry")
    }
}
