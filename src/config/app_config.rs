use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    DryRun,
    Paper,
    Live,
}

impl Mode {
    pub fn is_live(self) -> bool {
        matches!(self, Mode::Live)
    }

    pub fn skips_clock_sync(self) -> bool {
        matches!(self, Mode::DryRun)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppSection {
    pub mode: Mode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExchangeSection {
    #[serde(default)]
    pub read_only: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub file: Option<String>,
}

fn default_metrics_port() -> u16 {
    9464
}

fn default_healthcheck_port() -> u16 {
    8080
}

fn default_min_severity() -> String {
    "warning".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertsSection {
    #[serde(default = "default_min_severity")]
    pub min_severity: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitoringSection {
    #[serde(default)]
    pub metrics_enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default)]
    pub healthcheck_enabled: bool,
    #[serde(default = "default_healthcheck_port")]
    pub healthcheck_port: u16,
    #[serde(default)]
    pub alerts_enabled: bool,
    #[serde(default)]
    pub alerts: AlertsSection,
}

impl Default for AlertsSection {
    fn default() -> Self {
        Self {
            min_severity: default_min_severity(),
        }
    }
}

fn default_interval_seconds() -> u64 {
    60
}

fn default_jitter_pct() -> f64 {
    10.0
}

fn default_universe_cache_seconds() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoopSection {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_jitter_pct")]
    pub jitter_pct: f64,
    #[serde(default = "default_universe_cache_seconds")]
    pub universe_cache_seconds: u64,
}

impl Default for LoopSection {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            jitter_pct: default_jitter_pct(),
            universe_cache_seconds: default_universe_cache_seconds(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutoTuneFloors {
    pub min_trade_notional_usd: Option<rust_decimal::Decimal>,
    pub per_symbol_cap_pct: Option<rust_decimal::Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutoTuneSection {
    #[serde(default)]
    pub zero_trigger_cycles: u32,
    #[serde(default)]
    pub loosen: bool,
    #[serde(default)]
    pub floors: AutoTuneFloors,
}

impl Default for AutoTuneSection {
    fn default() -> Self {
        Self {
            zero_trigger_cycles: 0,
            loosen: false,
            floors: AutoTuneFloors::default(),
        }
    }
}

fn default_persist_interval_seconds() -> u64 {
    30
}

fn default_backup_max_files() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateSection {
    #[serde(default = "default_persist_interval_seconds")]
    pub persist_interval_seconds: u64,
    #[serde(default)]
    pub backup_enabled: bool,
    #[serde(default)]
    pub backup_interval_hours: u64,
    #[serde(default)]
    pub backup_path: Option<String>,
    #[serde(default = "default_backup_max_files")]
    pub backup_max_files: u32,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            persist_interval_seconds: default_persist_interval_seconds(),
            backup_enabled: false,
            backup_interval_hours: 24,
            backup_path: None,
            backup_max_files: default_backup_max_files(),
        }
    }
}

/// Deserialized shape of `app.yaml` (spec §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub app: AppSection,
    #[serde(default)]
    pub exchange: ExchangeSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub monitoring: MonitoringSection,
    // `loop` is a Rust keyword; the raw identifier maps straight onto the
    // YAML key of the same name.
    #[serde(default, rename = "loop")]
    pub r#loop: LoopSection,
    #[serde(default)]
    pub auto_tune: AutoTuneSection,
    #[serde(default)]
    pub state: StateSection,
}

impl Default for ExchangeSection {
    fn default() -> Self {
        Self { read_only: false }
    }
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_port: default_metrics_port(),
            healthcheck_enabled: false,
            healthcheck_port: default_healthcheck_port(),
            alerts_enabled: false,
            alerts: AlertsSection::default(),
        }
    }
}
