//! Durable [`StateStore`] backed by a JSON snapshot on local disk. Writes go
//! through a temp-file-then-rename swap the way
//! `infrastructure/settings_persistence.rs` persists settings, hardened
//! further with an `fsync` before the rename so a crash never observes a
//! half-written file (spec §4.8 torn-write safety), plus the backup
//! rotation `config::app_config::StateSection` describes.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::app_config::StateSection;
use crate::domain::errors::ErrorKind;
use crate::domain::order::{Order, OrderStatus};
use crate::domain::portfolio::PortfolioState;
use crate::domain::ports::{PortResult, StateStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenOrderRecord {
    order: Order,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LatencySample {
    last_ms: u64,
    sample_count: u64,
}

fn write_atomically(path: &Path, contents: &str) -> std::io::Result<()> {
    let temp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path)?;
    if let Some(dir) = path.parent() {
        if let Ok(dir_handle) = File::open(dir) {
            let _ = dir_handle.sync_all();
        }
    }
    Ok(())
}

/// Single-writer JSON snapshot store. The trading cycle owns one instance;
/// concurrent callers serialize through the internal mutex rather than
/// racing on the filesystem.
pub struct JsonStateStore {
    state_path: PathBuf,
    open_orders_path: PathBuf,
    latency_path: PathBuf,
    config: StateSection,
    last_backup_at: Mutex<Option<DateTime<Utc>>>,
    write_lock: Mutex<()>,
}

impl JsonStateStore {
    pub fn new(state_dir: impl AsRef<Path>, config: StateSection) -> Self {
        let state_dir = state_dir.as_ref();
        Self {
            state_path: state_dir.join("portfolio_state.json"),
            open_orders_path: state_dir.join("open_orders.json"),
            latency_path: state_dir.join("latency_stats.json"),
            config,
            last_backup_at: Mutex::new(None),
            write_lock: Mutex::new(()),
        }
    }

    fn read_json<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> PortResult<T> {
        if !path.exists() {
            return Ok(T::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|err| ErrorKind::ValidationError(format!("failed to read {}: {err}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|err| ErrorKind::ValidationError(format!("failed to parse {}: {err}", path.display())))
    }

    async fn maybe_rotate_backup(&self, now: DateTime<Utc>) {
        if !self.config.backup_enabled {
            return;
        }
        let Some(backup_dir) = self.config.backup_path.as_deref() else { return };

        let mut last_backup = self.last_backup_at.lock().await;
        let due = match *last_backup {
            Some(last) => (now - last).num_hours() >= self.config.backup_interval_hours as i64,
            None => true,
        };
        if !due {
            return;
        }

        let backup_dir = PathBuf::from(backup_dir);
        if let Err(err) = fs::create_dir_all(&backup_dir) {
            warn!(error = %err, "failed to create state backup directory");
            return;
        }

        let stamp = now.format("%Y%m%dT%H%M%SZ");
        let backup_path = backup_dir.join(format!("portfolio_state.{stamp}.json"));
        if let Err(err) = fs::copy(&self.state_path, &backup_path) {
            if self.state_path.exists() {
                warn!(error = %err, "failed to write state backup");
            }
            return;
        }

        *last_backup = Some(now);
        self.prune_old_backups(&backup_dir);
    }

    fn prune_old_backups(&self, backup_dir: &Path) {
        let Ok(entries) = fs::read_dir(backup_dir) else { return };
        let mut files: Vec<_> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("portfolio_state."))
            .collect();
        files.sort_by_key(|e| e.file_name());

        let max_files = self.config.backup_max_files as usize;
        if files.len() > max_files {
            for stale in &files[..files.len() - max_files] {
                let _ = fs::remove_file(stale.path());
            }
        }
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load(&self) -> PortResult<PortfolioState> {
        if !self.state_path.exists() {
            debug!(path = %self.state_path.display(), "no prior state snapshot, starting fresh");
            return Ok(PortfolioState::empty(rust_decimal::Decimal::ZERO));
        }
        let content = fs::read_to_string(&self.state_path)
            .map_err(|err| ErrorKind::ValidationError(format!("failed to read state snapshot: {err}")))?;
        serde_json::from_str(&content)
            .map_err(|err| ErrorKind::ValidationError(format!("failed to parse state snapshot: {err}")))
    }

    async fn save(&self, state: &PortfolioState) -> PortResult<()> {
        let _guard = self.write_lock.lock().await;
        let json = serde_json::to_string_pretty(state)
            .map_err(|err| ErrorKind::ValidationError(format!("failed to serialize state: {err}")))?;
        write_atomically(&self.state_path, &json)
            .map_err(|err| ErrorKind::ValidationError(format!("failed to persist state snapshot: {err}")))?;
        self.maybe_rotate_backup(Utc::now()).await;
        Ok(())
    }

    async fn record_open_order(&self, order: &Order) -> PortResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut records: HashMap<String, OpenOrderRecord> = Self::read_json(&self.open_orders_path)?;
        records.insert(order.client_order_id.clone(), OpenOrderRecord { order: order.clone(), recorded_at: Utc::now() });
        let json = serde_json::to_string_pretty(&records)
            .map_err(|err| ErrorKind::ValidationError(format!("failed to serialize open orders: {err}")))?;
        write_atomically(&self.open_orders_path, &json)
            .map_err(|err| ErrorKind::ValidationError(format!("failed to persist open orders: {err}")))
    }

    async fn close_order(&self, client_order_id: &str, status: OrderStatus, details: &str) -> PortResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut records: HashMap<String, OpenOrderRecord> = Self::read_json(&self.open_orders_path)?;
        if records.remove(client_order_id).is_some() {
            info!(client_order_id, ?status, details, "closed order removed from open-orders ledger");
        }
        let json = serde_json::to_string_pretty(&records)
            .map_err(|err| ErrorKind::ValidationError(format!("failed to serialize open orders: {err}")))?;
        write_atomically(&self.open_orders_path, &json)
            .map_err(|err| ErrorKind::ValidationError(format!("failed to persist open orders: {err}")))
    }

    async fn has_open_order(&self, client_order_id: &str) -> PortResult<bool> {
        let records: HashMap<String, OpenOrderRecord> = Self::read_json(&self.open_orders_path)?;
        Ok(records.contains_key(client_order_id))
    }

    async fn purge_expired_pending(&self, now: DateTime<Utc>) -> PortResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut records: HashMap<String, OpenOrderRecord> = Self::read_json(&self.open_orders_path)?;
        let before = records.len();
        records.retain(|_, record| !record.order.status.is_terminal() || (now - record.recorded_at).num_hours() < 24);
        if records.len() != before {
            let json = serde_json::to_string_pretty(&records)
                .map_err(|err| ErrorKind::ValidationError(format!("failed to serialize open orders: {err}")))?;
            write_atomically(&self.open_orders_path, &json)
                .map_err(|err| ErrorKind::ValidationError(format!("failed to persist open orders: {err}")))?;
        }
        Ok(())
    }

    async fn update_latency_stats(&self, endpoint: &str, latency_ms: u64) -> PortResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut stats: HashMap<String, LatencySample> = Self::read_json(&self.latency_path)?;
        let sample = stats.entry(endpoint.to_string()).or_default();
        sample.last_ms = latency_ms;
        sample.sample_count += 1;
        let json = serde_json::to_string_pretty(&stats)
            .map_err(|err| ErrorKind::ValidationError(format!("failed to serialize latency stats: {err}")))?;
        write_atomically(&self.latency_path, &json)
            .map_err(|err| ErrorKind::ValidationError(format!("failed to persist latency stats: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{ExecutionRoute, OrderSide};
    use rust_decimal_macros::dec;

    fn test_config() -> StateSection {
        StateSection { persist_interval_seconds: 30, backup_enabled: false, backup_interval_hours: 24, backup_path: None, backup_max_files: 5 }
    }

    #[tokio::test]
    async fn save_then_load_round_trips_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path(), test_config());
        let mut state = PortfolioState::empty(dec!(1000));
        state.trades_today = 3;
        store.save(&state).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.trades_today, 3);
        assert_eq!(loaded.account_value_usd, dec!(1000));
    }

    #[tokio::test]
    async fn missing_snapshot_loads_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path(), test_config());
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.account_value_usd, rust_decimal::Decimal::ZERO);
    }

    #[tokio::test]
    async fn record_then_close_order_removes_it_from_the_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path(), test_config());
        let order = Order::new("c1", "BTC-USD", OrderSide::Buy, dec!(100), dec!(0.002), ExecutionRoute::TakerMarket, Utc::now());
        store.record_open_order(&order).await.unwrap();
        store.close_order("c1", OrderStatus::Filled, "filled").await.unwrap();

        let records: HashMap<String, OpenOrderRecord> = JsonStateStore::read_json(&dir.path().join("open_orders.json")).unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn backup_rotation_writes_a_timestamped_copy() {
        let dir = tempfile::tempdir().unwrap();
        let backup_dir = dir.path().join("backups");
        let config = StateSection {
            persist_interval_seconds: 30,
            backup_enabled: true,
            backup_interval_hours: 0,
            backup_path: Some(backup_dir.to_string_lossy().to_string()),
            backup_max_files: 2,
        };
        let store = JsonStateStore::new(dir.path(), config);
        store.save(&PortfolioState::empty(dec!(500))).await.unwrap();

        let entries: Vec<_> = fs::read_dir(&backup_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
