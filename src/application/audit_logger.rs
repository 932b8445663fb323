//! Append-only JSONL audit trail, one line per cycle, covering every field
//! spec §8 names: timestamp, mode, proposals considered, risk decisions,
//! orders placed, fills, and no-trade reasons. Never overwrites or
//! truncates — only appends, so history survives process restarts.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

#[derive(Debug, Clone, Serialize)]
pub struct CycleAuditRecord {
    pub cycle_id: String,
    pub timestamp: DateTime<Utc>,
    pub mode: String,
    pub universe_size: usize,
    pub proposals_considered: usize,
    pub proposals_approved: usize,
    pub proposals_rejected: usize,
    pub orders_placed: usize,
    pub orders_filled: usize,
    pub no_trade_reasons: Vec<String>,
    pub account_value_usd: rust_decimal::Decimal,
    pub cycle_duration_ms: u64,
}

pub struct AuditLogger {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl AuditLogger {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    /// Appends one JSON line. Never propagates failure up into the trading
    /// cycle — a broken audit log must not stop trading, only get logged.
    pub fn record(&self, record: &CycleAuditRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(err) => {
                error!(error = %err, "failed to serialize audit record");
                return;
            }
        };
        let mut file = self.file.lock().unwrap();
        if let Err(err) = writeln!(file, "{line}") {
            error!(error = %err, path = %self.path.display(), "failed to append audit record");
        }
    }
}
