//! API secret rotation tracking (spec §4.10). Ported from
//! `infra/secret_rotation.py`. Never touches secret material — only
//! timestamps and a free-text reason.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

const ROTATION_POLICY_DAYS: i64 = 90;
const WARNING_THRESHOLD_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationEvent {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationMetadata {
    pub last_rotation_utc: DateTime<Utc>,
    pub rotation_policy_days: i64,
    pub rotations: Vec<RotationEvent>,
}

impl RotationMetadata {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            last_rotation_utc: now,
            rotation_policy_days: ROTATION_POLICY_DAYS,
            rotations: vec![RotationEvent {
                timestamp: now,
                reason: "Initial setup (first run)".to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RotationStatus {
    pub days_since_rotation: f64,
    pub rotation_due: bool,
    pub rotation_warning: bool,
    pub days_until_due: f64,
    pub policy_days: i64,
}

pub struct SecretRotationTracker {
    metadata_path: PathBuf,
}

impl SecretRotationTracker {
    pub fn new(metadata_path: impl Into<PathBuf>) -> Self {
        Self { metadata_path: metadata_path.into() }
    }

    /// Creates the metadata file if missing, treating first run as a
    /// rotation event. Corrupt/missing metadata is reinitialized rather
    /// than failing startup.
    pub fn ensure_initialized(&self) -> std::io::Result<()> {
        if self.metadata_path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.metadata_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let metadata = RotationMetadata::fresh(Utc::now());
        self.save(&metadata)?;
        info!(path = %self.metadata_path.display(), "initialized secret rotation metadata");
        Ok(())
    }

    fn load(&self) -> RotationMetadata {
        match std::fs::read(&self.metadata_path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(metadata) => metadata,
                Err(err) => {
                    error!(error = %err, "failed to parse secret rotation metadata, treating as overdue");
                    Self::ancient_default()
                }
            },
            Err(err) => {
                error!(error = %err, "failed to read secret rotation metadata, treating as overdue");
                Self::ancient_default()
            }
        }
    }

    fn ancient_default() -> RotationMetadata {
        RotationMetadata {
            last_rotation_utc: DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            rotation_policy_days: ROTATION_POLICY_DAYS,
            rotations: Vec::new(),
        }
    }

    fn save(&self, metadata: &RotationMetadata) -> std::io::Result<()> {
        let bytes = serde_json::to_vec_pretty(metadata)?;
        std::fs::write(&self.metadata_path, bytes)
    }

    pub fn status(&self) -> RotationStatus {
        let metadata = self.load();
        let days_since = (Utc::now() - metadata.last_rotation_utc).num_seconds() as f64 / 86400.0;
        let days_until_due = ROTATION_POLICY_DAYS as f64 - days_since;
        RotationStatus {
            days_since_rotation: days_since,
            rotation_due: days_since > ROTATION_POLICY_DAYS as f64,
            rotation_warning: days_since > (ROTATION_POLICY_DAYS - WARNING_THRESHOLD_DAYS) as f64,
            days_until_due,
            policy_days: ROTATION_POLICY_DAYS,
        }
    }

    pub fn record_rotation(&self, reason: impl Into<String>) {
        let now = Utc::now();
        let mut metadata = self.load();
        metadata.rotations.push(RotationEvent { timestamp: now, reason: reason.into() });
        metadata.last_rotation_utc = now;
        if let Err(err) = self.save(&metadata) {
            error!(error = %err, "failed to persist secret rotation event");
        }
        info!(next_due = %(now + Duration::days(ROTATION_POLICY_DAYS)).date_naive(), "recorded secret rotation");
    }

    /// Logs (and would alert, via the caller wiring an `AlertSink`) CRITICAL
    /// when overdue, WARNING within the pre-expiry window.
    pub fn check(&self) -> RotationStatus {
        let status = self.status();
        if status.rotation_due {
            warn!(
                days_since_rotation = status.days_since_rotation,
                policy_days = status.policy_days,
                "API secrets OVERDUE for rotation"
            );
        } else if status.rotation_warning {
            warn!(
                days_until_due = status.days_until_due,
                "API secret rotation approaching, plan rotation before deadline"
            );
        } else {
            info!(
                days_since_rotation = status.days_since_rotation,
                days_until_due = status.days_until_due,
                "secret rotation status OK"
            );
        }
        status
    }
}

pub fn default_metadata_path(data_dir: &Path) -> PathBuf {
    data_dir.join("secret_rotation.json")
}
