//! NTP-based clock sync validation (spec §4.9). Ported from
//! `infra/clock_sync.py`. Mode gating: DRY_RUN skips, PAPER warns, LIVE
//! refuses to start when drift exceeds tolerance or every server is
//! unreachable.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::app_config::Mode;
use crate::domain::errors::ErrorKind;

const NTP_EPOCH_OFFSET_SECS: f64 = 2_208_988_800.0;
const DEFAULT_MAX_DRIFT_MS: f64 = 100.0;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const NTP_SERVERS: &[&str] = &[
    "pool.ntp.org:123",
    "time.apple.com:123",
    "time.google.com:123",
    "time.cloudflare.com:123",
];

#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub synced: bool,
    pub drift_ms: Option<f64>,
    pub within_tolerance: bool,
    pub max_drift_ms: f64,
    pub server: Option<String>,
    pub round_trip_ms: Option<f64>,
    pub error: Option<String>,
}

pub struct ClockSyncValidator {
    max_drift_ms: f64,
    timeout: Duration,
}

impl Default for ClockSyncValidator {
    fn default() -> Self {
        Self {
            max_drift_ms: DEFAULT_MAX_DRIFT_MS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

fn unix_seconds_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

impl ClockSyncValidator {
    pub fn new(max_drift_ms: f64, timeout: Duration) -> Self {
        Self { max_drift_ms, timeout }
    }

    /// Queries one NTP server, returning `(offset_seconds, round_trip_seconds)`.
    async fn query_ntp(&self, server: &str) -> anyhow::Result<(f64, f64)> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(server).await?;

        let mut request = [0u8; 48];
        request[0] = 0x1b; // LI=0, VN=3, Mode=3 (client)

        let t1 = unix_seconds_now();
        socket.send(&request).await?;

        let mut response = [0u8; 1024];
        let n = timeout(self.timeout, socket.recv(&mut response)).await??;
        let t4 = unix_seconds_now();

        if n < 48 {
            anyhow::bail!("short NTP response ({n} bytes)");
        }

        let t2_fixed = u64::from_be_bytes(response[32..40].try_into().unwrap());
        let t3_fixed = u64::from_be_bytes(response[40..48].try_into().unwrap());
        let t2 = (t2_fixed as f64) / (2f64.powi(32)) - NTP_EPOCH_OFFSET_SECS;
        let t3 = (t3_fixed as f64) / (2f64.powi(32)) - NTP_EPOCH_OFFSET_SECS;

        let offset = ((t2 - t1) + (t3 - t4)) / 2.0;
        let round_trip = (t4 - t1) - (t3 - t2);
        Ok((offset, round_trip))
    }

    async fn query_with_fallback(&self) -> Option<(String, f64, f64)> {
        for server in NTP_SERVERS {
            match self.query_ntp(server).await {
                Ok((offset, round_trip)) => {
                    return Some((server.to_string(), offset * 1000.0, round_trip * 1000.0));
                }
                Err(err) => {
                    warn!(server, error = %err, "NTP query failed");
                }
            }
        }
        None
    }

    pub async fn check_sync(&self) -> SyncStatus {
        match self.query_with_fallback().await {
            None => SyncStatus {
                synced: false,
                drift_ms: None,
                within_tolerance: false,
                max_drift_ms: self.max_drift_ms,
                server: None,
                round_trip_ms: None,
                error: Some("all NTP servers unreachable".to_string()),
            },
            Some((server, offset_ms, round_trip_ms)) => {
                let drift_ms = offset_ms.abs();
                let within_tolerance = drift_ms <= self.max_drift_ms;
                SyncStatus {
                    synced: within_tolerance,
                    drift_ms: Some(drift_ms),
                    within_tolerance,
                    max_drift_ms: self.max_drift_ms,
                    server: Some(server),
                    round_trip_ms: Some(round_trip_ms),
                    error: None,
                }
            }
        }
    }

    /// DRY_RUN skips entirely; PAPER validates but only warns; LIVE returns
    /// `ClockSyncFailure` on excessive drift or total unreachability.
    pub async fn validate_or_fail(&self, mode: Mode) -> Result<SyncStatus, ErrorKind> {
        if mode.skips_clock_sync() {
            info!("clock sync check skipped (DRY_RUN mode)");
            return Ok(SyncStatus {
                synced: true,
                drift_ms: Some(0.0),
                within_tolerance: true,
                max_drift_ms: self.max_drift_ms,
                server: Some("SKIPPED (DRY_RUN)".to_string()),
                round_trip_ms: None,
                error: None,
            });
        }

        let status = self.check_sync().await;

        if mode == Mode::Paper {
            if !status.synced {
                warn!(drift_ms = ?status.drift_ms, max_drift_ms = self.max_drift_ms, "clock drift exceeds tolerance in PAPER mode, continuing");
            } else {
                info!(drift_ms = ?status.drift_ms, "clock sync validated (PAPER mode)");
            }
            return Ok(status);
        }

        if !status.synced {
            let drift_str = status
                .drift_ms
                .map(|d| format!("{d:.1}ms"))
                .unwrap_or_else(|| "unknown".to_string());
            return Err(ErrorKind::ClockSyncFailure(format!(
                "drift {drift_str} exceeds tolerance of {}ms (server: {})",
                self.max_drift_ms,
                status.server.clone().unwrap_or_else(|| "unreachable".to_string())
            )));
        }

        info!(drift_ms = ?status.drift_ms, server = ?status.server, "clock sync validated (LIVE mode)");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dry_run_skips_network_entirely() {
        let validator = ClockSyncValidator::default();
        let status = validator.validate_or_fail(Mode::DryRun).await.unwrap();
        assert!(status.synced);
        assert_eq!(status.server.as_deref(), Some("SKIPPED (DRY_RUN)"));
    }
}
