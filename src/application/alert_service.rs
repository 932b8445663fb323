//! Default logging [`AlertSink`] — always registered so alerts are never
//! silently dropped even when no external transport (Slack, email, etc.) is
//! configured. Concrete transports are a plug-in surface (spec §4.12).

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::domain::errors::ErrorKind;
use crate::domain::ports::{Alert, AlertSeverity, AlertSink};

pub struct LoggingAlertSink {
    min_severity: AlertSeverity,
}

impl LoggingAlertSink {
    pub fn new(min_severity: AlertSeverity) -> Self {
        Self { min_severity }
    }
}

#[async_trait]
impl AlertSink for LoggingAlertSink {
    async fn send(&self, alert: Alert) -> Result<(), ErrorKind> {
        if alert.severity < self.min_severity {
            return Ok(());
        }
        match alert.severity {
            AlertSeverity::Critical => error!(detail = %alert.detail, "{}", alert.summary),
            AlertSeverity::Warning => warn!(detail = %alert.detail, "{}", alert.summary),
            AlertSeverity::Info => info!(detail = %alert.detail, "{}", alert.summary),
        }
        Ok(())
    }
}

/// Fans an alert out to every configured sink; a failing sink is logged and
/// skipped rather than dropping the alert for every other sink.
pub struct AlertService {
    sinks: Vec<Box<dyn AlertSink>>,
}

impl AlertService {
    pub fn new(sinks: Vec<Box<dyn AlertSink>>) -> Self {
        Self { sinks }
    }

    pub async fn dispatch(&self, alert: Alert) {
        for sink in &self.sinks {
            if let Err(err) = sink.send(alert.clone()).await {
                error!(error = %err, "alert sink failed to deliver");
            }
        }
    }
}
