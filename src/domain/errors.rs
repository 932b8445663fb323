use thiserror::Error;

/// Closed set of error kinds the core control loop reasons about.
///
/// Mirrors spec §7: each variant drives a specific propagation policy in the
/// trading cycle (abort-with-no-trade, retry, refuse-startup, surface-to-proposal).
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("critical data unavailable: {source}")]
    CriticalDataUnavailable { source: String },

    #[error("transient network error: {0}")]
    TransientNetworkError(String),

    #[error("rate limit exceeded on {endpoint}")]
    RateLimitExceeded { endpoint: String },

    #[error("client error {status}: {body}")]
    ClientError { status: u16, body: String },

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("invalid state transition: {from} -> {to}")]
    StateTransitionInvalid { from: String, to: String },

    #[error("instance lock failure: {0}")]
    InstanceLockFailure(String),

    #[error("clock sync failure: {0}")]
    ClockSyncFailure(String),

    #[error("circuit tripped: {0}")]
    CircuitTripped(String),

    #[error("shadow dry-run rejection: {0}")]
    ShadowDryRunRejection(String),

    #[error("stale quote rejection: {0}")]
    StaleQuoteRejection(String),
}

impl ErrorKind {
    /// Machine-readable no-trade reason string for the audit log (spec §7).
    pub fn no_trade_reason(&self) -> String {
        match self {
            ErrorKind::CriticalDataUnavailable { source } => {
                format!("data_unavailable:{source}")
            }
            ErrorKind::CircuitTripped(name) => format!("circuit_tripped:{name}"),
            ErrorKind::StaleQuoteRejection(detail) => format!("stale_quote:{detail}"),
            ErrorKind::ValidationError(detail) => format!("rejected:{detail}"),
            other => format!("error:{other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_trade_reason_prefixes_data_unavailable() {
        let err = ErrorKind::CriticalDataUnavailable {
            source: "accounts".to_string(),
        };
        assert_eq!(err.no_trade_reason(), "data_unavailable:accounts");
    }

    #[test]
    fn no_trade_reason_prefixes_circuit_tripped() {
        let err = ErrorKind::CircuitTripped("volatility_crash".to_string());
        assert_eq!(err.no_trade_reason(), "circuit_tripped:volatility_crash");
    }
}
