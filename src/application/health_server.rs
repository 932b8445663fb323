//! JSON health endpoint served over `/`, `/health`, and `/healthz`, ported
//! from `infra/healthcheck.py`'s pluggable status-provider pattern but
//! built on axum instead of a raw `http.server` thread (spec §6
//! monitoring section).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub ok: bool,
    pub mode: String,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_cycle_duration_ms: Option<u64>,
    pub consecutive_errors: u32,
    pub account_value_usd: Option<rust_decimal::Decimal>,
    pub open_position_count: usize,
    pub circuit_breakers_tripped: Vec<String>,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            ok: true,
            mode: "UNKNOWN".to_string(),
            last_cycle_at: None,
            last_cycle_duration_ms: None,
            consecutive_errors: 0,
            account_value_usd: None,
            open_position_count: 0,
            circuit_breakers_tripped: Vec::new(),
        }
    }
}

type SharedStatus = Arc<RwLock<HealthStatus>>;

async fn health_handler(State(status): State<SharedStatus>) -> impl IntoResponse {
    let status = status.read().await.clone();
    let code = if status.ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(status))
}

/// Owns the latest [`HealthStatus`] and the axum server task serving it.
/// The trading cycle calls [`HealthServer::update`] once per iteration;
/// nothing else mutates this state.
pub struct HealthServer {
    status: SharedStatus,
    port: u16,
}

impl HealthServer {
    pub fn new(port: u16) -> Self {
        Self { status: Arc::new(RwLock::new(HealthStatus::default())), port }
    }

    pub async fn update(&self, status: HealthStatus) {
        *self.status.write().await = status;
    }

    /// Spawns the server as a background task and returns immediately.
    pub fn spawn(&self) -> tokio::task::JoinHandle<()> {
        let status = self.status.clone();
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tokio::spawn(async move {
            let app = Router::new()
                .route("/", get(health_handler))
                .route("/health", get(health_handler))
                .route("/healthz", get(health_handler))
                .with_state(status);

            match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => {
                    info!(%addr, "health server listening");
                    if let Err(err) = axum::serve(listener, app).await {
                        tracing::error!(error = %err, "health server terminated");
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, %addr, "health server failed to bind");
                }
            }
        })
    }
}
