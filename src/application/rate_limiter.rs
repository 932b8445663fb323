//! Per-endpoint token bucket, continuously refilled at `requests_per_second`
//! (spec §4.2). Ported from `core/rate_limiter.py`; the Python version uses
//! a process lock around a plain dict, here each endpoint's mutable state
//! lives behind its own `tokio::sync::Mutex` inside a `DashMap`-free
//! `std::sync::Mutex<HashMap<..>>` guarded map, safe for concurrent
//! `acquire` callers per spec §5.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

const DEFAULT_PUBLIC_QUOTA: f64 = 10.0;
const DEFAULT_PRIVATE_QUOTA: f64 = 15.0;
const DEFAULT_ALERT_THRESHOLD: f64 = 0.8;
const WINDOW_SECONDS: f64 = 1.0;

struct EndpointQuota {
    requests_per_second: f64,
    tokens: f64,
    last_refill: Instant,
    call_times: Vec<Instant>,
    violations: u64,
}

impl EndpointQuota {
    fn new(requests_per_second: f64) -> Self {
        Self {
            requests_per_second,
            tokens: requests_per_second,
            last_refill: Instant::now(),
            call_times: Vec::new(),
            violations: 0,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let refill_amount = elapsed * self.requests_per_second;
        self.tokens = (self.tokens + refill_amount).min(self.requests_per_second);
        self.last_refill = now;
    }

    fn prune_window(&mut self) {
        let cutoff = Instant::now() - Duration::from_secs_f64(WINDOW_SECONDS);
        self.call_times.retain(|t| *t >= cutoff);
    }

    fn utilization(&mut self) -> f64 {
        self.prune_window();
        if self.requests_per_second > 0.0 {
            self.call_times.len() as f64 / self.requests_per_second
        } else {
            0.0
        }
    }

    fn wait_time(&mut self, tokens: f64) -> Duration {
        self.refill();
        if self.tokens >= tokens {
            return Duration::ZERO;
        }
        let tokens_needed = tokens - self.tokens;
        Duration::from_secs_f64(tokens_needed / self.requests_per_second)
    }

    fn try_acquire(&mut self, tokens: f64) -> bool {
        self.refill();
        if self.tokens >= tokens {
            self.tokens -= tokens;
            self.call_times.push(Instant::now());
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitStats {
    pub utilization: f64,
    pub tokens_available: f64,
    pub calls_last_second: usize,
    pub violations: u64,
}

/// Thread-safe per-endpoint token bucket limiter. Shared across concurrent
/// callers via `&self`; interior state is protected by a `std::sync::Mutex`
/// and held only for the synchronous bookkeeping — the actual wait happens
/// outside the lock via `tokio::time::sleep`.
pub struct RateLimiter {
    alert_threshold: f64,
    default_public_quota: f64,
    default_private_quota: f64,
    quotas: Mutex<HashMap<String, EndpointQuota>>,
}

impl RateLimiter {
    pub fn new(alert_threshold: f64) -> Self {
        Self {
            alert_threshold,
            default_public_quota: DEFAULT_PUBLIC_QUOTA,
            default_private_quota: DEFAULT_PRIVATE_QUOTA,
            quotas: Mutex::new(HashMap::new()),
        }
    }

    pub fn configure(&self, endpoint: impl Into<String>, requests_per_second: f64) {
        if requests_per_second <= 0.0 {
            warn!(endpoint = %"invalid_quota", rate = requests_per_second, "ignoring non-positive rate limit quota");
            return;
        }
        let mut quotas = self.quotas.lock().expect("rate limiter mutex poisoned");
        quotas.insert(endpoint.into(), EndpointQuota::new(requests_per_second));
    }

    fn default_quota_for(&self, is_private: bool) -> f64 {
        if is_private {
            self.default_private_quota
        } else {
            self.default_public_quota
        }
    }

    fn wait_time_for(&self, endpoint: &str, is_private: bool, tokens: f64) -> Duration {
        let mut quotas = self.quotas.lock().expect("rate limiter mutex poisoned");
        let default = self.default_quota_for(is_private);
        let quota = quotas
            .entry(endpoint.to_string())
            .or_insert_with(|| EndpointQuota::new(default));
        quota.wait_time(tokens)
    }

    pub fn wait_time(&self, endpoint: &str) -> Duration {
        self.wait_time_for(endpoint, false, 1.0)
    }

    /// Acquire `tokens` for `endpoint`, sleeping first if the bucket is
    /// currently short. Safe for concurrent callers (spec §5).
    pub async fn acquire(&self, endpoint: &str, is_private: bool, tokens: f64) {
        let wait = self.wait_time_for(endpoint, is_private, tokens);
        if wait > Duration::ZERO {
            debug!(endpoint, wait_ms = wait.as_millis() as u64, "rate limiting");
            tokio::time::sleep(wait).await;
        }

        let mut quotas = self.quotas.lock().expect("rate limiter mutex poisoned");
        let default = self.default_quota_for(is_private);
        let quota = quotas
            .entry(endpoint.to_string())
            .or_insert_with(|| EndpointQuota::new(default));
        quota.try_acquire(tokens);

        let utilization = quota.utilization();
        if utilization >= self.alert_threshold {
            warn!(endpoint, utilization, threshold = self.alert_threshold, "high rate limit utilization");
        }
    }

    pub fn record_violation(&self, endpoint: &str, is_private: bool) {
        let mut quotas = self.quotas.lock().expect("rate limiter mutex poisoned");
        let default = self.default_quota_for(is_private);
        let quota = quotas
            .entry(endpoint.to_string())
            .or_insert_with(|| EndpointQuota::new(default));
        quota.violations += 1;
    }

    pub fn stats(&self, endpoint: &str, is_private: bool) -> RateLimitStats {
        let mut quotas = self.quotas.lock().expect("rate limiter mutex poisoned");
        let default = self.default_quota_for(is_private);
        let quota = quotas
            .entry(endpoint.to_string())
            .or_insert_with(|| EndpointQuota::new(default));
        RateLimitStats {
            utilization: quota.utilization(),
            tokens_available: quota.tokens,
            calls_last_second: quota.call_times.len(),
            violations: quota.violations,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_THRESHOLD)
    }
}
