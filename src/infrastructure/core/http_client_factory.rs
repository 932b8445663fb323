//! Shared `reqwest` client construction with retry middleware. Ported from
//! `infrastructure/core/http_client_factory.rs` — same pool/timeout/backoff
//! numbers, same builder shape.

use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::time::Duration;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Exponential backoff, max 3 retries, 30s request timeout, 10s connect
    /// timeout, up to 5 idle connections per host.
    pub fn create_client() -> ClientWithMiddleware {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        ClientBuilder::new(client).with(RetryTransientMiddleware::new_with_policy(retry_policy)).build()
    }
}
