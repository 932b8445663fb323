//! Caches the tradeable-symbol universe for `loop.universe_cache_seconds`
//! so every cycle doesn't pay the cost of rebuilding eligibility from
//! scratch (spec §4.2).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::domain::errors::ErrorKind;
use crate::domain::ports::UniverseBuilder;

pub struct CachedUniverse {
    builder: Box<dyn UniverseBuilder>,
    cache_seconds: i64,
    cached: Option<(HashMap<String, u8>, DateTime<Utc>)>,
}

impl CachedUniverse {
    pub fn new(builder: Box<dyn UniverseBuilder>, cache_seconds: i64) -> Self {
        Self { builder, cache_seconds, cached: None }
    }

    /// Rebuilds the universe only when the cache has expired or is empty.
    pub async fn get(&mut self, now: DateTime<Utc>) -> Result<HashMap<String, u8>, ErrorKind> {
        if let Some((universe, built_at)) = &self.cached {
            if (now - *built_at).num_seconds() < self.cache_seconds {
                return Ok(universe.clone());
            }
        }

        let universe = self.builder.build().await?;
        info!(symbol_count = universe.len(), "rebuilt trading universe");
        self.cached = Some((universe.clone(), now));
        Ok(universe)
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingBuilder {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl UniverseBuilder for CountingBuilder {
        async fn build(&self) -> Result<HashMap<String, u8>, ErrorKind> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut map = HashMap::new();
            map.insert("BTC-USD".to_string(), 1);
            Ok(map)
        }
    }

    #[tokio::test]
    async fn cache_prevents_rebuild_within_window() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut universe = CachedUniverse::new(Box::new(CountingBuilder { calls: calls.clone() }), 300);
        let now = Utc::now();
        universe.get(now).await.unwrap();
        universe.get(now + chrono::Duration::seconds(10)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_rebuilds_after_expiry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut universe = CachedUniverse::new(Box::new(CountingBuilder { calls: calls.clone() }), 60);
        let now = Utc::now();
        universe.get(now).await.unwrap();
        universe.get(now + chrono::Duration::seconds(120)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
