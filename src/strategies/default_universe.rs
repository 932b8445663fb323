//! Minimal [`UniverseBuilder`]: a fixed symbol-to-tier map read once from
//! `universe.yaml`. Dynamic eligibility scoring (volume screens, liquidity
//! scoring, delisting checks) is explicitly out of core scope — this is the
//! reference plug-in the loop wires by default.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::policy_config::OpaqueConfig;
use crate::domain::errors::ErrorKind;
use crate::domain::ports::{PortResult, UniverseBuilder};

pub struct StaticUniverseBuilder {
    symbols: HashMap<String, u8>,
}

impl StaticUniverseBuilder {
    pub fn new(symbols: HashMap<String, u8>) -> Self {
        Self { symbols }
    }

    /// Expects `universe.yaml` shaped as:
    /// ```yaml
    /// symbols:
    ///   BTC-USD: 1
    ///   ETH-USD: 2
    /// ```
    pub fn from_config(universe: &OpaqueConfig) -> PortResult<Self> {
        let raw = universe
            .raw
            .get("symbols")
            .ok_or_else(|| ErrorKind::ValidationError("universe.yaml missing `symbols` map".to_string()))?;
        let symbols: HashMap<String, u8> = serde_yaml::from_value(raw.clone())
            .map_err(|err| ErrorKind::ValidationError(format!("invalid universe.yaml symbols: {err}")))?;
        Ok(Self::new(symbols))
    }
}

#[async_trait]
impl UniverseBuilder for StaticUniverseBuilder {
    async fn build(&self) -> PortResult<HashMap<String, u8>> {
        Ok(self.symbols.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_returns_the_configured_symbols() {
        let mut symbols = HashMap::new();
        symbols.insert("BTC-USD".to_string(), 1u8);
        let builder = StaticUniverseBuilder::new(symbols);
        let universe = builder.build().await.unwrap();
        assert_eq!(universe.get("BTC-USD"), Some(&1));
    }

    #[test]
    fn from_config_parses_the_symbols_map() {
        let universe: OpaqueConfig = serde_yaml::from_str("symbols:\n  BTC-USD: 1\n  ETH-USD: 2\n").unwrap();
        let builder = StaticUniverseBuilder::from_config(&universe).unwrap();
        assert_eq!(builder.symbols.len(), 2);
    }

    #[test]
    fn from_config_rejects_a_missing_symbols_key() {
        let universe: OpaqueConfig = serde_yaml::from_str("other: true\n").unwrap();
        assert!(StaticUniverseBuilder::from_config(&universe).is_err());
    }
}
