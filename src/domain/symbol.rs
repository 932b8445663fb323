//! Canonical `BASE-QUOTE` symbol normalization.
//!
//! Ported from the 247trader-v2 `infra/symbols.py` alias table so the same
//! tickers canonicalize the same way across configs, exchange responses, and
//! persisted state.

use std::collections::HashMap;

pub const DEFAULT_QUOTE: &str = "USD";

const QUOTE_SUFFIXES: &[&str] = &[
    "USD", "USDC", "USDT", "USDP", "USDS", "DAI", "EUR", "GBP", "BTC", "ETH", "SOL",
];

fn base_alias(ticker: &str) -> &str {
    match ticker {
        "XBT" => "BTC",
        "WBTC" => "BTC",
        "RENBTC" => "BTC",
        other => other,
    }
}

/// Returns the canonical base asset ticker (e.g. `WBTC` -> `BTC`).
pub fn canonical_base(base: &str) -> String {
    if base.is_empty() {
        return String::new();
    }
    base_alias(&base.to_ascii_uppercase()).to_string()
}

/// Normalize any symbol-like string to canonical `BASE-QUOTE` form.
///
/// `BTCUSD`, `btc-usdc`, `XBT-USD`, `BTC/USD` all normalize; idempotent:
/// `normalize(normalize(s)) == normalize(s)`.
pub fn normalize_symbol(symbol: &str) -> String {
    normalize_symbol_with_quote(symbol, DEFAULT_QUOTE)
}

pub fn normalize_symbol_with_quote(symbol: &str, default_quote: &str) -> String {
    if symbol.trim().is_empty() {
        return String::new();
    }

    let mut token = symbol.trim().to_ascii_uppercase().replace(' ', "");
    for delim in ['/', '_', ':'] {
        token = token.replace(delim, "-");
    }
    while token.contains("--") {
        token = token.replace("--", "-");
    }
    token = token.trim_end_matches('-').to_string();

    if token.is_empty() {
        return String::new();
    }

    if let Some((base, quote)) = token.split_once('-') {
        let base = if base.is_empty() {
            canonical_base(default_quote)
        } else {
            canonical_base(base)
        };
        let quote = if quote.is_empty() {
            default_quote.to_string()
        } else {
            quote.to_string()
        };
        return format!("{base}-{quote}");
    }

    for quote in QUOTE_SUFFIXES {
        if let Some(base) = token.strip_suffix(quote) {
            let base = if base.is_empty() {
                quote.to_string()
            } else {
                canonical_base(base)
            };
            return format!("{base}-{quote}");
        }
    }

    format!("{}-{}", canonical_base(&token), default_quote)
}

/// Returns `(base, quote)` for any symbol variant.
pub fn extract_base_quote(symbol: &str) -> (String, String) {
    let normalized = normalize_symbol(symbol);
    if normalized.is_empty() {
        return (String::new(), DEFAULT_QUOTE.to_string());
    }
    match normalized.split_once('-') {
        Some((base, quote)) => (base.to_string(), quote.to_string()),
        None => (normalized, DEFAULT_QUOTE.to_string()),
    }
}

pub fn equivalent_symbols(lhs: &str, rhs: &str) -> bool {
    normalize_symbol(lhs) == normalize_symbol(rhs)
}

/// Aggregate a symbol -> value map onto canonical keys, summing collisions.
pub fn merge_symbol_value_map(values: &HashMap<String, f64>) -> HashMap<String, f64> {
    let mut merged = HashMap::new();
    for (raw_symbol, value) in values {
        let symbol = normalize_symbol(raw_symbol);
        if symbol.is_empty() {
            continue;
        }
        *merged.entry(symbol).or_insert(0.0) += value;
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_common_aliases() {
        assert_eq!(normalize_symbol("BTCUSD"), "BTC-USD");
        assert_eq!(normalize_symbol("btc-usdc"), "BTC-USDC");
        assert_eq!(normalize_symbol("XBT-USD"), "BTC-USD");
        assert_eq!(normalize_symbol("btc/usd"), "BTC-USD");
        assert_eq!(normalize_symbol("eth_usd"), "ETH-USD");
    }

    #[test]
    fn normalize_is_idempotent() {
        for s in ["BTCUSD", "btc-usdc", "XBT", "eth/usd", ""] {
            let once = normalize_symbol(s);
            let twice = normalize_symbol(&once);
            assert_eq!(once, twice, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn equivalent_symbols_matches_aliases() {
        assert!(equivalent_symbols("XBT-USD", "btcusd"));
        assert!(!equivalent_symbols("BTC-USD", "ETH-USD"));
    }

    #[test]
    fn merge_symbol_value_map_sums_collisions() {
        let mut values = HashMap::new();
        values.insert("BTCUSD".to_string(), 10.0);
        values.insert("XBT-USD".to_string(), 5.0);
        let merged = merge_symbol_value_map(&values);
        assert_eq!(merged.get("BTC-USD"), Some(&15.0));
    }
}
