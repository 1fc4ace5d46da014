//! Ephemeral market metadata snapshot.

use serde::{Deserialize, Serialize};

/// Market symbol plus its oracle price at fetch time. Used for pair
/// inference and USD conversion within one request, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarketInfo {
    pub symbol: String,
    pub oracle_price: f64,
}

impl MarketInfo {
    pub fn new(symbol: impl Into<String>, oracle_price: f64) -> Self {
        MarketInfo {
            symbol: symbol.into(),
            oracle_price,
        }
    }
}
