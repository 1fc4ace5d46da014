//! Unit normalization: raw fixed-point protocol amounts into the USD float
//! space every derived field lives in.

use std::collections::HashMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::datasource::MarketState;
use crate::domain::{MarketInfo, UNKNOWN_PAIR};

/// All raw protocol amounts are fixed-point integers with 6 decimals.
const FIXED_POINT_DECIMALS: u32 = 6;

/// Maximum entry-price deviation ratio accepted by pair inference.
///
/// Empirical, tunable. Historical price drift can be large, but a match
/// across unrelated assets must be avoided.
pub const PAIR_INFERENCE_MAX_RATIO: f64 = 5.0;

/// Parse a raw fixed-point amount into whole token units.
pub fn raw_to_units(raw: &str) -> Option<f64> {
    let mut value = Decimal::from_str_exact(raw.trim()).ok()?;
    value.set_scale(value.scale() + FIXED_POINT_DECIMALS).ok()?;
    value.to_f64()
}

/// Per-request price context: the stable collateral symbol, live oracle
/// prices per collateral token, and the market list for pair inference.
#[derive(Debug, Clone, Default)]
pub struct PriceContext {
    stable_symbol: String,
    oracle_prices: HashMap<String, f64>,
    markets: Vec<MarketInfo>,
}

impl PriceContext {
    pub fn new(stable_symbol: &str) -> Self {
        PriceContext {
            stable_symbol: stable_symbol.to_string(),
            oracle_prices: HashMap::new(),
            markets: Vec::new(),
        }
    }

    /// Build from the indexer's market snapshot. The base token of each
    /// market symbol (the part before `/`) is priced by that market's
    /// oracle.
    pub fn from_markets(stable_symbol: &str, markets: &[MarketState]) -> Self {
        let mut ctx = Self::new(stable_symbol);
        for market in markets {
            ctx.markets
                .push(MarketInfo::new(market.symbol.clone(), market.oracle_price));
            if let Some(base) = market.symbol.split('/').next() {
                ctx.oracle_prices
                    .insert(base.to_string(), market.oracle_price);
            }
        }
        ctx
    }

    pub fn with_oracle_price(mut self, token: &str, price: f64) -> Self {
        self.oracle_prices.insert(token.to_string(), price);
        self
    }

    pub fn with_market(mut self, symbol: &str, oracle_price: f64) -> Self {
        self.markets.push(MarketInfo::new(symbol, oracle_price));
        self
    }

    /// Convert a raw fixed-point collateral amount to USD.
    ///
    /// The stable token converts 1:1. Other collateral tokens use the live
    /// oracle price, falling back to `historical_price` (a snapshot from
    /// the trade's close time; a live price misrepresents the P&L of an
    /// already-closed trade). `None` when no conversion rate is known.
    pub fn to_usd(
        &self,
        raw: &str,
        token: Option<&str>,
        historical_price: Option<f64>,
    ) -> Option<f64> {
        let units = raw_to_units(raw)?;
        match token {
            None => Some(units),
            Some(t) if t == self.stable_symbol => Some(units),
            Some(t) => self
                .oracle_prices
                .get(t)
                .copied()
                .or(historical_price)
                .map(|price| units * price),
        }
    }

    /// Infer the market symbol from an entry price when the market relation
    /// is unavailable: closest oracle price by ratio, rejecting anything
    /// beyond [`PAIR_INFERENCE_MAX_RATIO`].
    pub fn infer_pair(&self, entry_price: f64) -> String {
        if entry_price <= 0.0 {
            return UNKNOWN_PAIR.to_string();
        }

        let mut best: Option<(&MarketInfo, f64)> = None;
        for market in &self.markets {
            if market.oracle_price <= 0.0 {
                continue;
            }
            let ratio = (market.oracle_price / entry_price).max(entry_price / market.oracle_price);
            match best {
                Some((_, best_ratio)) if ratio >= best_ratio => {}
                _ => best = Some((market, ratio)),
            }
        }

        match best {
            Some((market, ratio)) if ratio <= PAIR_INFERENCE_MAX_RATIO => market.symbol.clone(),
            _ => UNKNOWN_PAIR.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PriceContext {
        PriceContext::new("USDC")
            .with_oracle_price("ATOM", 8.0)
            .with_market("BTC/USD", 60000.0)
            .with_market("ATOM/USD", 8.0)
            .with_market("ETH/USD", 3000.0)
    }

    #[test]
    fn test_raw_to_units_six_decimals() {
        assert_eq!(raw_to_units("100000000"), Some(100.0));
        assert_eq!(raw_to_units("1"), Some(0.000001));
        assert_eq!(raw_to_units("0"), Some(0.0));
        assert_eq!(raw_to_units("garbage"), None);
    }

    #[test]
    fn test_to_usd_stable_token() {
        assert_eq!(ctx().to_usd("100000000", Some("USDC"), None), Some(100.0));
        assert_eq!(ctx().to_usd("100000000", None, None), Some(100.0));
    }

    #[test]
    fn test_to_usd_oracle_conversion() {
        // 12.5 ATOM at $8.
        assert_eq!(ctx().to_usd("12500000", Some("ATOM"), None), Some(100.0));
    }

    #[test]
    fn test_to_usd_historical_fallback() {
        let value = ctx().to_usd("2000000", Some("OSMO"), Some(0.5));
        assert_eq!(value, Some(1.0));
    }

    #[test]
    fn test_to_usd_unknown_token_without_fallback() {
        assert_eq!(ctx().to_usd("2000000", Some("OSMO"), None), None);
    }

    #[test]
    fn test_infer_pair_closest_match() {
        assert_eq!(ctx().infer_pair(7.5), "ATOM/USD");
        assert_eq!(ctx().infer_pair(58000.0), "BTC/USD");
    }

    #[test]
    fn test_infer_pair_rejects_beyond_tolerance() {
        // 500 is 6x away from ETH's 3000 and worse for everything else.
        assert_eq!(ctx().infer_pair(500.0), UNKNOWN_PAIR);
    }

    #[test]
    fn test_infer_pair_accepts_drifted_price() {
        // Within the 5x band of ETH.
        assert_eq!(ctx().infer_pair(1000.0), "ETH/USD");
    }

    #[test]
    fn test_infer_pair_nonpositive_entry() {
        assert_eq!(ctx().infer_pair(0.0), UNKNOWN_PAIR);
        assert_eq!(ctx().infer_pair(-1.0), UNKNOWN_PAIR);
    }

    #[test]
    fn test_infer_pair_no_markets() {
        let empty = PriceContext::new("USDC");
        assert_eq!(empty.infer_pair(100.0), UNKNOWN_PAIR);
    }
}
