//! Live-state projections: open perpetual positions and vault deposits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Direction, TradeId};

/// Projection of an OPEN trade into its live position view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenPosition {
    pub id: TradeId,
    pub pair: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leverage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collateral_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_price: Option<f64>,
    /// Derived from entry price and unrealized P&L percent, never fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mark_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liquidation_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unrealized_pnl_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unrealized_pnl_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
}

/// Back out the mark price from the entry price and the unrealized P&L
/// percent. The price move is the P&L percent deleveraged; shorts profit
/// from a falling price.
pub fn derive_mark_price(
    entry_price: f64,
    unrealized_pnl_pct: f64,
    leverage: f64,
    direction: Direction,
) -> Option<f64> {
    if leverage <= 0.0 {
        return None;
    }
    let price_move = unrealized_pnl_pct / leverage;
    let mark = match direction {
        Direction::Long => entry_price * (1.0 + price_move),
        Direction::Short => entry_price * (1.0 - price_move),
    };
    Some(mark)
}

/// A liquidity-vault deposit lifecycle.
///
/// Earnings are an APY-accrual estimate over the deposit's age, not an
/// observed on-chain quantity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VaultPosition {
    pub shares: f64,
    pub deposit_amount_usd: f64,
    pub current_value_usd: f64,
    pub earnings_usd: f64,
    pub deposited_at: DateTime<Utc>,
}

impl VaultPosition {
    /// Estimate the position's current value by accruing `apy` linearly over
    /// the time since deposit.
    pub fn estimate(
        shares: f64,
        deposit_amount_usd: f64,
        deposited_at: DateTime<Utc>,
        apy: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let elapsed_secs = (now - deposited_at).num_seconds().max(0) as f64;
        let years = elapsed_secs / (365.25 * 24.0 * 3600.0);
        let earnings_usd = deposit_amount_usd * apy * years;
        VaultPosition {
            shares,
            deposit_amount_usd,
            current_value_usd: deposit_amount_usd + earnings_usd,
            earnings_usd,
            deposited_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_derive_mark_price_long() {
        // +10% P&L at 5x leverage = +2% price move.
        let mark = derive_mark_price(100.0, 0.10, 5.0, Direction::Long).unwrap();
        assert!((mark - 102.0).abs() < 1e-9);
    }

    #[test]
    fn test_derive_mark_price_short() {
        let mark = derive_mark_price(100.0, 0.10, 5.0, Direction::Short).unwrap();
        assert!((mark - 98.0).abs() < 1e-9);
    }

    #[test]
    fn test_derive_mark_price_rejects_bad_leverage() {
        assert_eq!(derive_mark_price(100.0, 0.10, 0.0, Direction::Long), None);
    }

    #[test]
    fn test_vault_accrual_one_year() {
        let deposited_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = deposited_at + chrono::Duration::days(365) + chrono::Duration::hours(6);
        let pos = VaultPosition::estimate(10.0, 1000.0, deposited_at, 0.08, now);

        assert!((pos.earnings_usd - 80.0).abs() < 0.1);
        assert!((pos.current_value_usd - 1080.0).abs() < 0.1);
    }

    #[test]
    fn test_vault_accrual_clamps_future_deposit() {
        let deposited_at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let pos = VaultPosition::estimate(1.0, 500.0, deposited_at, 0.08, now);
        assert_eq!(pos.earnings_usd, 0.0);
        assert_eq!(pos.current_value_usd, 500.0);
    }
}
