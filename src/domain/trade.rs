//! The reconstructed trade record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Direction, LifecycleState, PnlSource, TradeId};

/// Placeholder pair symbol when the market relation could not be resolved.
pub const UNKNOWN_PAIR: &str = "Unknown";

/// One reconstructed trade.
///
/// Every derived numeric is `Option<f64>` in USD space: `None` means the
/// value could not be determined from any source, which is distinct from
/// zero and must stay distinct all the way to the response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: TradeId,
    pub pair: String,
    pub state: LifecycleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leverage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collateral_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl_source: Option<PnlSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl_amount_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opening_fee_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closing_fee_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub borrowing_fee_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_fee_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_fees_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_received_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Trade {
    /// A fresh open trade with nothing but its identity resolved.
    pub fn new(id: TradeId) -> Self {
        Trade {
            id,
            pair: UNKNOWN_PAIR.to_string(),
            state: LifecycleState::Open,
            direction: None,
            leverage: None,
            collateral_usd: None,
            open_price: None,
            close_price: None,
            profit_pct: None,
            pnl_source: None,
            pnl_amount_usd: None,
            opening_fee_usd: None,
            closing_fee_usd: None,
            borrowing_fee_usd: None,
            trigger_fee_usd: None,
            total_fees_usd: None,
            amount_received_usd: None,
            opened_at: None,
            closed_at: None,
        }
    }

    /// Most recent activity instant, used for output ordering.
    pub fn activity_time(&self) -> Option<DateTime<Utc>> {
        self.closed_at.or(self.opened_at)
    }

    /// Sum of whichever fee components resolved. `None` when none did, so an
    /// unresolved fee never reads as a zero fee.
    pub fn resolved_fee_total(&self) -> Option<f64> {
        let components = [
            self.opening_fee_usd,
            self.closing_fee_usd,
            self.borrowing_fee_usd,
            self.trigger_fee_usd,
        ];
        let mut total = None;
        for component in components.into_iter().flatten() {
            total = Some(total.unwrap_or(0.0) + component);
        }
        total
    }

    /// Fill in the fields derivable from what is already known:
    /// `amount_received = collateral + pnl` (and its rearrangements) plus the
    /// fee total. Existing values are never overwritten.
    pub fn derive_missing(&mut self) {
        if self.pnl_amount_usd.is_none() {
            if let (Some(collateral), Some(pct)) = (self.collateral_usd, self.profit_pct) {
                self.pnl_amount_usd = Some(collateral * pct);
            }
        }
        if self.amount_received_usd.is_none() {
            if let (Some(collateral), Some(pnl)) = (self.collateral_usd, self.pnl_amount_usd) {
                self.amount_received_usd = Some(collateral + pnl);
            }
        }
        if self.pnl_amount_usd.is_none() {
            if let (Some(received), Some(collateral)) =
                (self.amount_received_usd, self.collateral_usd)
            {
                self.pnl_amount_usd = Some(received - collateral);
            }
        }
        if self.total_fees_usd.is_none() {
            self.total_fees_usd = self.resolved_fee_total();
        }
    }
}
