//! Aggregate statistics over a reconciled trade list.

use serde::Serialize;

use crate::datasource::TradeAction;
use crate::domain::{EventKind, Trade};
use crate::engine::normalize::raw_to_units;

/// Aggregates for one trader's reconciled history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeStats {
    pub total_pnl_pct: f64,
    pub total_pnl_usd: f64,
    pub win_rate: f64,
    pub total_trades: usize,
    pub total_volume_usd: f64,
    pub fees_paid_usd: f64,
}

/// Compute aggregates over a reconciled list.
///
/// Only CLOSED trades with a defined profit percent enter the win-rate
/// denominator: a trade whose P&L could not be determined is excluded, not
/// counted as a loss. An empty denominator yields 0, never NaN.
pub fn compute_stats(trades: &[Trade]) -> TradeStats {
    let mut stats = TradeStats {
        total_trades: trades.len(),
        ..Default::default()
    };

    let mut decided = 0usize;
    let mut wins = 0usize;

    for trade in trades {
        if trade.state.is_closed() {
            if let Some(pct) = trade.profit_pct {
                decided += 1;
                if pct > 0.0 {
                    wins += 1;
                }
                stats.total_pnl_pct += pct;
            }
            if let Some(pnl) = trade.pnl_amount_usd {
                stats.total_pnl_usd += pnl;
            }
        }
        if let (Some(collateral), Some(leverage)) = (trade.collateral_usd, trade.leverage) {
            stats.total_volume_usd += collateral * leverage;
        }
        if let Some(fees) = trade.total_fees_usd {
            stats.fees_paid_usd += fees;
        }
    }

    if decided > 0 {
        stats.win_rate = wins as f64 / decided as f64;
    }
    stats
}

/// Notional volume of a change-log slice: collateral times leverage for
/// every open or close transition. Input to the protocol-wide cached
/// aggregate; this stream covers all traders and is expensive to pull.
pub fn notional_volume(actions: &[TradeAction]) -> f64 {
    actions
        .iter()
        .filter(|action| {
            let kind = EventKind::from_name(&action.action);
            kind.opens_trade() || kind.closes_trade()
        })
        .filter_map(|action| {
            let units = raw_to_units(action.collateral_raw.as_deref()?)?;
            Some(units * action.leverage.unwrap_or(1.0))
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LifecycleState, TradeId};

    fn closed(pct: Option<f64>, pnl: Option<f64>) -> Trade {
        let mut trade = Trade::new(TradeId::Indexed(0));
        trade.state = LifecycleState::Closed;
        trade.profit_pct = pct;
        trade.pnl_amount_usd = pnl;
        trade
    }

    #[test]
    fn test_win_rate_excludes_undecided() {
        let trades = vec![
            closed(Some(0.1), Some(10.0)),
            closed(Some(-0.2), Some(-20.0)),
            closed(None, None), // P&L unknown: out of the denominator
        ];
        let stats = compute_stats(&trades);
        assert!((stats.win_rate - 0.5).abs() < 1e-9);
        assert_eq!(stats.total_trades, 3);
        assert!((stats.total_pnl_pct - (-0.1)).abs() < 1e-9);
        assert!((stats.total_pnl_usd - (-10.0)).abs() < 1e-9);
    }

    #[test]
    fn test_win_rate_zero_over_zero_is_zero() {
        let stats = compute_stats(&[closed(None, None)]);
        assert_eq!(stats.win_rate, 0.0);
        assert!(!stats.win_rate.is_nan());

        let stats = compute_stats(&[]);
        assert_eq!(stats.win_rate, 0.0);
    }

    #[test]
    fn test_win_rate_bounds() {
        let all_wins = compute_stats(&[closed(Some(0.1), None), closed(Some(0.2), None)]);
        assert_eq!(all_wins.win_rate, 1.0);

        let all_losses = compute_stats(&[closed(Some(-0.1), None)]);
        assert_eq!(all_losses.win_rate, 0.0);
    }

    #[test]
    fn test_open_trades_do_not_enter_pnl_totals() {
        let mut open = Trade::new(TradeId::Indexed(1));
        open.profit_pct = Some(0.5);
        open.pnl_amount_usd = Some(50.0);
        let stats = compute_stats(&[open]);
        assert_eq!(stats.total_pnl_pct, 0.0);
        assert_eq!(stats.total_pnl_usd, 0.0);
        assert_eq!(stats.win_rate, 0.0);
    }

    #[test]
    fn test_volume_and_fees() {
        let mut trade = closed(Some(0.1), Some(10.0));
        trade.collateral_usd = Some(100.0);
        trade.leverage = Some(5.0);
        trade.total_fees_usd = Some(2.5);
        let stats = compute_stats(&[trade]);
        assert_eq!(stats.total_volume_usd, 500.0);
        assert_eq!(stats.fees_paid_usd, 2.5);
    }

    #[test]
    fn test_notional_volume_counts_lifecycle_actions_only() {
        let actions = vec![
            TradeAction {
                trade_id: 1,
                action: "open_trade".to_string(),
                collateral_raw: Some("100000000".to_string()),
                leverage: Some(10.0),
                ..Default::default()
            },
            TradeAction {
                trade_id: 2,
                action: "close_trade".to_string(),
                collateral_raw: Some("50000000".to_string()),
                leverage: None,
                ..Default::default()
            },
            TradeAction {
                trade_id: 3,
                action: "collateral_topup".to_string(),
                collateral_raw: Some("999000000".to_string()),
                leverage: Some(2.0),
                ..Default::default()
            },
        ];
        // 100 * 10 + 50 * 1; the unknown action kind is ignored.
        assert!((notional_volume(&actions) - 1050.0).abs() < 1e-9);
    }
}
