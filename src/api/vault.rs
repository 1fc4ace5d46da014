use std::collections::VecDeque;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{parse_network, validate_address, AppState};
use crate::codec;
use crate::datasource::VaultAction;
use crate::domain::VaultPosition;
use crate::engine::raw_to_units;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultPositionsQuery {
    pub address: String,
    pub network: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultPositionsResponse {
    pub address: String,
    pub positions: Vec<VaultPosition>,
    pub total_deposited: f64,
    pub total_current_value: f64,
    pub total_earnings: f64,
}

pub async fn get_vault_positions(
    Query(params): Query<VaultPositionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<VaultPositionsResponse>, AppError> {
    let network = parse_network(&params.network)?;
    let address = validate_address(&params.address)?;
    let source = state.source(network)?.clone();

    let trader = codec::to_bech32(address, &state.config.bech32_prefix)
        .map_err(|e| AppError::BadRequest(format!("Invalid address: {}", e)))?;

    let actions = source
        .indexer
        .fetch_vault_actions(&trader)
        .await
        .map_err(|e| {
            warn!(error = %e, "vault action query failed");
            AppError::Upstream
        })?;

    let positions = build_positions(&actions, state.config.vault_apy, Utc::now());

    let total_deposited = positions.iter().map(|p| p.deposit_amount_usd).sum();
    let total_current_value = positions.iter().map(|p| p.current_value_usd).sum();
    let total_earnings = positions.iter().map(|p| p.earnings_usd).sum();

    Ok(Json(VaultPositionsResponse {
        address: address.to_string(),
        positions,
        total_deposited,
        total_current_value,
        total_earnings,
    }))
}

struct OutstandingDeposit {
    shares: f64,
    amount_usd: f64,
    deposited_at: DateTime<Utc>,
}

/// Replay the deposit/withdraw stream into the outstanding deposits.
/// Withdrawals consume shares oldest-first; a partial withdrawal shrinks
/// the deposit's remaining amount proportionally.
fn build_positions(actions: &[VaultAction], apy: f64, now: DateTime<Utc>) -> Vec<VaultPosition> {
    let mut sorted: Vec<&VaultAction> = actions.iter().collect();
    sorted.sort_by_key(|action| action.timestamp);

    let mut outstanding: VecDeque<OutstandingDeposit> = VecDeque::new();
    for action in sorted {
        match action.action.as_str() {
            "deposit" => {
                let Some(amount_usd) = action.amount_raw.as_deref().and_then(raw_to_units) else {
                    warn!("vault deposit without a parseable amount, skipping");
                    continue;
                };
                outstanding.push_back(OutstandingDeposit {
                    shares: action.shares,
                    amount_usd,
                    deposited_at: action.timestamp,
                });
            }
            "withdraw" => {
                let mut to_consume = action.shares;
                while to_consume > 0.0 {
                    let Some(front) = outstanding.front_mut() else {
                        break;
                    };
                    if front.shares <= to_consume {
                        to_consume -= front.shares;
                        outstanding.pop_front();
                    } else {
                        let ratio = to_consume / front.shares;
                        front.amount_usd *= 1.0 - ratio;
                        front.shares -= to_consume;
                        to_consume = 0.0;
                    }
                }
            }
            other => warn!(action = other, "unknown vault action, skipping"),
        }
    }

    outstanding
        .into_iter()
        .map(|deposit| {
            VaultPosition::estimate(
                deposit.shares,
                deposit.amount_usd,
                deposit.deposited_at,
                apy,
                now,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_740_000_000 + secs, 0).unwrap()
    }

    fn action(kind: &str, shares: f64, amount: Option<&str>, secs: i64) -> VaultAction {
        VaultAction {
            action: kind.to_string(),
            shares,
            amount_raw: amount.map(str::to_string),
            timestamp: ts(secs),
        }
    }

    #[test]
    fn test_deposits_without_withdrawals() {
        let actions = vec![
            action("deposit", 10.0, Some("1000000000"), 0),
            action("deposit", 5.0, Some("500000000"), 100),
        ];
        let positions = build_positions(&actions, 0.10, ts(200));
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].deposit_amount_usd, 1000.0);
        assert_eq!(positions[1].deposit_amount_usd, 500.0);
    }

    #[test]
    fn test_full_withdrawal_removes_oldest_deposit() {
        let actions = vec![
            action("deposit", 10.0, Some("1000000000"), 0),
            action("deposit", 5.0, Some("500000000"), 100),
            action("withdraw", 10.0, None, 200),
        ];
        let positions = build_positions(&actions, 0.10, ts(300));
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].shares, 5.0);
    }

    #[test]
    fn test_partial_withdrawal_shrinks_proportionally() {
        let actions = vec![
            action("deposit", 10.0, Some("1000000000"), 0),
            action("withdraw", 4.0, None, 100),
        ];
        let positions = build_positions(&actions, 0.10, ts(100));
        assert_eq!(positions.len(), 1);
        assert!((positions[0].shares - 6.0).abs() < 1e-9);
        assert!((positions[0].deposit_amount_usd - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_withdrawal_spanning_deposits() {
        let actions = vec![
            action("deposit", 10.0, Some("1000000000"), 0),
            action("deposit", 10.0, Some("1000000000"), 50),
            action("withdraw", 15.0, None, 100),
        ];
        let positions = build_positions(&actions, 0.10, ts(100));
        assert_eq!(positions.len(), 1);
        assert!((positions[0].shares - 5.0).abs() < 1e-9);
        assert!((positions[0].deposit_amount_usd - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_over_withdrawal_empties_cleanly() {
        let actions = vec![
            action("deposit", 10.0, Some("1000000000"), 0),
            action("withdraw", 50.0, None, 100),
        ];
        let positions = build_positions(&actions, 0.10, ts(100));
        assert!(positions.is_empty());
    }
}
