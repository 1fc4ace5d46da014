use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{parse_network, AppState};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub network: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_volume_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_last_refreshed: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_interest_long_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_interest_short_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_interest_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vault_tvl_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vault_total_shares: Option<f64>,
}

pub async fn get_stats(
    Query(params): Query<StatsQuery>,
    State(state): State<AppState>,
) -> Result<Json<StatsResponse>, AppError> {
    let network = parse_network(&params.network)?;
    let source = state.source(network)?.clone();

    let (markets_res, vault_res) = tokio::join!(
        source.indexer.fetch_markets(),
        source.indexer.fetch_vault_state(),
    );
    let volume = state
        .volume_cache
        .get_or_refresh(network, source.indexer.as_ref())
        .await;

    let markets = match markets_res {
        Ok(markets) => Some(markets),
        Err(e) => {
            warn!(error = %e, "market query failed");
            None
        }
    };
    let vault = match vault_res {
        Ok(vault) => vault,
        Err(e) => {
            warn!(error = %e, "vault state query failed");
            None
        }
    };

    if volume.is_none() && markets.is_none() && vault.is_none() {
        return Err(AppError::Upstream);
    }

    let (oi_long, oi_short) = markets
        .map(|markets| {
            markets.iter().fold((0.0, 0.0), |(long, short), market| {
                (
                    long + market.open_interest_long_usd.unwrap_or(0.0),
                    short + market.open_interest_short_usd.unwrap_or(0.0),
                )
            })
        })
        .map(|(long, short)| (Some(long), Some(short)))
        .unwrap_or((None, None));

    Ok(Json(StatsResponse {
        network: network.to_string(),
        total_volume_usd: volume.map(|snapshot| snapshot.volume_usd),
        volume_last_refreshed: volume.map(|snapshot| snapshot.last_refreshed),
        open_interest_long_usd: oi_long,
        open_interest_short_usd: oi_short,
        open_interest_usd: match (oi_long, oi_short) {
            (Some(long), Some(short)) => Some(long + short),
            _ => None,
        },
        vault_tvl_usd: vault.as_ref().map(|vault| vault.tvl_usd),
        vault_total_shares: vault.as_ref().map(|vault| vault.total_shares),
    }))
}
