use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{parse_network, validate_address, AppState};
use crate::codec;
use crate::datasource::scan_for_trader;
use crate::domain::{Trade, TradeId};
use crate::engine::{compute_stats, reconcile, resolve_fees, AdapterOutputs, FeeLookup, PriceContext};
use crate::error::AppError;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradesQuery {
    pub address: String,
    pub network: String,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradesResponse {
    pub address: String,
    pub trades: Vec<Trade>,
    pub total_pnl: f64,
    pub win_rate: f64,
    pub total_trades: usize,
    pub explorer: String,
}

pub async fn get_trades(
    Query(params): Query<TradesQuery>,
    State(state): State<AppState>,
) -> Result<Json<TradesResponse>, AppError> {
    let network = parse_network(&params.network)?;
    let address = validate_address(&params.address)?;
    let source = state.source(network)?.clone();

    let trader = codec::to_bech32(address, &state.config.bech32_prefix)
        .map_err(|e| AppError::BadRequest(format!("Invalid address: {}", e)))?;

    let (trades_res, history_res, markets_res) = tokio::join!(
        source.indexer.fetch_trades(&trader),
        source.indexer.fetch_trade_history(&trader),
        source.indexer.fetch_markets(),
    );

    let markets = markets_res.unwrap_or_else(|e| {
        warn!(error = %e, "market query failed, proceeding without oracle prices");
        Vec::new()
    });
    let ctx = PriceContext::from_markets(&state.config.stable_symbol, &markets);

    let mut outputs = AdapterOutputs::default();
    let mut structured_ok = false;
    match trades_res {
        Ok(trades) => {
            outputs.trades = trades;
            structured_ok = true;
        }
        Err(e) => warn!(error = %e, "point-in-time trade query failed"),
    }
    match history_res {
        Ok(history) => {
            outputs.history = history;
            structured_ok = true;
        }
        Err(e) => warn!(error = %e, "trade history query failed"),
    }

    if !structured_ok {
        // Structured source is gone entirely; reconstruct from raw logs.
        match scan_for_trader(
            source.rpc.as_ref(),
            &source.endpoints.protocol_address,
            address,
            state.config.lookback_blocks,
        )
        .await
        {
            Ok(events) => outputs.events = events,
            Err(e) => {
                warn!(error = %e, "log scan failed");
                return Err(AppError::Upstream);
            }
        }
    }

    let lookups: Vec<FeeLookup> = match source.indexer.fetch_fee_transactions(&trader).await {
        Ok(fee_txs) => fee_txs
            .into_iter()
            .map(|fee_tx| FeeLookup {
                trade_id: TradeId::Indexed(fee_tx.trade_id),
                tx_hash: fee_tx.tx_hash,
                is_opening: fee_tx.is_opening,
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, "fee transaction query failed, fees stay unknown");
            Vec::new()
        }
    };
    let fees = resolve_fees(source.rpc.as_ref(), &ctx, &lookups).await;

    let trades = reconcile(&outputs, &fees, &ctx);
    let stats = compute_stats(&trades);

    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let offset = params.offset.unwrap_or(0);
    let page: Vec<Trade> = trades.into_iter().skip(offset).take(limit).collect();

    Ok(Json(TradesResponse {
        address: address.to_string(),
        trades: page,
        total_pnl: stats.total_pnl_usd,
        win_rate: stats.win_rate,
        total_trades: stats.total_trades,
        explorer: source.endpoints.explorer_url.clone(),
    }))
}
