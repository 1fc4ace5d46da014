use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{parse_network, validate_address, AppState};
use crate::codec;
use crate::datasource::IndexedTrade;
use crate::domain::{derive_mark_price, OpenPosition, TradeId, UNKNOWN_PAIR};
use crate::engine::PriceContext;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsQuery {
    pub address: String,
    pub network: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsResponse {
    pub address: String,
    pub positions: Vec<OpenPosition>,
    pub total_positions: usize,
    pub total_unrealized_pnl: f64,
}

pub async fn get_positions(
    Query(params): Query<PositionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<PositionsResponse>, AppError> {
    let network = parse_network(&params.network)?;
    let address = validate_address(&params.address)?;
    let source = state.source(network)?.clone();

    let trader = codec::to_bech32(address, &state.config.bech32_prefix)
        .map_err(|e| AppError::BadRequest(format!("Invalid address: {}", e)))?;

    let (trades_res, markets_res) = tokio::join!(
        source.indexer.fetch_trades(&trader),
        source.indexer.fetch_markets(),
    );

    let trades = trades_res.map_err(|e| {
        warn!(error = %e, "point-in-time trade query failed");
        AppError::Upstream
    })?;
    let markets = markets_res.unwrap_or_else(|e| {
        warn!(error = %e, "market query failed, proceeding without oracle prices");
        Vec::new()
    });
    let ctx = PriceContext::from_markets(&state.config.stable_symbol, &markets);

    let positions: Vec<OpenPosition> = trades
        .iter()
        .filter(|trade| trade.is_open)
        .map(|trade| project_position(trade, &ctx))
        .collect();

    let total_unrealized_pnl = positions
        .iter()
        .filter_map(|position| position.unrealized_pnl_usd)
        .sum();

    Ok(Json(PositionsResponse {
        address: address.to_string(),
        total_positions: positions.len(),
        total_unrealized_pnl,
        positions,
    }))
}

fn project_position(trade: &IndexedTrade, ctx: &PriceContext) -> OpenPosition {
    let collateral_usd = trade
        .collateral_raw
        .as_deref()
        .and_then(|raw| ctx.to_usd(raw, trade.collateral_token.as_deref(), None));
    let unrealized_pnl_usd = match (collateral_usd, trade.unrealized_pnl_pct) {
        (Some(collateral), Some(pct)) => Some(collateral * pct),
        _ => None,
    };

    let pair = match &trade.market_symbol {
        Some(symbol) => symbol.clone(),
        None => trade
            .open_price
            .map(|price| ctx.infer_pair(price))
            .unwrap_or_else(|| UNKNOWN_PAIR.to_string()),
    };

    let direction = trade.long.map(crate::domain::Direction::from_long_flag);
    let mark_price = match (trade.open_price, trade.unrealized_pnl_pct, trade.leverage, direction) {
        (Some(entry), Some(pct), Some(leverage), Some(direction)) => {
            derive_mark_price(entry, pct, leverage, direction)
        }
        _ => None,
    };

    OpenPosition {
        id: TradeId::Indexed(trade.id),
        pair,
        direction,
        leverage: trade.leverage,
        collateral_usd,
        entry_price: trade.open_price,
        mark_price,
        liquidation_price: trade.liquidation_price,
        stop_loss: trade.stop_loss,
        take_profit: trade.take_profit,
        unrealized_pnl_usd,
        unrealized_pnl_pct: trade.unrealized_pnl_pct,
        opened_at: trade.opened_at,
    }
}
