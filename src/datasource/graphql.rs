//! Structured-query adapter over the protocol's GraphQL indexer.

use std::time::Duration;

use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{
    DataSourceError, FeeTransaction, IndexedTrade, IndexerApi, MarketState, TradeAction,
    VaultAction, VaultState,
};

/// Point-in-time trade query, including the optional nested market
/// relation. Fails for traders holding positions on orphaned markets.
const TRADES_QUERY: &str = r#"
query Trades($trader: String!) {
  trades(where: { trader: $trader }) {
    id
    leverage
    long
    collateral
    collateralToken
    openPrice
    isOpen
    stopLoss
    takeProfit
    liquidationPrice
    unrealizedPnlPct
    openedAt
    market { symbol oraclePrice }
  }
}"#;

/// Reduced fallback without the market relation.
const TRADES_QUERY_REDUCED: &str = r#"
query Trades($trader: String!) {
  trades(where: { trader: $trader }) {
    id
    leverage
    long
    collateral
    collateralToken
    openPrice
    isOpen
    stopLoss
    takeProfit
    liquidationPrice
    unrealizedPnlPct
    openedAt
  }
}"#;

const TRADE_HISTORY_QUERY: &str = r#"
query TradeHistory($trader: String!) {
  tradeActions(where: { trader: $trader }, orderBy: timestamp, orderDirection: desc) {
    tradeId
    action
    price
    profitPct
    collateral
    collateralToken
    collateralPrice
    leverage
    long
    amountReceived
    marketSymbol
    txHash
    timestamp
  }
}"#;

const FEE_TRANSACTIONS_QUERY: &str = r#"
query FeeTransactions($trader: String!) {
  feeTransactions(where: { trader: $trader }) {
    tradeId
    txHash
    isOpening
  }
}"#;

const MARKETS_QUERY: &str = r#"
query Markets {
  markets {
    symbol
    oraclePrice
    openInterestLong
    openInterestShort
  }
}"#;

const VAULT_ACTIONS_QUERY: &str = r#"
query VaultActions($trader: String!) {
  vaultActions(where: { trader: $trader }, orderBy: timestamp, orderDirection: asc) {
    action
    shares
    amount
    timestamp
  }
}"#;

const VAULT_STATE_QUERY: &str = r#"
query VaultState {
  vaultState {
    tvl
    totalShares
  }
}"#;

const GLOBAL_HISTORY_QUERY: &str = r#"
query GlobalHistory($limit: Int!) {
  tradeActions(first: $limit, orderBy: timestamp, orderDirection: desc) {
    tradeId
    action
    collateral
    leverage
    timestamp
  }
}"#;

/// GraphQL indexer client.
#[derive(Debug, Clone)]
pub struct GraphqlIndexer {
    client: Client,
    url: String,
}

impl GraphqlIndexer {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }

    async fn post_query(&self, query: &str, variables: Value) -> Result<Value, DataSourceError> {
        let payload = json!({ "query": query, "variables": variables });
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(20)),
            ..Default::default()
        };

        let body = retry(backoff, || async {
            let response = self
                .client
                .post(&self.url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(DataSourceError::Network(e.to_string())))?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(DataSourceError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(DataSourceError::Http {
                    status: status.as_u16(),
                    message: "server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(DataSourceError::Http {
                    status: status.as_u16(),
                    message: "client error".to_string(),
                }));
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| backoff::Error::permanent(DataSourceError::Parse(e.to_string())))
        })
        .await?;

        if let Some(errors) = body.get("errors").filter(|e| !e.is_null()) {
            return Err(DataSourceError::Query(errors.to_string()));
        }
        body.get("data")
            .cloned()
            .ok_or_else(|| DataSourceError::Parse("missing data field".to_string()))
    }

    fn rows<'a>(data: &'a Value, key: &str) -> Result<&'a Vec<Value>, DataSourceError> {
        data.get(key)
            .and_then(|v| v.as_array())
            .ok_or_else(|| DataSourceError::Parse(format!("expected {} array", key)))
    }
}

#[async_trait]
impl IndexerApi for GraphqlIndexer {
    async fn fetch_trades(&self, trader: &str) -> Result<Vec<IndexedTrade>, DataSourceError> {
        debug!(trader, "fetching point-in-time trades");
        let variables = json!({ "trader": trader });

        let data = match self.post_query(TRADES_QUERY, variables.clone()).await {
            Ok(data) => data,
            Err(e) => {
                // The nested market relation is null for orphaned markets
                // and some indexer versions reject the whole query for it.
                warn!(error = %e, "full trade query failed, retrying reduced");
                self.post_query(TRADES_QUERY_REDUCED, variables).await?
            }
        };

        let mut trades = Vec::new();
        for row in Self::rows(&data, "trades")? {
            match parse_trade_row(row) {
                Some(trade) => trades.push(trade),
                None => warn!("skipping malformed trade row"),
            }
        }
        Ok(trades)
    }

    async fn fetch_trade_history(
        &self,
        trader: &str,
    ) -> Result<Vec<TradeAction>, DataSourceError> {
        debug!(trader, "fetching trade history");
        let data = self
            .post_query(TRADE_HISTORY_QUERY, json!({ "trader": trader }))
            .await?;

        let mut actions = Vec::new();
        for row in Self::rows(&data, "tradeActions")? {
            match parse_action_row(row) {
                Some(action) => actions.push(action),
                None => warn!("skipping malformed trade action row"),
            }
        }
        Ok(actions)
    }

    async fn fetch_fee_transactions(
        &self,
        trader: &str,
    ) -> Result<Vec<FeeTransaction>, DataSourceError> {
        let data = self
            .post_query(FEE_TRANSACTIONS_QUERY, json!({ "trader": trader }))
            .await?;

        let mut fee_txs = Vec::new();
        for row in Self::rows(&data, "feeTransactions")? {
            let parsed = (|| {
                Some(FeeTransaction {
                    trade_id: get_i64(row, "tradeId")?,
                    tx_hash: row.get("txHash")?.as_str()?.to_string(),
                    is_opening: row.get("isOpening")?.as_bool()?,
                })
            })();
            match parsed {
                Some(fee_tx) => fee_txs.push(fee_tx),
                None => warn!("skipping malformed fee transaction row"),
            }
        }
        Ok(fee_txs)
    }

    async fn fetch_markets(&self) -> Result<Vec<MarketState>, DataSourceError> {
        let data = self.post_query(MARKETS_QUERY, json!({})).await?;

        let mut markets = Vec::new();
        for row in Self::rows(&data, "markets")? {
            let parsed = (|| {
                Some(MarketState {
                    symbol: row.get("symbol")?.as_str()?.to_string(),
                    oracle_price: get_f64(row, "oraclePrice")?,
                    open_interest_long_usd: get_f64(row, "openInterestLong"),
                    open_interest_short_usd: get_f64(row, "openInterestShort"),
                })
            })();
            match parsed {
                Some(market) => markets.push(market),
                None => warn!("skipping malformed market row"),
            }
        }
        Ok(markets)
    }

    async fn fetch_vault_actions(
        &self,
        trader: &str,
    ) -> Result<Vec<VaultAction>, DataSourceError> {
        let data = self
            .post_query(VAULT_ACTIONS_QUERY, json!({ "trader": trader }))
            .await?;

        let mut actions = Vec::new();
        for row in Self::rows(&data, "vaultActions")? {
            let parsed = (|| {
                Some(VaultAction {
                    action: row.get("action")?.as_str()?.to_string(),
                    shares: get_f64(row, "shares")?,
                    amount_raw: get_raw(row, "amount"),
                    timestamp: get_timestamp(row, "timestamp")?,
                })
            })();
            match parsed {
                Some(action) => actions.push(action),
                None => warn!("skipping malformed vault action row"),
            }
        }
        Ok(actions)
    }

    async fn fetch_vault_state(&self) -> Result<Option<VaultState>, DataSourceError> {
        let data = self.post_query(VAULT_STATE_QUERY, json!({})).await?;
        let Some(row) = data.get("vaultState").filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        Ok(Some(VaultState {
            tvl_usd: get_f64(row, "tvl").unwrap_or(0.0),
            total_shares: get_f64(row, "totalShares").unwrap_or(0.0),
        }))
    }

    async fn fetch_global_history(
        &self,
        limit: i64,
    ) -> Result<Vec<TradeAction>, DataSourceError> {
        let data = self
            .post_query(GLOBAL_HISTORY_QUERY, json!({ "limit": limit }))
            .await?;

        let mut actions = Vec::new();
        for row in Self::rows(&data, "tradeActions")? {
            match parse_action_row(row) {
                Some(action) => actions.push(action),
                None => warn!("skipping malformed global action row"),
            }
        }
        Ok(actions)
    }
}

fn parse_trade_row(row: &Value) -> Option<IndexedTrade> {
    let market = row.get("market").filter(|m| !m.is_null());
    Some(IndexedTrade {
        id: get_i64(row, "id")?,
        market_symbol: market
            .and_then(|m| m.get("symbol"))
            .and_then(|s| s.as_str())
            .map(str::to_string),
        leverage: get_f64(row, "leverage"),
        long: get_bool(row, "long"),
        collateral_raw: get_raw(row, "collateral"),
        collateral_token: row
            .get("collateralToken")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        open_price: get_f64(row, "openPrice"),
        is_open: get_bool(row, "isOpen").unwrap_or(true),
        stop_loss: get_f64(row, "stopLoss"),
        take_profit: get_f64(row, "takeProfit"),
        liquidation_price: get_f64(row, "liquidationPrice"),
        unrealized_pnl_pct: get_f64(row, "unrealizedPnlPct"),
        opened_at: get_timestamp(row, "openedAt"),
    })
}

fn parse_action_row(row: &Value) -> Option<TradeAction> {
    Some(TradeAction {
        trade_id: get_i64(row, "tradeId")?,
        action: row.get("action")?.as_str()?.to_string(),
        price: get_f64(row, "price"),
        profit_pct: get_f64(row, "profitPct"),
        collateral_raw: get_raw(row, "collateral"),
        collateral_token: row
            .get("collateralToken")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        collateral_price: get_f64(row, "collateralPrice"),
        leverage: get_f64(row, "leverage"),
        long: get_bool(row, "long"),
        amount_received_raw: get_raw(row, "amountReceived"),
        market_symbol: row
            .get("marketSymbol")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        tx_hash: row
            .get("txHash")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        timestamp: get_timestamp(row, "timestamp"),
    })
}

fn get_f64(row: &Value, key: &str) -> Option<f64> {
    match row.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

fn get_i64(row: &Value, key: &str) -> Option<i64> {
    match row.get(key) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

fn get_bool(row: &Value, key: &str) -> Option<bool> {
    match row.get(key) {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::String(s)) => match s.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn get_raw(row: &Value, key: &str) -> Option<String> {
    match row.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// The indexer serves timestamps either as ISO-8601 strings or as unix
/// seconds.
fn get_timestamp(row: &Value, key: &str) -> Option<DateTime<Utc>> {
    match row.get(key) {
        Some(Value::String(s)) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
                return Some(parsed.with_timezone(&Utc));
            }
            s.parse::<i64>()
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
        }
        Some(Value::Number(n)) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trade_row_full() {
        let row = json!({
            "id": "17",
            "leverage": "10",
            "long": true,
            "collateral": "250000000",
            "collateralToken": "USDC",
            "openPrice": 1.25,
            "isOpen": true,
            "unrealizedPnlPct": "0.08",
            "openedAt": "2025-03-01T12:00:00Z",
            "market": { "symbol": "ATOM/USD", "oraclePrice": 1.30 }
        });
        let trade = parse_trade_row(&row).unwrap();
        assert_eq!(trade.id, 17);
        assert_eq!(trade.market_symbol.as_deref(), Some("ATOM/USD"));
        assert_eq!(trade.leverage, Some(10.0));
        assert_eq!(trade.collateral_raw.as_deref(), Some("250000000"));
        assert!(trade.is_open);
        assert!(trade.opened_at.is_some());
    }

    #[test]
    fn test_parse_trade_row_null_market_relation() {
        let row = json!({ "id": 3, "isOpen": false, "market": null });
        let trade = parse_trade_row(&row).unwrap();
        assert_eq!(trade.market_symbol, None);
        assert!(!trade.is_open);
    }

    #[test]
    fn test_parse_trade_row_missing_id_is_skipped() {
        assert_eq!(parse_trade_row(&json!({ "leverage": "5" })), None);
    }

    #[test]
    fn test_parse_action_row() {
        let row = json!({
            "tradeId": 17,
            "action": "user_close_order",
            "profitPct": "0.12",
            "amountReceived": "112000000",
            "collateralPrice": 0.85,
            "txHash": "0xdead",
            "timestamp": 1740000000
        });
        let action = parse_action_row(&row).unwrap();
        assert_eq!(action.trade_id, 17);
        assert_eq!(action.action, "user_close_order");
        assert_eq!(action.profit_pct, Some(0.12));
        assert_eq!(action.amount_received_raw.as_deref(), Some("112000000"));
        assert_eq!(action.collateral_price, Some(0.85));
        assert!(action.timestamp.is_some());
    }

    #[test]
    fn test_timestamp_parses_both_encodings() {
        let iso = json!({ "t": "2025-01-02T03:04:05Z" });
        let unix = json!({ "t": 1735787045i64 });
        assert_eq!(get_timestamp(&iso, "t"), get_timestamp(&unix, "t"));
    }
}
