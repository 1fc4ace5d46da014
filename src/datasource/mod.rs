//! Source adapters: two independent fetch strategies over the same
//! underlying truth.
//!
//! `ChainRpc` is the raw JSON-RPC boundary (block logs, receipts,
//! timestamps); `IndexerApi` is the structured GraphQL boundary. Both are
//! object-safe traits so the engine and the HTTP layer can run against
//! mocks.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod graphql;
pub mod mock;
pub mod rpc;

pub use graphql::GraphqlIndexer;
pub use mock::{MockChainRpc, MockIndexer};
pub use rpc::{scan_for_trader, HttpRpcClient, MAX_BLOCK_SPAN};

/// Error type for upstream source operations.
#[derive(Debug, Clone, Error)]
pub enum DataSourceError {
    #[error("network error: {0}")]
    Network(String),
    #[error("http error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("upstream query error: {0}")]
    Query(String),
    #[error("rate limited")]
    RateLimited,
}

/// A single protocol log entry as returned by `eth_getLogs` or inside a
/// receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcLog {
    pub tx_hash: String,
    pub block_number: u64,
    pub data: String,
}

/// A transaction receipt: the full set of logs one transaction emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub logs: Vec<RpcLog>,
}

/// JSON-RPC chain boundary.
///
/// A pruned or unknown receipt is `Ok(None)`, not an error: old receipts
/// legitimately disappear from public nodes and no retry helps.
#[async_trait]
pub trait ChainRpc: Send + Sync + fmt::Debug {
    async fn block_number(&self) -> Result<u64, DataSourceError>;

    /// Fetch protocol logs in `[from_block, to_block]`. Callers must keep
    /// the span under the upstream's 10,000-block hard limit.
    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        address: &str,
    ) -> Result<Vec<RpcLog>, DataSourceError>;

    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<RpcReceipt>, DataSourceError>;

    /// Unix timestamp of a block, if the node still knows it.
    async fn block_timestamp(&self, block_number: u64) -> Result<Option<i64>, DataSourceError>;
}

/// Point-in-time view of a trade from the structured indexer.
///
/// Authoritative for currently-open trades and for fields that never change
/// after open. The P&L fields are only valid while the trade is open.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexedTrade {
    pub id: i64,
    /// From the optional nested market relation; absent for orphaned or
    /// deprecated markets.
    pub market_symbol: Option<String>,
    pub leverage: Option<f64>,
    pub long: Option<bool>,
    pub collateral_raw: Option<String>,
    pub collateral_token: Option<String>,
    pub open_price: Option<f64>,
    pub is_open: bool,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub liquidation_price: Option<f64>,
    pub unrealized_pnl_pct: Option<f64>,
    pub opened_at: Option<DateTime<Utc>>,
}

/// One append-only change-log entry for a trade lifecycle transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeAction {
    pub trade_id: i64,
    /// Action name from the protocol's event-name set.
    pub action: String,
    pub price: Option<f64>,
    pub profit_pct: Option<f64>,
    pub collateral_raw: Option<String>,
    pub collateral_token: Option<String>,
    /// Collateral token price snapshot at the action's time. Used as the
    /// conversion fallback once the live oracle no longer reflects what the
    /// trade actually settled at.
    pub collateral_price: Option<f64>,
    pub leverage: Option<f64>,
    pub long: Option<bool>,
    pub amount_received_raw: Option<String>,
    pub market_symbol: Option<String>,
    pub tx_hash: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A fee-bearing transaction reference for one trade lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeTransaction {
    pub trade_id: i64,
    pub tx_hash: String,
    pub is_opening: bool,
}

/// Market metadata with protocol-wide open interest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketState {
    pub symbol: String,
    pub oracle_price: f64,
    pub open_interest_long_usd: Option<f64>,
    pub open_interest_short_usd: Option<f64>,
}

/// One vault deposit or withdrawal.
#[derive(Debug, Clone, PartialEq)]
pub struct VaultAction {
    pub action: String,
    pub shares: f64,
    pub amount_raw: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Protocol-wide vault totals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VaultState {
    pub tvl_usd: f64,
    pub total_shares: f64,
}

/// Structured GraphQL boundary.
#[async_trait]
pub trait IndexerApi: Send + Sync + fmt::Debug {
    /// Point-in-time trade state for one trader. Implementations degrade to
    /// a reduced query without the market relation when the full query
    /// fails.
    async fn fetch_trades(&self, trader: &str) -> Result<Vec<IndexedTrade>, DataSourceError>;

    /// Append-only change-log of trade lifecycle transitions for one
    /// trader.
    async fn fetch_trade_history(&self, trader: &str)
        -> Result<Vec<TradeAction>, DataSourceError>;

    async fn fetch_fee_transactions(
        &self,
        trader: &str,
    ) -> Result<Vec<FeeTransaction>, DataSourceError>;

    async fn fetch_markets(&self) -> Result<Vec<MarketState>, DataSourceError>;

    async fn fetch_vault_actions(
        &self,
        trader: &str,
    ) -> Result<Vec<VaultAction>, DataSourceError>;

    async fn fetch_vault_state(&self) -> Result<Option<VaultState>, DataSourceError>;

    /// Change-log across ALL traders, newest first. Input to the cached
    /// protocol-wide volume aggregate only.
    async fn fetch_global_history(&self, limit: i64)
        -> Result<Vec<TradeAction>, DataSourceError>;
}
