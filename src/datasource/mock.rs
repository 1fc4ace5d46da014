//! In-memory source doubles for testing without network calls.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    ChainRpc, DataSourceError, FeeTransaction, IndexedTrade, IndexerApi, MarketState, RpcLog,
    RpcReceipt, TradeAction, VaultAction, VaultState,
};

/// Mock chain RPC backed by predefined logs and receipts.
#[derive(Debug, Default)]
pub struct MockChainRpc {
    latest_block: u64,
    logs: Vec<RpcLog>,
    receipts: HashMap<String, RpcReceipt>,
    pruned: HashSet<String>,
    timestamps: HashMap<u64, i64>,
    get_logs_calls: Mutex<Vec<(u64, u64)>>,
    offline: bool,
}

impl MockChainRpc {
    pub fn new(latest_block: u64) -> Self {
        Self {
            latest_block,
            ..Default::default()
        }
    }

    /// Every call fails with a network error, simulating a dead endpoint.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Default::default()
        }
    }

    fn guard(&self) -> Result<(), DataSourceError> {
        if self.offline {
            Err(DataSourceError::Network("mock rpc offline".to_string()))
        } else {
            Ok(())
        }
    }

    pub fn with_log(mut self, block_number: u64, tx_hash: &str, data: &str) -> Self {
        self.logs.push(RpcLog {
            tx_hash: tx_hash.to_string(),
            block_number,
            data: data.to_string(),
        });
        self
    }

    /// Build receipts by grouping the registered logs per transaction.
    pub fn with_receipt_from_logs(mut self) -> Self {
        for log in &self.logs {
            let receipt = self
                .receipts
                .entry(log.tx_hash.clone())
                .or_insert_with(|| RpcReceipt {
                    tx_hash: log.tx_hash.clone(),
                    block_number: log.block_number,
                    logs: Vec::new(),
                });
            receipt.logs.push(log.clone());
        }
        self
    }

    pub fn with_receipt(mut self, receipt: RpcReceipt) -> Self {
        self.receipts.insert(receipt.tx_hash.clone(), receipt);
        self
    }

    /// Mark a transaction's receipt as pruned upstream.
    pub fn without_receipt(mut self, tx_hash: &str) -> Self {
        self.receipts.remove(tx_hash);
        self.pruned.insert(tx_hash.to_string());
        self
    }

    pub fn with_timestamp(mut self, block_number: u64, unix_secs: i64) -> Self {
        self.timestamps.insert(block_number, unix_secs);
        self
    }

    /// Every `(from, to)` window `get_logs` was called with.
    pub fn get_logs_calls(&self) -> Vec<(u64, u64)> {
        self.get_logs_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainRpc for MockChainRpc {
    async fn block_number(&self) -> Result<u64, DataSourceError> {
        self.guard()?;
        Ok(self.latest_block)
    }

    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        _address: &str,
    ) -> Result<Vec<RpcLog>, DataSourceError> {
        self.guard()?;
        self.get_logs_calls
            .lock()
            .unwrap()
            .push((from_block, to_block));
        Ok(self
            .logs
            .iter()
            .filter(|log| log.block_number >= from_block && log.block_number <= to_block)
            .cloned()
            .collect())
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<RpcReceipt>, DataSourceError> {
        self.guard()?;
        if self.pruned.contains(tx_hash) {
            return Ok(None);
        }
        Ok(self.receipts.get(tx_hash).cloned())
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<Option<i64>, DataSourceError> {
        self.guard()?;
        Ok(self.timestamps.get(&block_number).copied())
    }
}

/// Mock indexer returning predefined structured data.
#[derive(Debug, Default)]
pub struct MockIndexer {
    trades: Vec<IndexedTrade>,
    history: Vec<TradeAction>,
    fee_txs: Vec<FeeTransaction>,
    markets: Vec<MarketState>,
    vault_actions: Vec<VaultAction>,
    vault_state: Option<VaultState>,
    global_history: Vec<TradeAction>,
    offline: bool,
}

impl MockIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with a network error, simulating a dead endpoint.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Default::default()
        }
    }

    pub fn with_trade(mut self, trade: IndexedTrade) -> Self {
        self.trades.push(trade);
        self
    }

    pub fn with_action(mut self, action: TradeAction) -> Self {
        self.history.push(action);
        self
    }

    pub fn with_fee_tx(mut self, fee_tx: FeeTransaction) -> Self {
        self.fee_txs.push(fee_tx);
        self
    }

    pub fn with_market(mut self, market: MarketState) -> Self {
        self.markets.push(market);
        self
    }

    pub fn with_vault_action(mut self, action: VaultAction) -> Self {
        self.vault_actions.push(action);
        self
    }

    pub fn with_vault_state(mut self, state: VaultState) -> Self {
        self.vault_state = Some(state);
        self
    }

    pub fn with_global_action(mut self, action: TradeAction) -> Self {
        self.global_history.push(action);
        self
    }

    fn guard(&self) -> Result<(), DataSourceError> {
        if self.offline {
            Err(DataSourceError::Network("mock indexer offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl IndexerApi for MockIndexer {
    async fn fetch_trades(&self, _trader: &str) -> Result<Vec<IndexedTrade>, DataSourceError> {
        self.guard()?;
        Ok(self.trades.clone())
    }

    async fn fetch_trade_history(
        &self,
        _trader: &str,
    ) -> Result<Vec<TradeAction>, DataSourceError> {
        self.guard()?;
        Ok(self.history.clone())
    }

    async fn fetch_fee_transactions(
        &self,
        _trader: &str,
    ) -> Result<Vec<FeeTransaction>, DataSourceError> {
        self.guard()?;
        Ok(self.fee_txs.clone())
    }

    async fn fetch_markets(&self) -> Result<Vec<MarketState>, DataSourceError> {
        self.guard()?;
        Ok(self.markets.clone())
    }

    async fn fetch_vault_actions(
        &self,
        _trader: &str,
    ) -> Result<Vec<VaultAction>, DataSourceError> {
        self.guard()?;
        Ok(self.vault_actions.clone())
    }

    async fn fetch_vault_state(&self) -> Result<Option<VaultState>, DataSourceError> {
        self.guard()?;
        Ok(self.vault_state.clone())
    }

    async fn fetch_global_history(
        &self,
        limit: i64,
    ) -> Result<Vec<TradeAction>, DataSourceError> {
        self.guard()?;
        Ok(self
            .global_history
            .iter()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
