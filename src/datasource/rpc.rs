//! JSON-RPC client and the log-scan adapter.
//!
//! The scan walks a bounded block window in chunks, filters decoded payload
//! text by the trader's address, then re-fetches the full receipt of every
//! matching transaction: one economic trade emits several logs across
//! protocol sub-events, and the initial filter only proves that SOME log in
//! the transaction mentions the trader.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{ChainRpc, DataSourceError, RpcLog, RpcReceipt};
use crate::codec;
use crate::domain::ProtocolEvent;

/// Chunk size for `eth_getLogs` windows. The upstream enforces a hard
/// 10,000-block limit per request.
pub const MAX_BLOCK_SPAN: u64 = 9_000;

/// JSON-RPC client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRpcClient {
    client: Client,
    url: String,
}

impl HttpRpcClient {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, DataSourceError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
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

        if let Some(err) = body.get("error") {
            return Err(DataSourceError::Query(err.to_string()));
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| DataSourceError::Parse("missing result field".to_string()))
    }
}

#[async_trait]
impl ChainRpc for HttpRpcClient {
    async fn block_number(&self) -> Result<u64, DataSourceError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        parse_hex_quantity(&result)
            .ok_or_else(|| DataSourceError::Parse(format!("bad block number: {}", result)))
    }

    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        address: &str,
    ) -> Result<Vec<RpcLog>, DataSourceError> {
        debug!(from_block, to_block, "fetching logs");
        let filter = json!([{
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
            "address": address,
        }]);
        let result = self.call("eth_getLogs", filter).await?;
        let entries = result
            .as_array()
            .ok_or_else(|| DataSourceError::Parse("expected log array".to_string()))?;

        let mut logs = Vec::new();
        for entry in entries {
            match parse_log(entry) {
                Some(log) => logs.push(log),
                None => warn!("skipping malformed log entry"),
            }
        }
        Ok(logs)
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<RpcReceipt>, DataSourceError> {
        let result = self
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if result.is_null() {
            // Pruned or unknown receipt. Not an error.
            return Ok(None);
        }

        let block_number = result
            .get("blockNumber")
            .and_then(parse_hex_quantity)
            .unwrap_or(0);
        let logs = result
            .get("logs")
            .and_then(|l| l.as_array())
            .map(|entries| entries.iter().filter_map(parse_log).collect())
            .unwrap_or_default();

        Ok(Some(RpcReceipt {
            tx_hash: tx_hash.to_string(),
            block_number,
            logs,
        }))
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<Option<i64>, DataSourceError> {
        let result = self
            .call(
                "eth_getBlockByNumber",
                json!([format!("0x{:x}", block_number), false]),
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(result
            .get("timestamp")
            .and_then(parse_hex_quantity)
            .map(|t| t as i64))
    }
}

fn parse_hex_quantity(value: &Value) -> Option<u64> {
    let s = value.as_str()?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

fn parse_log(entry: &Value) -> Option<RpcLog> {
    Some(RpcLog {
        tx_hash: entry.get("transactionHash")?.as_str()?.to_string(),
        block_number: entry.get("blockNumber").and_then(parse_hex_quantity)?,
        data: entry.get("data")?.as_str()?.to_string(),
    })
}

/// Scan the trailing `lookback_blocks` window for transactions that mention
/// the trader, and decode every log of each matching transaction.
///
/// Best-effort throughout: a failed chunk or receipt is logged and skipped,
/// and a partial event list is still returned. Only the initial block-number
/// lookup is a hard failure.
pub async fn scan_for_trader(
    rpc: &dyn ChainRpc,
    protocol_address: &str,
    trader_hex: &str,
    lookback_blocks: u64,
) -> Result<Vec<ProtocolEvent>, DataSourceError> {
    let latest = rpc.block_number().await?;
    let start = latest.saturating_sub(lookback_blocks);

    // The payload encodes addresses inconsistently, with and without the
    // 0x prefix. Match both, case-insensitively.
    let with_prefix = trader_hex.to_ascii_lowercase();
    let bare = with_prefix.trim_start_matches("0x").to_string();

    let mut candidate_txs: Vec<String> = Vec::new();
    let mut seen_txs: std::collections::HashSet<String> = std::collections::HashSet::new();

    let mut from = start;
    while from <= latest {
        let to = (from + MAX_BLOCK_SPAN - 1).min(latest);
        match rpc.get_logs(from, to, protocol_address).await {
            Ok(logs) => {
                for log in logs {
                    let Some(text) = codec::decode_log_text(&log.data) else {
                        continue;
                    };
                    let haystack = text.to_ascii_lowercase();
                    if haystack.contains(&with_prefix) || haystack.contains(&bare) {
                        if seen_txs.insert(log.tx_hash.clone()) {
                            candidate_txs.push(log.tx_hash);
                        }
                    }
                }
            }
            Err(e) => {
                warn!(from, to, error = %e, "log chunk failed, skipping");
            }
        }
        from = to + 1;
    }

    debug!(candidates = candidate_txs.len(), "log scan matched transactions");

    let mut events = Vec::new();
    let mut timestamp_cache: HashMap<u64, Option<i64>> = HashMap::new();

    for tx_hash in candidate_txs {
        let receipt = match rpc.get_transaction_receipt(&tx_hash).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => {
                warn!(%tx_hash, "receipt pruned, skipping");
                continue;
            }
            Err(e) => {
                warn!(%tx_hash, error = %e, "receipt fetch failed, skipping");
                continue;
            }
        };

        let timestamp = match timestamp_cache.get(&receipt.block_number) {
            Some(cached) => *cached,
            None => {
                let fetched = rpc
                    .block_timestamp(receipt.block_number)
                    .await
                    .unwrap_or_default();
                timestamp_cache.insert(receipt.block_number, fetched);
                fetched
            }
        };
        let timestamp = timestamp.and_then(|secs| chrono::DateTime::from_timestamp(secs, 0));

        for log in &receipt.logs {
            if let Some(payload) = codec::decode_log_event(&log.data) {
                events.push(ProtocolEvent {
                    tx_hash: receipt.tx_hash.clone(),
                    block_number: receipt.block_number,
                    timestamp,
                    payload,
                });
            }
        }
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MockChainRpc;
    use crate::domain::EventKind;

    fn abi_log_data(text: &str) -> String {
        let bytes = text.as_bytes();
        let mut out = String::from("0x");
        out.push_str(&"00".repeat(64)); // log header
        out.push_str(&format!("{:064x}", 0x20));
        out.push_str(&format!("{:064x}", bytes.len()));
        out.push_str(&hex::encode(bytes));
        out
    }

    const TRADER: &str = "0xAbCd000000000000000000000000000000000001";

    #[test]
    fn test_parse_hex_quantity() {
        assert_eq!(parse_hex_quantity(&json!("0x10")), Some(16));
        assert_eq!(parse_hex_quantity(&json!("0x0")), Some(0));
        assert_eq!(parse_hex_quantity(&json!(16)), None);
        assert_eq!(parse_hex_quantity(&json!("0xzz")), None);
    }

    #[tokio::test]
    async fn test_scan_matches_unprefixed_address() {
        let payload =
            r#"{"event":"open_trade","trader":"abcd000000000000000000000000000000000001","leverage":"5"}"#;
        let rpc = MockChainRpc::new(100)
            .with_log(10, "0xtx1", &abi_log_data(payload))
            .with_receipt_from_logs();

        let events = scan_for_trader(&rpc, "0xprotocol", TRADER, 50).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload.kind(), EventKind::OpenTrade);
        assert_eq!(events[0].tx_hash, "0xtx1");
    }

    #[tokio::test]
    async fn test_scan_skips_other_traders() {
        let payload = r#"{"event":"open_trade","trader":"0xother","leverage":"5"}"#;
        let rpc = MockChainRpc::new(100)
            .with_log(10, "0xtx1", &abi_log_data(payload))
            .with_receipt_from_logs();

        let events = scan_for_trader(&rpc, "0xprotocol", TRADER, 50).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_scan_decodes_all_logs_of_matching_tx() {
        // Second log of the same tx has no trader mention but must still be
        // decoded once the tx matched.
        let open = format!(
            r#"{{"event":"open_trade","trader":"{}","leverage":"5"}}"#,
            TRADER.to_ascii_lowercase()
        );
        let fee = r#"{"event":"process_opening_fee","opening_fee":"1500000"}"#;
        let rpc = MockChainRpc::new(100)
            .with_log(10, "0xtx1", &abi_log_data(&open))
            .with_log(10, "0xtx1", &abi_log_data(fee))
            .with_receipt_from_logs();

        let events = scan_for_trader(&rpc, "0xprotocol", TRADER, 50).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .any(|e| e.payload.kind() == EventKind::ProcessOpeningFee));
    }

    #[tokio::test]
    async fn test_scan_survives_pruned_receipt() {
        let payload = format!(
            r#"{{"event":"open_trade","trader":"{}"}}"#,
            TRADER.to_ascii_lowercase()
        );
        let rpc = MockChainRpc::new(100)
            .with_log(10, "0xgone", &abi_log_data(&payload))
            .with_log(11, "0xtx2", &abi_log_data(&payload))
            .with_receipt_from_logs()
            .without_receipt("0xgone");

        let events = scan_for_trader(&rpc, "0xprotocol", TRADER, 50).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tx_hash, "0xtx2");
    }

    #[tokio::test]
    async fn test_scan_chunks_block_window() {
        let rpc = MockChainRpc::new(30_000).with_receipt_from_logs();
        scan_for_trader(&rpc, "0xprotocol", TRADER, 20_000).await.unwrap();

        let calls = rpc.get_logs_calls();
        assert!(calls.len() >= 3);
        for (from, to) in calls {
            assert!(to - from + 1 <= MAX_BLOCK_SPAN);
        }
    }
}
