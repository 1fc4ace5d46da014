//! Fee resolver: recovers opening/closing/trigger fee components from
//! transaction receipts, since the structured API does not expose them.
//!
//! Receipts are fetched in fixed-size batches with an independent timeout
//! per call. Every failure mode (timeout, transport error, pruned receipt)
//! degrades to "fee unknown" for that lookup; the batch as a whole never
//! fails.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::codec;
use crate::datasource::ChainRpc;
use crate::domain::{EventKind, TradeId};
use crate::engine::normalize::PriceContext;

/// Receipts fetched concurrently per batch. Bounded on purpose: public RPC
/// endpoints are rate-sensitive.
pub const FEE_BATCH_SIZE: usize = 10;

/// Independent timeout per receipt fetch.
pub const FEE_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// One fee lookup: which trade, which transaction, and whether the
/// transaction was the opening lifecycle event.
#[derive(Debug, Clone)]
pub struct FeeLookup {
    pub trade_id: TradeId,
    pub tx_hash: String,
    pub is_opening: bool,
}

/// Fee components resolved for one trade, in USD. A `None` component means
/// unknown, never zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeeComponents {
    pub opening_fee: Option<f64>,
    pub closing_fee: Option<f64>,
    pub trigger_fee: Option<f64>,
}

impl FeeComponents {
    pub fn is_empty(&self) -> bool {
        self.opening_fee.is_none() && self.closing_fee.is_none() && self.trigger_fee.is_none()
    }

    /// Accumulate another set of components. Opening and closing fees
    /// arrive from separate events for the same identity, so known values
    /// add rather than overwrite.
    pub fn accumulate(&mut self, other: &FeeComponents) {
        accumulate_component(&mut self.opening_fee, other.opening_fee);
        accumulate_component(&mut self.closing_fee, other.closing_fee);
        accumulate_component(&mut self.trigger_fee, other.trigger_fee);
    }
}

fn accumulate_component(target: &mut Option<f64>, addition: Option<f64>) {
    if let Some(value) = addition {
        *target = Some(target.unwrap_or(0.0) + value);
    }
}

/// Resolve fee components for the given lookups.
///
/// Returns a map with entries only for trades where at least one component
/// was recovered; absence from the map is "fee unknown".
pub async fn resolve_fees(
    rpc: &dyn ChainRpc,
    ctx: &PriceContext,
    lookups: &[FeeLookup],
) -> HashMap<TradeId, FeeComponents> {
    let mut resolved: HashMap<TradeId, FeeComponents> = HashMap::new();

    for batch in lookups.chunks(FEE_BATCH_SIZE) {
        let results = join_all(batch.iter().map(|lookup| resolve_one(rpc, ctx, lookup))).await;
        for (trade_id, components) in results.into_iter().flatten() {
            resolved.entry(trade_id).or_default().accumulate(&components);
        }
    }

    resolved
}

async fn resolve_one(
    rpc: &dyn ChainRpc,
    ctx: &PriceContext,
    lookup: &FeeLookup,
) -> Option<(TradeId, FeeComponents)> {
    let receipt = match timeout(
        FEE_FETCH_TIMEOUT,
        rpc.get_transaction_receipt(&lookup.tx_hash),
    )
    .await
    {
        Err(_) => {
            warn!(tx_hash = %lookup.tx_hash, "fee receipt fetch timed out");
            return None;
        }
        Ok(Err(e)) => {
            warn!(tx_hash = %lookup.tx_hash, error = %e, "fee receipt fetch failed");
            return None;
        }
        Ok(Ok(None)) => {
            // Pruned upstream. Legitimate for old transactions; no retry
            // helps.
            debug!(tx_hash = %lookup.tx_hash, "fee receipt pruned");
            return None;
        }
        Ok(Ok(Some(receipt))) => receipt,
    };

    let mut components = FeeComponents::default();
    for log in &receipt.logs {
        let Some(payload) = codec::decode_log_event(&log.data) else {
            continue;
        };
        let extracted = match payload.kind() {
            EventKind::ProcessOpeningFee => FeeComponents {
                opening_fee: payload
                    .opening_fee
                    .as_deref()
                    .and_then(|raw| ctx.to_usd(raw, None, None)),
                closing_fee: None,
                trigger_fee: payload
                    .trigger_fee
                    .as_deref()
                    .and_then(|raw| ctx.to_usd(raw, None, None)),
            },
            EventKind::ProcessClosingFee => FeeComponents {
                opening_fee: None,
                closing_fee: payload
                    .closing_fee
                    .as_deref()
                    .and_then(|raw| ctx.to_usd(raw, None, None)),
                trigger_fee: payload
                    .trigger_fee
                    .as_deref()
                    .and_then(|raw| ctx.to_usd(raw, None, None)),
            },
            _ => continue,
        };
        components.accumulate(&extracted);
    }

    if components.is_empty() {
        debug!(
            tx_hash = %lookup.tx_hash,
            is_opening = lookup.is_opening,
            "no fee events in receipt"
        );
        return None;
    }
    Some((lookup.trade_id.clone(), components))
}
