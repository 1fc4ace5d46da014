//! The reconciliation engine: merges records from every adapter into one
//! identity-keyed trade list.
//!
//! Per identity the lifecycle is UNSEEN -> OPEN -> CLOSED and never
//! regresses. Merge order is normative: point-in-time trades seed the
//! accumulator, the change-log layers over them (and synthesizes records
//! for trades that already dropped out of the point-in-time view), log-scan
//! events layer next, resolved fees overlay last.

use std::collections::{HashMap, HashSet};

use crate::datasource::{IndexedTrade, TradeAction};
use crate::domain::{
    EventKind, LifecycleState, PnlSource, ProtocolEvent, Trade, TradeId, UNKNOWN_PAIR,
};
use crate::engine::fees::FeeComponents;
use crate::engine::normalize::PriceContext;

/// Everything the adapters produced for one trader.
#[derive(Debug, Default)]
pub struct AdapterOutputs {
    /// Point-in-time trade state from the structured indexer.
    pub trades: Vec<IndexedTrade>,
    /// Append-only change-log of lifecycle transitions.
    pub history: Vec<TradeAction>,
    /// Decoded events from the log-scan path.
    pub events: Vec<ProtocolEvent>,
}

/// Merge all adapter outputs into an ordered, deduplicated trade list.
pub fn reconcile(
    outputs: &AdapterOutputs,
    fees: &HashMap<TradeId, FeeComponents>,
    ctx: &PriceContext,
) -> Vec<Trade> {
    let mut acc = Accumulator::default();

    for indexed in &outputs.trades {
        acc.seed_indexed(indexed, ctx);
    }

    let mut history: Vec<&TradeAction> = outputs.history.iter().collect();
    history.sort_by_key(|action| action.timestamp);
    for action in history {
        acc.apply_action(action, ctx);
    }

    let mut events: Vec<&ProtocolEvent> = outputs.events.iter().collect();
    events.sort_by_key(|event| event.block_number);
    for event in events {
        acc.apply_event(event, ctx);
    }

    acc.overlay_fees(fees);
    acc.into_ordered_list(ctx)
}

#[derive(Default)]
struct Accumulator {
    trades: HashMap<TradeId, Trade>,
    /// Insertion order; keeps ties stable and guarantees one output entry
    /// per identity.
    order: Vec<TradeId>,
    /// Identities whose profit percent came from a `user_close_order`
    /// event. That figure is pre-fee and most directly reported; nothing
    /// else may overwrite it.
    reported_by_user_close: HashSet<TradeId>,
}

impl Accumulator {
    fn ensure_entry(&mut self, id: &TradeId) {
        if !self.trades.contains_key(id) {
            self.order.push(id.clone());
            self.trades.insert(id.clone(), Trade::new(id.clone()));
        }
    }

    /// Seed from the point-in-time view: authoritative for open trades and
    /// for the fields that never change after open. Its P&L figure is only
    /// taken while the trade is open; once closed, the point-in-time query
    /// can return a stale unrealized number.
    fn seed_indexed(&mut self, indexed: &IndexedTrade, ctx: &PriceContext) {
        let collateral_usd = indexed
            .collateral_raw
            .as_deref()
            .and_then(|raw| ctx.to_usd(raw, indexed.collateral_token.as_deref(), None));

        let id = TradeId::Indexed(indexed.id);
        self.ensure_entry(&id);
        let trade = self.trades.get_mut(&id).expect("entry just ensured");
        trade.state = if indexed.is_open {
            LifecycleState::Open
        } else {
            LifecycleState::Closed
        };
        trade.direction = indexed.long.map(crate::domain::Direction::from_long_flag);
        trade.leverage = indexed.leverage;
        trade.open_price = indexed.open_price;
        trade.opened_at = indexed.opened_at;
        trade.collateral_usd = collateral_usd;
        if let Some(symbol) = &indexed.market_symbol {
            trade.pair = symbol.clone();
        }
        if indexed.is_open {
            trade.profit_pct = indexed.unrealized_pnl_pct;
        }
    }

    fn apply_action(&mut self, action: &TradeAction, ctx: &PriceContext) {
        let kind = EventKind::from_name(&action.action);
        let id = TradeId::Indexed(action.trade_id);

        // Unknown action kinds never materialize a record on their own.
        if kind == EventKind::Other && !self.trades.contains_key(&id) {
            return;
        }

        // The action's own price snapshot is the conversion fallback for
        // collateral tokens the live oracle no longer covers.
        let collateral_usd = action.collateral_raw.as_deref().and_then(|raw| {
            ctx.to_usd(raw, action.collateral_token.as_deref(), action.collateral_price)
        });
        let amount_received_usd = action.amount_received_raw.as_deref().and_then(|raw| {
            ctx.to_usd(raw, action.collateral_token.as_deref(), action.collateral_price)
        });

        let locked = self.reported_by_user_close.contains(&id);
        self.ensure_entry(&id);
        let trade = self.trades.get_mut(&id).expect("entry just ensured");

        if trade.direction.is_none() {
            trade.direction = action.long.map(crate::domain::Direction::from_long_flag);
        }
        if trade.leverage.is_none() {
            trade.leverage = action.leverage;
        }
        if trade.collateral_usd.is_none() {
            trade.collateral_usd = collateral_usd;
        }
        if trade.pair == UNKNOWN_PAIR {
            if let Some(symbol) = &action.market_symbol {
                trade.pair = symbol.clone();
            }
        }

        if kind.opens_trade() {
            if trade.open_price.is_none() {
                trade.open_price = action.price;
            }
            if trade.opened_at.is_none() {
                trade.opened_at = action.timestamp;
            }
        }

        if kind.closes_trade() {
            close_trade(trade);
            if trade.close_price.is_none() {
                trade.close_price = action.price;
            }
            if trade.closed_at.is_none() {
                trade.closed_at = action.timestamp;
            }
            if trade.amount_received_usd.is_none() {
                trade.amount_received_usd = amount_received_usd;
            }
            if let Some(pct) = action.profit_pct {
                if kind == EventKind::UserCloseOrder {
                    trade.profit_pct = Some(pct);
                    trade.pnl_source = Some(PnlSource::Reported);
                    self.reported_by_user_close.insert(id);
                } else if !locked && trade.profit_pct.is_none() {
                    trade.profit_pct = Some(pct);
                    trade.pnl_source = Some(PnlSource::Reported);
                }
            }
        }
    }

    fn apply_event(&mut self, event: &ProtocolEvent, ctx: &PriceContext) {
        let payload = &event.payload;
        let kind = payload.kind();

        // One economic trade may surface under both namespaces; the
        // indexer-assigned id wins whenever the payload carries it.
        let id = payload
            .trade_id
            .map(TradeId::Indexed)
            .unwrap_or_else(|| TradeId::from_tx(event.tx_hash.clone()));

        if kind == EventKind::Other && !self.trades.contains_key(&id) {
            return;
        }

        let collateral_usd = payload
            .collateral
            .as_deref()
            .and_then(|raw| ctx.to_usd(raw, None, None));
        let amount_received_usd = payload
            .amount_received
            .as_deref()
            .and_then(|raw| ctx.to_usd(raw, None, None));
        let fee_usd = |raw: &Option<String>| raw.as_deref().and_then(|r| ctx.to_usd(r, None, None));
        let opening_fee = fee_usd(&payload.opening_fee);
        let closing_fee = fee_usd(&payload.closing_fee);
        let trigger_fee = fee_usd(&payload.trigger_fee);
        let borrowing_fee = fee_usd(&payload.borrowing_fee);

        let locked = self.reported_by_user_close.contains(&id);
        self.ensure_entry(&id);
        let trade = self.trades.get_mut(&id).expect("entry just ensured");

        if trade.direction.is_none() {
            trade.direction = payload.direction();
        }
        if trade.leverage.is_none() {
            trade.leverage = payload.leverage;
        }
        if trade.collateral_usd.is_none() {
            trade.collateral_usd = collateral_usd;
        }

        if kind.opens_trade() {
            if trade.open_price.is_none() {
                trade.open_price = payload.open_price.or(payload.price);
            }
            if trade.opened_at.is_none() {
                trade.opened_at = event.timestamp;
            }
        }

        if kind.closes_trade() {
            close_trade(trade);
            if trade.close_price.is_none() {
                trade.close_price = payload.close_price.or(payload.price);
            }
            if trade.closed_at.is_none() {
                trade.closed_at = event.timestamp;
            }
            if trade.amount_received_usd.is_none() {
                trade.amount_received_usd = amount_received_usd;
            }
            if let Some(pct) = payload.profit_pct {
                if kind == EventKind::UserCloseOrder {
                    trade.profit_pct = Some(pct);
                    trade.pnl_source = Some(PnlSource::Reported);
                    self.reported_by_user_close.insert(id);
                } else if !locked && trade.profit_pct.is_none() {
                    trade.profit_pct = Some(pct);
                    trade.pnl_source = Some(PnlSource::Reported);
                }
            }
        }

        accumulate(&mut trade.opening_fee_usd, opening_fee);
        accumulate(&mut trade.closing_fee_usd, closing_fee);
        accumulate(&mut trade.trigger_fee_usd, trigger_fee);
        accumulate(&mut trade.borrowing_fee_usd, borrowing_fee);
    }

    /// Receipt-decoded fee components replace event-derived values for the
    /// same identity: they come from the same receipts, decoded under the
    /// resolver's stricter event matching, and must not double count.
    fn overlay_fees(&mut self, fees: &HashMap<TradeId, FeeComponents>) {
        for (id, components) in fees {
            let Some(trade) = self.trades.get_mut(id) else {
                continue;
            };
            if components.opening_fee.is_some() {
                trade.opening_fee_usd = components.opening_fee;
            }
            if components.closing_fee.is_some() {
                trade.closing_fee_usd = components.closing_fee;
            }
            if components.trigger_fee.is_some() {
                trade.trigger_fee_usd = components.trigger_fee;
            }
        }
    }

    fn into_ordered_list(self, ctx: &PriceContext) -> Vec<Trade> {
        let Accumulator {
            mut trades, order, ..
        } = self;

        let mut list: Vec<Trade> = order
            .into_iter()
            .filter_map(|id| trades.remove(&id))
            .collect();
        for trade in &mut list {
            finalize(trade, ctx);
        }
        // Most recent activity first; ties keep input order (stable sort).
        list.sort_by_key(|trade| std::cmp::Reverse(trade.activity_time()));
        list
    }
}

fn close_trade(trade: &mut Trade) {
    if trade.state == LifecycleState::Open {
        trade.state = LifecycleState::Closed;
        // Whatever P&L was carried so far was the open-state unrealized
        // figure; realized P&L comes from the closing sources only.
        trade.profit_pct = None;
        trade.pnl_source = None;
        trade.pnl_amount_usd = None;
    }
}

fn accumulate(target: &mut Option<f64>, addition: Option<f64>) {
    if let Some(value) = addition {
        *target = Some(target.unwrap_or(0.0) + value);
    }
}

fn finalize(trade: &mut Trade, ctx: &PriceContext) {
    if trade.pair == UNKNOWN_PAIR {
        if let Some(open_price) = trade.open_price {
            trade.pair = ctx.infer_pair(open_price);
        }
    }

    if trade.state.is_closed() {
        // No reported figure anywhere: fall back to the rough estimate,
        // explicitly marked so downstream can discount it.
        if trade.profit_pct.is_none() {
            if let (Some(received), Some(collateral)) =
                (trade.amount_received_usd, trade.collateral_usd)
            {
                if collateral > 0.0 {
                    trade.profit_pct = Some((received - collateral) / collateral);
                    trade.pnl_source = Some(PnlSource::Derived);
                }
            }
        }
        if trade.profit_pct.is_some() && trade.pnl_source.is_none() {
            trade.pnl_source = Some(PnlSource::Reported);
        }
        trade.derive_missing();
        // `amount_received = collateral + pnl` is the defining invariant;
        // once P&L is known it wins over any raw figure.
        if let (Some(collateral), Some(pnl)) = (trade.collateral_usd, trade.pnl_amount_usd) {
            trade.amount_received_usd = Some(collateral + pnl);
        }
    } else {
        // Open trades carry unrealized P&L only; nothing was received yet.
        if trade.pnl_amount_usd.is_none() {
            if let (Some(collateral), Some(pct)) = (trade.collateral_usd, trade.profit_pct) {
                trade.pnl_amount_usd = Some(collateral * pct);
            }
        }
        if trade.total_fees_usd.is_none() {
            trade.total_fees_usd = trade.resolved_fee_total();
        }
    }
}
