//! Protocol event model: the fixed set of known event kinds and the
//! optional-field payload decoded from a log entry.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::Direction;

/// Known protocol event kinds, plus a no-op variant for anything else.
///
/// Classification rules are fixed protocol semantics, not heuristics:
/// registration, explicit open, and triggered-order registration all mark a
/// trade as opened; the close set includes the fee-processing events because
/// a closing-fee event implies the trade closed even when the close event
/// itself was missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RegisterTrade,
    OpenTrade,
    RegisterTriggerOrder,
    CloseTrade,
    UserCloseOrder,
    MarketClose,
    ProcessOpeningFee,
    ProcessClosingFee,
    UnregisterTrade,
    /// Unrecognized event type. Carried, never acted on.
    Other,
}

impl EventKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "register_trade" => EventKind::RegisterTrade,
            "open_trade" => EventKind::OpenTrade,
            "register_trigger_order" => EventKind::RegisterTriggerOrder,
            "close_trade" => EventKind::CloseTrade,
            "user_close_order" => EventKind::UserCloseOrder,
            "market_close" => EventKind::MarketClose,
            "process_opening_fee" => EventKind::ProcessOpeningFee,
            "process_closing_fee" => EventKind::ProcessClosingFee,
            "unregister_trade" => EventKind::UnregisterTrade,
            _ => EventKind::Other,
        }
    }

    /// True for events that mark the trade as opened.
    pub fn opens_trade(&self) -> bool {
        matches!(
            self,
            EventKind::RegisterTrade | EventKind::OpenTrade | EventKind::RegisterTriggerOrder
        )
    }

    /// True for events that mark the trade as closed.
    pub fn closes_trade(&self) -> bool {
        matches!(
            self,
            EventKind::CloseTrade
                | EventKind::UserCloseOrder
                | EventKind::MarketClose
                | EventKind::ProcessClosingFee
                | EventKind::UnregisterTrade
        )
    }
}

/// Fields recoverable from one decoded log payload.
///
/// Every field is optional: the strict JSON path usually fills most of them,
/// the regex fallback only a narrower subset. Raw fixed-point amounts stay as
/// strings here; the normalizer owns the unit conversion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedPayload {
    pub event: Option<String>,
    pub action: Option<String>,
    pub trade_id: Option<i64>,
    pub trader: Option<String>,
    pub market_id: Option<i64>,
    pub leverage: Option<f64>,
    pub long: Option<bool>,
    pub collateral: Option<String>,
    pub open_price: Option<f64>,
    pub close_price: Option<f64>,
    pub price: Option<f64>,
    pub profit_pct: Option<f64>,
    pub amount_received: Option<String>,
    pub opening_fee: Option<String>,
    pub closing_fee: Option<String>,
    pub trigger_fee: Option<String>,
    pub borrowing_fee: Option<String>,
}

impl DecodedPayload {
    /// Lift fields from a parsed JSON object, tolerating the protocol's
    /// inconsistent encoding of numbers and booleans as strings.
    pub fn from_json(value: &Value) -> Self {
        DecodedPayload {
            event: get_str(value, "event"),
            action: get_str(value, "action"),
            trade_id: get_i64(value, "trade_id"),
            trader: get_str(value, "trader"),
            market_id: get_i64(value, "market_id"),
            leverage: get_f64(value, "leverage"),
            long: get_bool(value, "long"),
            collateral: get_raw_amount(value, "collateral"),
            open_price: get_f64(value, "open_price"),
            close_price: get_f64(value, "close_price"),
            price: get_f64(value, "price"),
            profit_pct: get_f64(value, "profit_pct"),
            amount_received: get_raw_amount(value, "amount_received"),
            opening_fee: get_raw_amount(value, "opening_fee"),
            closing_fee: get_raw_amount(value, "closing_fee"),
            trigger_fee: get_raw_amount(value, "trigger_fee"),
            borrowing_fee: get_raw_amount(value, "borrowing_fee"),
        }
    }

    /// Event kind, resolved from `event` first, then `action`.
    pub fn kind(&self) -> EventKind {
        self.event
            .as_deref()
            .or(self.action.as_deref())
            .map(EventKind::from_name)
            .unwrap_or(EventKind::Other)
    }

    pub fn direction(&self) -> Option<Direction> {
        self.long.map(Direction::from_long_flag)
    }

    /// True if any recognizable field was recovered.
    pub fn is_empty(&self) -> bool {
        *self == DecodedPayload::default()
    }
}

/// One decoded event together with its chain context.
#[derive(Debug, Clone)]
pub struct ProtocolEvent {
    pub tx_hash: String,
    pub block_number: u64,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
    pub payload: DecodedPayload,
}

fn get_str(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn get_raw_amount(value: &Value, key: &str) -> Option<String> {
    match value.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn get_f64(value: &Value, key: &str) -> Option<f64> {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn get_i64(value: &Value, key: &str) -> Option<i64> {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse::<i64>().ok(),
        _ => None,
    }
}

fn get_bool(value: &Value, key: &str) -> Option<bool> {
    match value.get(key) {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::String(s)) => match s.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_classification() {
        assert!(EventKind::from_name("register_trade").opens_trade());
        assert!(EventKind::from_name("open_trade").opens_trade());
        assert!(EventKind::from_name("register_trigger_order").opens_trade());

        assert!(EventKind::from_name("close_trade").closes_trade());
        assert!(EventKind::from_name("user_close_order").closes_trade());
        assert!(EventKind::from_name("market_close").closes_trade());
        assert!(EventKind::from_name("process_closing_fee").closes_trade());
        assert!(EventKind::from_name("unregister_trade").closes_trade());

        // Opening-fee processing does not close a trade.
        assert!(!EventKind::from_name("process_opening_fee").closes_trade());
    }

    #[test]
    fn test_unknown_event_kind_is_noop() {
        let kind = EventKind::from_name("governance_param_update");
        assert_eq!(kind, EventKind::Other);
        assert!(!kind.opens_trade());
        assert!(!kind.closes_trade());
    }

    #[test]
    fn test_payload_from_json_stringly_typed() {
        let value = json!({
            "event": "open_trade",
            "leverage": "5",
            "collateral": "100000000",
            "long": "true",
            "open_price": "42.5"
        });
        let payload = DecodedPayload::from_json(&value);
        assert_eq!(payload.kind(), EventKind::OpenTrade);
        assert_eq!(payload.leverage, Some(5.0));
        assert_eq!(payload.collateral.as_deref(), Some("100000000"));
        assert_eq!(payload.direction(), Some(Direction::Long));
        assert_eq!(payload.open_price, Some(42.5));
    }

    #[test]
    fn test_payload_from_json_native_types() {
        let value = json!({
            "action": "user_close_order",
            "trade_id": 91,
            "profit_pct": 0.12,
            "long": false
        });
        let payload = DecodedPayload::from_json(&value);
        assert_eq!(payload.kind(), EventKind::UserCloseOrder);
        assert_eq!(payload.trade_id, Some(91));
        assert_eq!(payload.profit_pct, Some(0.12));
        assert_eq!(payload.direction(), Some(Direction::Short));
    }

    #[test]
    fn test_event_falls_back_to_action() {
        let value = json!({"action": "close_trade"});
        let payload = DecodedPayload::from_json(&value);
        assert_eq!(payload.kind(), EventKind::CloseTrade);
    }
}
