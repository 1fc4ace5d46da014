//! Domain primitives: TradeId, Direction, LifecycleState, PnlSource.

use serde::{Deserialize, Serialize};

/// Stable identity of an economic trade.
///
/// The structured indexer assigns numeric ids; the log-scan path only knows
/// the transaction hash. Two records for the same trade must resolve to the
/// same variant, so the two namespaces never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TradeId {
    /// Indexer-assigned numeric trade id.
    Indexed(i64),
    /// Transaction hash (log-scan path).
    Tx(String),
}

impl TradeId {
    pub fn from_tx(hash: impl Into<String>) -> Self {
        TradeId::Tx(hash.into())
    }
}

impl std::fmt::Display for TradeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeId::Indexed(id) => write!(f, "{}", id),
            TradeId::Tx(hash) => write!(f, "{}", hash),
        }
    }
}

/// Position direction, set once at open and immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Parse the protocol's boolean `long` flag.
    pub fn from_long_flag(long: bool) -> Self {
        if long {
            Direction::Long
        } else {
            Direction::Short
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Lifecycle state of a trade. The only transition is Open -> Closed and it
/// is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Open,
    Closed,
}

impl LifecycleState {
    pub fn is_closed(&self) -> bool {
        matches!(self, LifecycleState::Closed)
    }
}

/// Provenance of a closed trade's profit percentage.
///
/// `Reported` comes from a `user_close_order` event and is pre-fee;
/// `Derived` is the `(amount_received - collateral) / collateral` estimate
/// used only when no reported figure exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PnlSource {
    Reported,
    Derived,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_id_namespaces_distinct() {
        let a = TradeId::Indexed(42);
        let b = TradeId::Tx("42".to_string());
        assert_ne!(a, b);
    }

    #[test]
    fn test_trade_id_display() {
        assert_eq!(TradeId::Indexed(7).to_string(), "7");
        assert_eq!(TradeId::from_tx("0xabc").to_string(), "0xabc");
    }

    #[test]
    fn test_direction_from_long_flag() {
        assert_eq!(Direction::from_long_flag(true), Direction::Long);
        assert_eq!(Direction::from_long_flag(false), Direction::Short);
    }

    #[test]
    fn test_direction_serialization() {
        assert_eq!(serde_json::to_string(&Direction::Long).unwrap(), "\"long\"");
        assert_eq!(
            serde_json::to_string(&Direction::Short).unwrap(),
            "\"short\""
        );
    }

    #[test]
    fn test_lifecycle_state_is_closed() {
        assert!(LifecycleState::Closed.is_closed());
        assert!(!LifecycleState::Open.is_closed());
    }
}
