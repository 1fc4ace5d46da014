//! Domain types for the trade reconstruction core.
//!
//! This module provides:
//! - Trade identity, direction, and lifecycle primitives
//! - The protocol event model (known kinds + optional-field payloads)
//! - The reconstructed Trade record and its live projections
//! - Market metadata snapshots

pub mod event;
pub mod market;
pub mod position;
pub mod primitives;
pub mod trade;

pub use event::{DecodedPayload, EventKind, ProtocolEvent};
pub use market::MarketInfo;
pub use position::{derive_mark_price, OpenPosition, VaultPosition};
pub use primitives::{Direction, LifecycleState, PnlSource, TradeId};
pub use trade::{Trade, UNKNOWN_PAIR};
