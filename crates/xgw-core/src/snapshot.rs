//! Full-state snapshot returned by the venue's query interface.
//!
//! Consumed by the reconciliation sweep; never used to create orders.

use crate::decimal::{Price, Quantity};
use crate::event::RejectInfo;
use crate::order::{OrderRef, OrderSide};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Server-side view of an order's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    /// Known to the broker, not yet accepted by the venue.
    BrokerAcked,
    /// Accepted by the venue and working (possibly partially filled).
    Working,
    Filled,
    /// Canceled; any fills are reported in `filled_qty`.
    Canceled,
    BrokerRejected,
    VenueRejected,
}

impl SnapshotStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::BrokerAcked | Self::Working)
    }
}

/// One order as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_ref: OrderRef,
    pub status: SnapshotStatus,
    #[serde(default)]
    pub broker_order_id: Option<String>,
    #[serde(default)]
    pub venue_order_id: Option<String>,
    pub filled_qty: Quantity,
    pub avg_fill_price: Price,
    #[serde(default)]
    pub canceled_qty: Quantity,
    #[serde(default)]
    pub error: Option<RejectInfo>,
}

/// Instrument holding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub instrument: String,
    pub side: OrderSide,
    pub qty: Quantity,
    pub avg_price: Price,
}

/// Cash balance for one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashSnapshot {
    pub currency: String,
    pub balance: Decimal,
    pub available: Decimal,
}

/// Aggregated answer to a full-state query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    #[serde(default)]
    pub orders: Vec<OrderSnapshot>,
    #[serde(default)]
    pub positions: Vec<PositionSnapshot>,
    #[serde(default)]
    pub cash: Vec<CashSnapshot>,
}
