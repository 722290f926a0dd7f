//! Order record and lifecycle status.

use crate::decimal::{Price, Quantity};
use crate::event::{OrderRequest, RejectInfo};
use crate::order::{ChannelHandle, OrderKind, OrderRef, OrderSide};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order lifecycle status.
///
/// Ordered by [`OrderStatus::rank`]; a record never moves to a lower rank and
/// never leaves a terminal status, with the single exception of
/// `Canceled -> PartiallyCanceled` when a fill that was in flight during the
/// cancel lands afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Record inserted, request not yet confirmed sent.
    Created,
    /// Request crossed the send boundary.
    Submitted,
    /// Accepted by the broker.
    BrokerAcked,
    /// Accepted by the venue, resting.
    VenueAcked,
    /// Some quantity executed, remainder resting.
    PartiallyFilled,
    Filled,
    /// Canceled after a partial execution.
    PartiallyCanceled,
    Canceled,
    BrokerRejected,
    VenueRejected,
}

impl OrderStatus {
    /// Position in the lifecycle. Terminal states share the top rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Submitted => 1,
            Self::BrokerAcked => 2,
            Self::VenueAcked => 3,
            Self::PartiallyFilled => 4,
            Self::Filled
            | Self::PartiallyCanceled
            | Self::Canceled
            | Self::BrokerRejected
            | Self::VenueRejected => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 5
    }

    /// Whether the broker has seen the order (acked, or anything past it).
    pub fn is_broker_known(&self) -> bool {
        !matches!(self, Self::Created | Self::Submitted | Self::BrokerRejected)
    }

    /// Whether the venue has accepted the order at some point.
    pub fn is_venue_known(&self) -> bool {
        matches!(
            self,
            Self::VenueAcked
                | Self::PartiallyFilled
                | Self::Filled
                | Self::PartiallyCanceled
                | Self::Canceled
        )
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::BrokerRejected | Self::VenueRejected)
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled | Self::PartiallyCanceled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Submitted => "submitted",
            Self::BrokerAcked => "broker_acked",
            Self::VenueAcked => "venue_acked",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::PartiallyCanceled => "partially_canceled",
            Self::Canceled => "canceled",
            Self::BrokerRejected => "broker_rejected",
            Self::VenueRejected => "venue_rejected",
        };
        f.write_str(s)
    }
}

/// Authoritative state of one submitted order.
///
/// Published downstream as a full snapshot after every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_ref: OrderRef,
    pub client_seq: u64,
    pub channel: ChannelHandle,
    pub instrument: String,
    pub broker_order_id: Option<String>,
    pub venue_order_id: Option<String>,

    pub side: OrderSide,
    pub order_kind: OrderKind,
    pub requested_qty: Quantity,
    pub requested_price: Price,

    pub filled_qty: Quantity,
    pub avg_fill_price: Price,
    pub canceled_qty: Quantity,
    pub last_fill_qty: Quantity,
    pub last_fill_price: Price,

    pub status: OrderStatus,
    pub cancel_pending: bool,
    pub error_code: Option<i32>,
    pub error_message: Option<String>,

    pub created_time: u64,
    pub last_update_time: u64,
    /// Incremented on every observable transition.
    pub version: u64,
}

impl OrderRecord {
    /// Fresh `Created` record for a request about to be sent.
    pub fn new(
        order_ref: OrderRef,
        client_seq: u64,
        channel: ChannelHandle,
        request: &OrderRequest,
        now_ms: u64,
    ) -> Self {
        Self {
            order_ref,
            client_seq,
            channel,
            instrument: request.instrument.clone(),
            broker_order_id: None,
            venue_order_id: None,
            side: request.side,
            order_kind: request.order_kind,
            requested_qty: request.qty,
            requested_price: request.price,
            filled_qty: Quantity::ZERO,
            avg_fill_price: Price::ZERO,
            canceled_qty: Quantity::ZERO,
            last_fill_qty: Quantity::ZERO,
            last_fill_price: Price::ZERO,
            status: OrderStatus::Created,
            cancel_pending: false,
            error_code: None,
            error_message: None,
            created_time: now_ms,
            last_update_time: now_ms,
            version: 0,
        }
    }

    /// Quantity neither filled nor canceled.
    pub fn unaccounted_qty(&self) -> Quantity {
        self.requested_qty
            .saturating_sub(self.filled_qty + self.canceled_qty)
    }

    /// Whether `filled + canceled` covers the whole request.
    pub fn is_fully_accounted(&self) -> bool {
        self.filled_qty + self.canceled_qty >= self.requested_qty
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn set_error(&mut self, info: &RejectInfo) {
        self.error_code = Some(info.code);
        self.error_message = Some(info.message.clone());
    }

    /// Stamp a transition: bump version and update time.
    pub fn touch(&mut self, now_ms: u64) {
        self.version += 1;
        self.last_update_time = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> OrderRecord {
        let req = OrderRequest {
            side: OrderSide::Buy,
            instrument: "600000".to_string(),
            qty: Quantity::new(dec!(100)),
            price: Price::new(dec!(10.5)),
            order_kind: OrderKind::Limit,
        };
        OrderRecord::new(OrderRef::new("ord", 1), 1, ChannelHandle(0), &req, 1_000)
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::PartiallyCanceled.is_terminal());
        assert!(OrderStatus::VenueRejected.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(!OrderStatus::Created.is_terminal());
    }

    #[test]
    fn test_rank_is_monotonic_along_happy_path() {
        let path = [
            OrderStatus::Created,
            OrderStatus::Submitted,
            OrderStatus::BrokerAcked,
            OrderStatus::VenueAcked,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
    }

    #[test]
    fn test_unaccounted_qty() {
        let mut rec = sample();
        rec.filled_qty = Quantity::new(dec!(30));
        rec.canceled_qty = Quantity::new(dec!(20));
        assert_eq!(rec.unaccounted_qty(), Quantity::new(dec!(50)));
        assert!(!rec.is_fully_accounted());

        rec.canceled_qty = Quantity::new(dec!(70));
        assert!(rec.is_fully_accounted());
    }

    #[test]
    fn test_touch_bumps_version() {
        let mut rec = sample();
        rec.touch(2_000);
        rec.touch(3_000);
        assert_eq!(rec.version, 2);
        assert_eq!(rec.last_update_time, 3_000);
        assert_eq!(rec.created_time, 1_000);
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&OrderStatus::PartiallyCanceled).unwrap();
        assert_eq!(json, "\"partially_canceled\"");
    }
}
