//! Requests sent to the venue and events received from it.

use crate::decimal::{Price, Quantity};
use crate::order::{OrderKind, OrderRef, OrderSide};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Application-level new-order request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub side: OrderSide,
    pub instrument: String,
    pub qty: Quantity,
    pub price: Price,
    pub order_kind: OrderKind,
}

impl OrderRequest {
    /// Local validation before anything reaches the wire.
    ///
    /// Returns a human-readable reason when the request is malformed.
    pub fn validate(&self) -> Result<(), String> {
        if self.instrument.trim().is_empty() {
            return Err("instrument is empty".to_string());
        }
        if !self.qty.is_positive() {
            return Err(format!("quantity must be positive, got {}", self.qty));
        }
        if self.order_kind.requires_price() && !self.price.is_positive() {
            return Err(format!(
                "{} order requires a positive price, got {}",
                self.order_kind, self.price
            ));
        }
        Ok(())
    }
}

/// Cancel request correlated by order reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    /// Order being canceled.
    pub order_ref: OrderRef,
    /// Sequence allocated for the cancel itself.
    pub client_seq: u64,
    pub instrument: String,
    /// Venue id, when already known.
    pub venue_order_id: Option<String>,
}

/// Request as handed to a session channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireRequest {
    NewOrder {
        order_ref: OrderRef,
        client_seq: u64,
        request: OrderRequest,
    },
    Cancel(CancelRequest),
}

impl WireRequest {
    pub fn order_ref(&self) -> &OrderRef {
        match self {
            Self::NewOrder { order_ref, .. } => order_ref,
            Self::Cancel(c) => &c.order_ref,
        }
    }

    pub fn client_seq(&self) -> u64 {
        match self {
            Self::NewOrder { client_seq, .. } => *client_seq,
            Self::Cancel(c) => c.client_seq,
        }
    }

    pub fn is_cancel(&self) -> bool {
        matches!(self, Self::Cancel(_))
    }

    /// Structural validation applied by the channel registry.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::NewOrder { request, .. } => request.validate(),
            Self::Cancel(c) => {
                if c.order_ref.as_str().is_empty() {
                    Err("cancel without order reference".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Rejection details reported by broker or venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectInfo {
    pub code: i32,
    pub message: String,
}

impl RejectInfo {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for RejectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Event reported by the remote side for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VenueEvent {
    BrokerAck {
        order_ref: OrderRef,
        broker_order_id: String,
    },
    BrokerReject {
        order_ref: OrderRef,
        error: RejectInfo,
    },
    VenueAck {
        order_ref: OrderRef,
        venue_order_id: String,
    },
    VenueReject {
        order_ref: OrderRef,
        error: RejectInfo,
    },
    Fill {
        order_ref: OrderRef,
        qty: Quantity,
        price: Price,
        #[serde(default)]
        trade_id: Option<String>,
    },
    CancelAck {
        order_ref: OrderRef,
        canceled_qty: Quantity,
    },
    CancelReject {
        order_ref: OrderRef,
        error: RejectInfo,
    },
}

impl VenueEvent {
    pub fn order_ref(&self) -> &OrderRef {
        match self {
            Self::BrokerAck { order_ref, .. }
            | Self::BrokerReject { order_ref, .. }
            | Self::VenueAck { order_ref, .. }
            | Self::VenueReject { order_ref, .. }
            | Self::Fill { order_ref, .. }
            | Self::CancelAck { order_ref, .. }
            | Self::CancelReject { order_ref, .. } => order_ref,
        }
    }

    /// Short label for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BrokerAck { .. } => "broker_ack",
            Self::BrokerReject { .. } => "broker_reject",
            Self::VenueAck { .. } => "venue_ack",
            Self::VenueReject { .. } => "venue_reject",
            Self::Fill { .. } => "fill",
            Self::CancelAck { .. } => "cancel_ack",
            Self::CancelReject { .. } => "cancel_reject",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limit(qty: Quantity, price: Price) -> OrderRequest {
        OrderRequest {
            side: OrderSide::Sell,
            instrument: "IF2412".to_string(),
            qty,
            price,
            order_kind: OrderKind::Limit,
        }
    }

    #[test]
    fn test_validate_rejects_zero_qty() {
        let req = limit(Quantity::ZERO, Price::new(dec!(1)));
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_validate_limit_requires_price() {
        let req = limit(Quantity::new(dec!(1)), Price::ZERO);
        assert!(req.validate().is_err());

        let mut market = req.clone();
        market.order_kind = OrderKind::Market;
        assert!(market.validate().is_ok());
    }

    #[test]
    fn test_venue_event_json_shape() {
        let json = r#"{"type":"fill","order_ref":"ord-000000000001","qty":"40","price":"10.5"}"#;
        let ev: VenueEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.kind(), "fill");
        assert_eq!(ev.order_ref().as_str(), "ord-000000000001");
        match ev {
            VenueEvent::Fill { qty, trade_id, .. } => {
                assert_eq!(qty, Quantity::new(dec!(40)));
                assert!(trade_id.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
