//! Order store error types.

use thiserror::Error;
use xgw_core::{OrderRef, OrderStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown order: {0}")]
    UnknownOrder(OrderRef),

    #[error("Event for evicted order: {0}")]
    EvictedOrder(OrderRef),

    #[error("Duplicate order reference: {0}")]
    DuplicateOrder(OrderRef),

    #[error("Protocol violation on {order_ref}: {reason}")]
    ProtocolViolation { order_ref: OrderRef, reason: String },

    #[error("Invalid fill on {order_ref}: {reason}")]
    InvalidFill { order_ref: OrderRef, reason: String },
}

/// Rejection of an application cancel request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CancelError {
    #[error("Order not found: {0}")]
    NotFound(OrderRef),

    #[error("Order {order_ref} already terminal ({status})")]
    AlreadyTerminal {
        order_ref: OrderRef,
        status: OrderStatus,
    },
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type JournalResult<T> = Result<T, JournalError>;
