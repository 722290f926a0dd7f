//! Gateway error types.

use thiserror::Error;
use xgw_core::OrderRef;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel configuration error: {0}")]
    Channel(#[from] xgw_session::ConfigError),

    #[error("Invalid order request: {0}")]
    InvalidRequest(String),

    #[error("No order channel configured")]
    NoOrderChannel,

    #[error("Store error: {0}")]
    Store(#[from] xgw_orders::StoreError),

    #[error("Send error: {0}")]
    Send(#[from] xgw_session::SendError),

    /// The order exists locally, recorded as rejected.
    #[error("Order {order_ref} not sent: {source}")]
    SubmitFailed {
        order_ref: OrderRef,
        #[source]
        source: xgw_session::SendError,
    },

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] xgw_telemetry::TelemetryError),

    #[error("Journal error: {0}")]
    Journal(#[from] xgw_orders::JournalError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
