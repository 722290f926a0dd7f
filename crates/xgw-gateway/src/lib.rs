//! xgw execution gateway.
//!
//! Ties the session, order-store and telemetry crates into one process:
//! configuration, event dispatch, store maintenance, the publisher thread and
//! the application-facing [`Gateway`] facade.

pub mod app;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod maintenance;
pub mod publisher;
pub mod simulator;

pub use app::{Gateway, LOCAL_REJECT_CODE};
pub use config::{AppConfig, OrderChannelConfig, QueueConfig, ReconcileConfig, ReportChannelConfig};
pub use error::{GatewayError, GatewayResult};
pub use simulator::SimulatedVenue;
