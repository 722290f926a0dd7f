//! Prometheus metrics and structured logging for xgw.
//!
//! - Prometheus metrics for channel health, event application and sweeps
//! - Structured logging with tracing (JSON in production, pretty otherwise)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::Metrics;
