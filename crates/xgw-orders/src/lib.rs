//! Order lifecycle for the xgw gateway.
//!
//! - `OrderStateStore`: authoritative per-order state machine
//! - `SnapshotHandoff`: ring + overflow between apply path and publisher
//! - `ReconciliationSweep`: merges full server snapshots
//! - `AccountBook`: positions and cash from sweeps
//! - `JournalWriter`: JSON Lines log of evicted terminal records

pub mod account;
pub mod config;
pub mod error;
pub mod handoff;
pub mod journal;
pub mod reconcile;
pub mod store;
pub mod transition;

pub use account::AccountBook;
pub use config::StoreConfig;
pub use error::{CancelError, JournalError, JournalResult, StoreError, StoreResult};
pub use handoff::SnapshotHandoff;
pub use journal::{JournalConfig, JournalWriter};
pub use reconcile::{ReconciliationSweep, SweepReport};
pub use store::{ApplyOutcome, OrderStateStore};
