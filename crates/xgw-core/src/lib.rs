//! Core domain types for the xgw execution gateway.
//!
//! This crate provides the types shared by every other crate:
//! - `Price`, `Quantity`: precision-safe numeric types
//! - `OrderRef`, `ChannelHandle`: identifiers
//! - `OrderRecord`, `OrderStatus`: the per-order state
//! - `VenueEvent`, `WireRequest`: traffic to and from the venue
//! - `ServerSnapshot`: full-state query results

pub mod clock;
pub mod decimal;
pub mod error;
pub mod event;
pub mod order;
pub mod record;
pub mod snapshot;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decimal::{weighted_average, Price, Quantity};
pub use error::{CoreError, Result};
pub use event::{CancelRequest, OrderRequest, RejectInfo, VenueEvent, WireRequest};
pub use order::{ChannelHandle, ClientSeqSource, OrderKind, OrderRef, OrderSide};
pub use record::{OrderRecord, OrderStatus};
pub use snapshot::{CashSnapshot, OrderSnapshot, PositionSnapshot, ServerSnapshot, SnapshotStatus};
