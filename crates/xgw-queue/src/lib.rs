//! Lock-protected handoff queue.
//!
//! Moves order snapshots from the event-apply path (channel tasks) to the
//! publisher thread without ever blocking on I/O:
//! - `RawSpinLock` / `SpinMutex`: spin lock implemented for `lock_api`
//! - `EventHandoffQueue`: bounded power-of-two ring buffer

pub mod ring;
pub mod spin;

pub use ring::EventHandoffQueue;
pub use spin::{RawSpinLock, SpinMutex, SpinMutexGuard};
