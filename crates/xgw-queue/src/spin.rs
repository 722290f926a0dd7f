//! Test-and-test-and-set spin lock exposed through `lock_api`.

use lock_api::{GuardSend, RawMutex};
use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Spins this many times before yielding the time slice.
const SPINS_BEFORE_YIELD: u32 = 64;

/// Raw spin lock over a single atomic flag.
///
/// Acquisition spins with `spin_loop` and then falls back to
/// `thread::yield_now`; it never parks. A holder that is preempted stalls
/// every waiter until it is rescheduled.
pub struct RawSpinLock {
    locked: AtomicBool,
}

unsafe impl RawMutex for RawSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        locked: AtomicBool::new(false),
    };

    type GuardMarker = GuardSend;

    fn lock(&self) {
        let mut spins = 0u32;
        loop {
            if self.try_lock() {
                return;
            }
            // Wait on a plain load so contended CAS traffic stays off the line.
            while self.locked.load(Ordering::Relaxed) {
                if spins < SPINS_BEFORE_YIELD {
                    spins += 1;
                    hint::spin_loop();
                } else {
                    thread::yield_now();
                }
            }
        }
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// Mutex guarded by [`RawSpinLock`].
pub type SpinMutex<T> = lock_api::Mutex<RawSpinLock, T>;
pub type SpinMutexGuard<'a, T> = lock_api::MutexGuard<'a, RawSpinLock, T>;
