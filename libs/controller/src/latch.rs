//! Remote readiness latch
//!
//! Counts remotes that completed registration and runs the registered
//! callback exactly once when the last one arrives. `stop_remotes` cancels
//! the latch; whichever of fire and cancel happens first wins.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, info};

pub type ReadyCallback = Box<dyn FnOnce() + Send>;

pub struct ReadinessLatch {
    expected: usize,
    arrived: AtomicUsize,
    /// Set by whichever of fire and cancel wins
    settled: AtomicBool,
    fired: AtomicBool,
    callback: Mutex<Option<ReadyCallback>>,
}

impl ReadinessLatch {
    pub fn new(expected: usize, callback: Option<ReadyCallback>) -> Self {
        Self {
            expected,
            arrived: AtomicUsize::new(0),
            settled: AtomicBool::new(false),
            fired: AtomicBool::new(false),
            callback: Mutex::new(callback),
        }
    }

    /// Record one remote reaching `Registered`. Returns true if this arrival
    /// fired the latch.
    pub fn arrive(&self) -> bool {
        let arrived = self.arrived.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(arrived, expected = self.expected, "Remote registered");
        if arrived != self.expected {
            return false;
        }

        if self
            .settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Readiness latch already cancelled");
            return false;
        }

        self.fired.store(true, Ordering::Release);
        info!(remotes = self.expected, "All remotes registered");
        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            callback();
        }
        true
    }

    /// Prevent the callback from ever running. Returns false if the latch
    /// had already fired or been cancelled.
    pub fn cancel(&self) -> bool {
        let won = self
            .settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.callback.lock().take();
            debug!(arrived = self.arrived(), expected = self.expected, "Readiness latch cancelled");
        }
        won
    }

    pub fn arrived(&self) -> usize {
        self.arrived.load(Ordering::Acquire)
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ReadinessLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessLatch")
            .field("expected", &self.expected)
            .field("arrived", &self.arrived())
            .field("fired", &self.has_fired())
            .finish()
    }
}
