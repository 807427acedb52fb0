use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Shared stop signal observed by every playback thread.
///
/// Clones share the same flag. Cancelling is sticky and idempotent: only the
/// first `cancel` flips the flag and reports it, later calls are no-ops.
#[derive(Debug)]
pub struct SignalOfStop {
    // Shared state between clones
    shared: Arc<SharedState>,
}

#[derive(Debug)]
struct SharedState {
    closing: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl SignalOfStop {
    pub fn new() -> SignalOfStop {
        SignalOfStop {
            shared: Arc::new(SharedState {
                closing: AtomicBool::new(false),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Raise the signal. Returns `true` only for the call that performed the
    /// transition.
    pub fn cancel(&self) -> bool {
        if self.shared.closing.swap(true, Ordering::AcqRel) {
            return false;
        }

        // Lock briefly to synchronize with threads between their check and their wait
        let _guard = self
            .shared
            .mutex
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.shared.condvar.notify_all();
        true
    }

    pub fn cancelled(&self) -> bool {
        self.shared.closing.load(Ordering::Acquire)
    }

    pub fn wait_cancellation(&self) {
        let mut guard = self
            .shared
            .mutex
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while !self.cancelled() {
            guard = self
                .shared
                .condvar
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Sleep for at most `timeout`, waking early on cancellation.
    ///
    /// Returns `true` if the signal was raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self
            .shared
            .mutex
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while !self.cancelled() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .shared
                .condvar
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

impl Default for SignalOfStop {
    fn default() -> Self {
        Self::new()
    }
}

// Implementing the Clone trait
impl Clone for SignalOfStop {
    fn clone(&self) -> SignalOfStop {
        SignalOfStop {
            shared: Arc::clone(&self.shared),
        }
    }
}
