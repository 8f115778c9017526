//! Manual-reset readiness event.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A level-triggered event: once signaled it stays signaled until `clear`.
///
/// Waiters are released by `signal` and never consume the signal.
#[derive(Debug, Default)]
pub struct Event {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the event and wake all waiters.
    pub fn signal(&self) {
        *self.flag() = true;
        self.cond.notify_all();
    }

    /// Reset the event.
    pub fn clear(&self) {
        *self.flag() = false;
    }

    pub fn is_signaled(&self) -> bool {
        *self.flag()
    }

    /// Block until the event is signaled.
    pub fn wait(&self) {
        let mut signaled = self.flag();
        while !*signaled {
            signaled = self
                .cond
                .wait(signaled)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the event is signaled or `timeout` elapses.
    ///
    /// Returns whether the event was signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.flag();
        while !*signaled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            signaled = self
                .cond
                .wait_timeout(signaled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        self.signaled.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
