//! Counting semaphore the lifecycle controller uses to wake workers that are
//! sleeping between polls, or pumping USB completions, when a recording stops

use std::{
    sync::{Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

#[derive(Debug, Default)]
pub struct Semaphore {
    count: Mutex<u64>,
    condition: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release one permit and wake a single waiter
    pub fn notify(&self) {
        *self.lock() += 1;
        self.condition.notify_one();
    }

    /// Take a permit if one is available without blocking
    pub fn try_wait(&self) -> bool {
        let mut count = self.lock();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    /// Block until a permit is available or `timeout` passes. Returns whether a permit was taken.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.lock();
        while *count == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = self
                .condition
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
        *count -= 1;
        true
    }

    // The count is a plain integer, a panicking holder can't leave it inconsistent
    fn lock(&self) -> MutexGuard<'_, u64> {
        self.count
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
