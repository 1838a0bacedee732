// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Counting semaphore and auto-reset event used by the condition variable

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

#[derive(Debug, Default)]
pub(crate) struct Semaphore {
    count: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    fn count(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take one token, waiting until `deadline`; false on timeout
    pub(crate) fn acquire(&self, deadline: Option<Instant>) -> bool {
        let mut count = self.count();
        while *count == 0 {
            match deadline {
                None => {
                    count = self.available.wait(count).unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                        return false;
                    };
                    count = self
                        .available
                        .wait_timeout(count, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
        *count -= 1;
        true
    }

    pub(crate) fn try_acquire(&self) -> bool {
        let mut count = self.count();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    pub(crate) fn release(&self, tokens: usize) {
        if tokens == 0 {
            return;
        }
        *self.count() += tokens;
        if tokens == 1 {
            self.available.notify_one();
        } else {
            self.available.notify_all();
        }
    }

    #[cfg(test)]
    pub(crate) fn available(&self) -> usize {
        *self.count()
    }
}

/// Event that releases one waiter and resets itself
#[derive(Debug, Default)]
pub(crate) struct AutoResetEvent {
    signaled: Mutex<bool>,
    changed: Condvar,
}

impl AutoResetEvent {
    pub(crate) fn set(&self) {
        *self.signaled.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.changed.notify_one();
    }

    pub(crate) fn wait(&self) {
        let signaled = self.signaled.lock().unwrap_or_else(PoisonError::into_inner);
        let mut signaled = self
            .changed
            .wait_while(signaled, |s| !*s)
            .unwrap_or_else(PoisonError::into_inner);
        *signaled = false;
    }
}
