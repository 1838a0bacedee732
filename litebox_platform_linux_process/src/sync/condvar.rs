// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Condition variable (Schmidt construction)
//!
//! Waiters are counted under an internal lock and sleep on a counting
//! semaphore. `signal` releases one token if some waiter has none;
//! `broadcast` releases one token per waiter and blocks until the last of
//! them has woken, so a broadcast never wakes a thread that started waiting
//! after it. Wakeups are never stored: with no waiter, `signal` and
//! `broadcast` do nothing.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use litebox_shim_process::{ProcessError, Result};

use super::lazy::LazyNative;
use super::mutex::BridgedMutex;
use super::semaphore::{AutoResetEvent, Semaphore};
use super::{BridgedPrimitive, WaitStatus};

#[derive(Debug, Default)]
struct WaitersState {
    waiters: usize,
    /// Tokens released and not consumed yet
    outstanding: usize,
    was_broadcast: bool,
}

#[derive(Debug, Default)]
pub struct SchmidtCondvar {
    state: Mutex<WaitersState>,
    /// New waiters queue here while a broadcast is in progress
    broadcast_over: Condvar,
    tokens: Semaphore,
    waiters_done: AutoResetEvent,
}

impl SchmidtCondvar {
    fn state(&self) -> MutexGuard<'_, WaitersState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait(&self, mutex: &BridgedMutex, deadline: Option<Instant>) -> Result<WaitStatus> {
        {
            let state = self.state();
            let mut state = self
                .broadcast_over
                .wait_while(state, |s| s.was_broadcast)
                .unwrap_or_else(PoisonError::into_inner);
            state.waiters += 1;
        }

        let recursion = match mutex.release_all() {
            Ok(recursion) => recursion,
            Err(e) => {
                self.state().waiters -= 1;
                return Err(e);
            }
        };

        let mut signaled = self.tokens.acquire(deadline);

        let mut state = self.state();
        state.waiters -= 1;
        if signaled {
            state.outstanding -= 1;
        } else if state.outstanding > state.waiters && self.tokens.try_acquire() {
            // A token was released for this waiter after its timeout
            state.outstanding -= 1;
            signaled = true;
        }
        let last = state.was_broadcast && state.outstanding == 0;
        drop(state);

        if last {
            self.waiters_done.set();
        }
        mutex.reacquire(recursion);

        Ok(if signaled {
            WaitStatus::Signaled
        } else {
            WaitStatus::TimedOut
        })
    }

    fn signal(&self) {
        let mut state = self.state();
        if state.waiters > state.outstanding {
            state.outstanding += 1;
            self.tokens.release(1);
        }
    }

    fn broadcast(&self) {
        let mut state = self.state();
        if state.waiters <= state.outstanding {
            return;
        }
        let wake = state.waiters - state.outstanding;
        state.outstanding += wake;
        state.was_broadcast = true;
        self.tokens.release(wake);
        drop(state);

        self.waiters_done.wait();

        self.state().was_broadcast = false;
        self.broadcast_over.notify_all();
    }
}

/// Condition variable whose native state is created on first wait
#[derive(Debug, Default)]
pub struct BridgedCondvar {
    native: LazyNative<SchmidtCondvar>,
}

impl BridgedCondvar {
    pub const fn new() -> Self {
        Self {
            native: LazyNative::new(),
        }
    }

    /// Release `mutex`, wait for a signal, take `mutex` back
    ///
    /// # Errors
    ///
    /// `NotOwner` if the caller does not hold `mutex`.
    pub fn wait(&self, mutex: &BridgedMutex) -> Result<()> {
        self.native
            .get_or_init(SchmidtCondvar::default)
            .wait(mutex, None)
            .map(|_| ())
    }

    /// Like [`wait`](Self::wait) with an absolute deadline
    pub fn timed_wait(&self, mutex: &BridgedMutex, deadline: Instant) -> Result<WaitStatus> {
        self.native
            .get_or_init(SchmidtCondvar::default)
            .wait(mutex, Some(deadline))
    }

    /// Wake one waiter, if any
    pub fn signal(&self) -> Result<()> {
        if let Some(native) = self.native.get() {
            native.signal();
        }
        Ok(())
    }

    /// Wake every current waiter; blocks until all of them have woken
    pub fn broadcast(&self) -> Result<()> {
        if let Some(native) = self.native.get() {
            native.broadcast();
        }
        Ok(())
    }
}

impl BridgedPrimitive for BridgedCondvar {
    fn is_initialized(&self) -> bool {
        self.native.is_initialized()
    }

    fn destroy(&mut self) -> Result<()> {
        if let Some(native) = self.native.get() {
            if native.state().waiters > 0 {
                return Err(ProcessError::Busy);
            }
        }
        drop(self.native.take());
        Ok(())
    }
}
