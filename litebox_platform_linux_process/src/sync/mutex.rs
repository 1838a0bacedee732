// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! pthread-style mutex over a recursive critical section

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use litebox_shim_process::{ProcessError, Result};

use super::BridgedPrimitive;
use super::lazy::LazyNative;

#[derive(Debug, Default)]
struct OwnerState {
    owner: Option<ThreadId>,
    recursion: u32,
}

/// Recursive critical section
#[derive(Debug, Default)]
pub struct CriticalSection {
    state: Mutex<OwnerState>,
    released: Condvar,
}

impl CriticalSection {
    fn state(&self) -> MutexGuard<'_, OwnerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, recursion: u32) {
        let me = thread::current().id();
        let mut state = self.state();
        if state.owner == Some(me) {
            state.recursion += recursion;
            return;
        }
        let mut state = self
            .released
            .wait_while(state, |s| s.owner.is_some())
            .unwrap_or_else(PoisonError::into_inner);
        state.owner = Some(me);
        state.recursion = recursion;
    }

    fn try_enter(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state();
        match state.owner {
            Some(owner) if owner == me => {
                state.recursion += 1;
                true
            }
            Some(_) => false,
            None => {
                state.owner = Some(me);
                state.recursion = 1;
                true
            }
        }
    }

    /// Release `all` levels or one; returns the levels released
    fn leave(&self, all: bool) -> Result<u32> {
        let me = thread::current().id();
        let mut state = self.state();
        if state.owner != Some(me) {
            return Err(ProcessError::NotOwner);
        }
        let released = if all { state.recursion } else { 1 };
        state.recursion -= released;
        if state.recursion == 0 {
            state.owner = None;
            drop(state);
            self.released.notify_one();
        }
        Ok(released)
    }
}

/// Mutex whose native critical section is created on first use
#[derive(Debug, Default)]
pub struct BridgedMutex {
    native: LazyNative<CriticalSection>,
}

impl BridgedMutex {
    pub const fn new() -> Self {
        Self {
            native: LazyNative::new(),
        }
    }

    fn native(&self) -> &CriticalSection {
        self.native.get_or_init(CriticalSection::default)
    }

    /// Block until the calling thread owns the mutex; recursive
    pub fn lock(&self) -> Result<()> {
        self.native().enter(1);
        Ok(())
    }

    /// `Busy` when another thread holds it
    pub fn try_lock(&self) -> Result<()> {
        if self.native().try_enter() {
            Ok(())
        } else {
            Err(ProcessError::Busy)
        }
    }

    /// Release one level
    ///
    /// Unlocking a mutex that was never used succeeds; unlocking one held by
    /// another thread is `NotOwner`.
    pub fn unlock(&self) -> Result<()> {
        match self.native.get() {
            None => Ok(()),
            Some(native) => native.leave(false).map(|_| ()),
        }
    }

    /// Does the calling thread hold the mutex?
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.native
            .get()
            .is_some_and(|n| n.state().owner == Some(thread::current().id()))
    }

    /// Drop every level held by the caller, for a condition wait
    pub(crate) fn release_all(&self) -> Result<u32> {
        self.native.get().ok_or(ProcessError::NotOwner)?.leave(true)
    }

    /// Take the mutex back after a condition wait
    pub(crate) fn reacquire(&self, recursion: u32) {
        self.native().enter(recursion);
    }
}

impl BridgedPrimitive for BridgedMutex {
    fn is_initialized(&self) -> bool {
        self.native.is_initialized()
    }

    fn destroy(&mut self) -> Result<()> {
        if let Some(native) = self.native.get() {
            let state = native.state();
            match state.owner {
                None => {}
                Some(owner) if owner == thread::current().id() => {
                    log::warn!("destroying a mutex held {} time(s) by the caller", state.recursion);
                }
                Some(_) => return Err(ProcessError::Busy),
            }
        }
        drop(self.native.take());
        Ok(())
    }
}
