// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! pthread-style read/write lock over a shared/exclusive resource

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use litebox_shim_process::{ProcessError, Result};

use super::BridgedPrimitive;
use super::lazy::LazyNative;

#[derive(Debug, Default)]
struct ResourceState {
    /// Shared holds per thread
    readers: HashMap<ThreadId, u32>,
    writer: Option<ThreadId>,
    write_recursion: u32,
    /// Bumped whenever the resource becomes free for someone new
    generation: u64,
}

impl ResourceState {
    fn holders_other_than(&self, me: ThreadId) -> bool {
        self.writer.is_some_and(|w| w != me) || self.readers.keys().any(|&r| r != me)
    }
}

/// Shared/exclusive resource
#[derive(Debug, Default)]
pub struct Resource {
    state: Mutex<ResourceState>,
    released: Condvar,
}

impl Resource {
    fn state(&self) -> MutexGuard<'_, ResourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One attempt; `Err(generation)` when the caller has to wait
    fn try_acquire(&self, exclusive: bool) -> Result<core::result::Result<(), u64>> {
        let me = thread::current().id();
        let mut state = self.state();

        if state.writer == Some(me) {
            // Exclusive owners may nest either kind
            state.write_recursion += 1;
            return Ok(Ok(()));
        }

        if exclusive {
            if state.readers.contains_key(&me) {
                return Err(ProcessError::Busy);
            }
            if state.writer.is_none() && state.readers.is_empty() {
                state.writer = Some(me);
                state.write_recursion = 1;
                return Ok(Ok(()));
            }
        } else if state.writer.is_none() {
            state.readers.try_reserve(1)?;
            *state.readers.entry(me).or_insert(0) += 1;
            return Ok(Ok(()));
        }
        Ok(Err(state.generation))
    }

    fn wait_for_release(&self, observed: u64) {
        let state = self.state();
        drop(
            self.released
                .wait_while(state, |s| s.generation == observed)
                .unwrap_or_else(PoisonError::into_inner),
        );
    }

    fn acquire(&self, exclusive: bool) -> Result<()> {
        loop {
            match self.try_acquire(exclusive)? {
                Ok(()) => return Ok(()),
                Err(generation) => self.wait_for_release(generation),
            }
        }
    }

    fn release(&self) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.state();
        if state.writer == Some(me) {
            state.write_recursion -= 1;
            if state.write_recursion > 0 {
                return Ok(());
            }
            state.writer = None;
        } else {
            let Some(count) = state.readers.get_mut(&me) else {
                return Err(ProcessError::NotOwner);
            };
            *count -= 1;
            if *count > 0 {
                return Ok(());
            }
            state.readers.remove(&me);
            if !state.readers.is_empty() {
                return Ok(());
            }
        }
        state.generation = state.generation.wrapping_add(1);
        drop(state);
        self.released.notify_all();
        Ok(())
    }
}

/// Read/write lock whose native resource is created on first use
#[derive(Debug, Default)]
pub struct BridgedRwLock {
    native: LazyNative<Resource>,
}

impl BridgedRwLock {
    pub const fn new() -> Self {
        Self {
            native: LazyNative::new(),
        }
    }

    fn native(&self) -> &Resource {
        self.native.get_or_init(Resource::default)
    }

    pub fn read(&self) -> Result<()> {
        self.native().acquire(false)
    }

    /// `Busy` when the caller already holds a read lock
    pub fn write(&self) -> Result<()> {
        self.native().acquire(true)
    }

    pub fn try_read(&self) -> Result<()> {
        self.native()
            .try_acquire(false)?
            .map_err(|_| ProcessError::Busy)
    }

    pub fn try_write(&self) -> Result<()> {
        self.native()
            .try_acquire(true)?
            .map_err(|_| ProcessError::Busy)
    }

    /// Release the caller's innermost hold
    pub fn unlock(&self) -> Result<()> {
        match self.native.get() {
            None => Ok(()),
            Some(native) => native.release(),
        }
    }
}

impl BridgedPrimitive for BridgedRwLock {
    fn is_initialized(&self) -> bool {
        self.native.is_initialized()
    }

    fn destroy(&mut self) -> Result<()> {
        if let Some(native) = self.native.get() {
            let me = thread::current().id();
            let state = native.state();
            if state.holders_other_than(me) {
                return Err(ProcessError::Busy);
            }
            if state.writer.is_some() || !state.readers.is_empty() {
                log::warn!("destroying a read/write lock held by the caller");
            }
        }
        drop(self.native.take());
        Ok(())
    }
}
