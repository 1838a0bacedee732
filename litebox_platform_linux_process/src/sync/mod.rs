// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Synchronization primitive bridge
//!
//! POSIX-style mutex, read/write lock and condition variable backed by
//! native objects (a recursive critical section, a shared/exclusive resource
//! and a Schmidt condition variable). Each primitive starts uninitialized and
//! installs its native object on first use; `destroy` returns it to that
//! state.

mod condvar;
mod lazy;
mod mutex;
mod rwlock;
mod semaphore;

pub use condvar::{BridgedCondvar, SchmidtCondvar};
pub use lazy::LazyNative;
pub use mutex::{BridgedMutex, CriticalSection};
pub use rwlock::{BridgedRwLock, Resource};

use litebox_shim_process::Result;

/// Result of a timed condition wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Signaled,
    TimedOut,
}

/// Lifecycle shared by the bridged primitives
pub trait BridgedPrimitive {
    /// Has the native object been installed?
    fn is_initialized(&self) -> bool;

    /// Free the native object and return to the uninitialized state
    ///
    /// A primitive held by the calling thread is released and destroyed
    /// with a warning. One held by any other thread is left alone and
    /// `Busy` is returned.
    fn destroy(&mut self) -> Result<()>;
}
