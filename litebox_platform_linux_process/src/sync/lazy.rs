// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! One-time installation of a native object behind an atomic pointer

use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

/// A heap-allocated native object installed on first use
///
/// Concurrent first users race with a single compare-and-swap; every loser
/// frees the object it built and uses the winner's.
pub struct LazyNative<T> {
    ptr: AtomicPtr<T>,
    _owns: PhantomData<Box<T>>,
}

// SAFETY: the pointee is only shared through `&T` once installed and is
// freed either through `&mut self` or on drop
unsafe impl<T: Send + Sync> Send for LazyNative<T> {}
// SAFETY: see above
unsafe impl<T: Send + Sync> Sync for LazyNative<T> {}

impl<T> LazyNative<T> {
    pub const fn new() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
            _owns: PhantomData,
        }
    }

    /// The installed object, if any
    pub fn get(&self) -> Option<&T> {
        let current = self.ptr.load(Ordering::Acquire);
        // SAFETY: a non-null pointer came from `Box::into_raw` and stays
        // valid until `take` (which needs `&mut self`) or drop
        unsafe { current.as_ref() }
    }

    pub fn is_initialized(&self) -> bool {
        !self.ptr.load(Ordering::Acquire).is_null()
    }

    /// Install the object built by `init` unless another thread wins
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        if let Some(existing) = self.get() {
            return existing;
        }

        let fresh = Box::into_raw(Box::new(init()));
        match self
            .ptr
            .compare_exchange(ptr::null_mut(), fresh, Ordering::AcqRel, Ordering::Acquire)
        {
            // SAFETY: we just installed `fresh`
            Ok(_) => unsafe { &*fresh },
            Err(winner) => {
                // SAFETY: `fresh` never became visible to other threads
                drop(unsafe { Box::from_raw(fresh) });
                // SAFETY: the winner's pointer is installed and valid
                unsafe { &*winner }
            }
        }
    }

    /// Uninstall the object, returning to the uninitialized state
    pub fn take(&mut self) -> Option<Box<T>> {
        let current = core::mem::replace(self.ptr.get_mut(), ptr::null_mut());
        // SAFETY: exclusive access; the pointer came from `Box::into_raw`
        (!current.is_null()).then(|| unsafe { Box::from_raw(current) })
    }
}

impl<T> Default for LazyNative<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LazyNative<T> {
    fn drop(&mut self) {
        drop(self.take());
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for LazyNative<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.get() {
            Some(native) => f.debug_tuple("LazyNative").field(native).finish(),
            None => f.write_str("LazyNative(<uninitialized>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    struct Counted<'a> {
        drops: &'a AtomicUsize,
    }

    impl Drop for Counted<'_> {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_race_installs_exactly_one() {
        const THREADS: usize = 8;
        let built = AtomicUsize::new(0);
        let drops = AtomicUsize::new(0);
        let lazy = LazyNative::new();
        let barrier = Barrier::new(THREADS);

        let addresses: Vec<usize> = thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        let native = lazy.get_or_init(|| {
                            built.fetch_add(1, Ordering::SeqCst);
                            Counted { drops: &drops }
                        });
                        ptr::from_ref(native) as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(addresses.windows(2).all(|w| w[0] == w[1]));
        let built = built.load(Ordering::SeqCst);
        assert!(built >= 1);
        // Every loser freed its own allocation
        assert_eq!(drops.load(Ordering::SeqCst), built - 1);

        drop(lazy);
        assert_eq!(drops.load(Ordering::SeqCst), built);
    }

    #[test]
    fn test_take_resets() {
        let mut lazy = LazyNative::new();
        assert!(!lazy.is_initialized());
        assert_eq!(*lazy.get_or_init(|| 5), 5);
        assert_eq!(*lazy.get_or_init(|| 6), 5);
        assert_eq!(lazy.take().map(|b| *b), Some(5));
        assert!(lazy.get().is_none());
        assert_eq!(*lazy.get_or_init(|| 7), 7);
    }
}
