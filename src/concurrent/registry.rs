// Copyright (c) 2025 RustyPool Contributors
//
// Copy-on-write registry of worker deques
//
// Stealers need random-index access to every live deque without taking a
// lock. The registry keeps the registered deques in an immutable array
// behind an atomically published pointer: writers build a new array and CAS
// it in, superseded arrays are retired through the epoch scheme once every
// reader has moved on. Readers therefore always observe a complete,
// untorn snapshot.

use super::deque::WorkStealingDeque;
use super::Backoff;
use crossbeam::epoch::{self, Atomic, Guard, Owned};
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub struct DequeRegistry<T> {
    snapshot: Atomic<Vec<Arc<WorkStealingDeque<T>>>>,
}

impl<T> DequeRegistry<T> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            snapshot: Atomic::new(Vec::new()),
        }
    }

    /// Register a deque, appending it at the end of the snapshot
    pub fn register(&self, deque: &Arc<WorkStealingDeque<T>>) {
        self.publish(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(Arc::clone(deque));
            Some(next)
        });
    }

    /// Unregister a deque; removing an absent entry is a no-op
    pub fn unregister(&self, deque: &Arc<WorkStealingDeque<T>>) {
        self.publish(|current| {
            if !current.iter().any(|entry| Arc::ptr_eq(entry, deque)) {
                return None;
            }
            Some(
                current
                    .iter()
                    .filter(|entry| !Arc::ptr_eq(entry, deque))
                    .cloned()
                    .collect(),
            )
        });
    }

    /// Obtain a stable snapshot of the registered deques
    ///
    /// The slice stays valid for the lifetime of the guard even while other
    /// threads register or unregister.
    pub fn snapshot<'g>(&self, guard: &'g Guard) -> &'g [Arc<WorkStealingDeque<T>>] {
        unsafe { self.snapshot.load(Ordering::Acquire, guard).deref() }.as_slice()
    }

    /// Get the current number of registered deques
    pub fn len(&self) -> usize {
        let guard = &epoch::pin();
        self.snapshot(guard).len()
    }

    /// Check if no deques are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish<F>(&self, rebuild: F)
    where
        F: Fn(&[Arc<WorkStealingDeque<T>>]) -> Option<Vec<Arc<WorkStealingDeque<T>>>>,
    {
        let guard = &epoch::pin();
        let mut backoff = Backoff::new();
        loop {
            let current = self.snapshot.load(Ordering::Acquire, guard);
            let next = match rebuild(unsafe { current.deref() }.as_slice()) {
                Some(next) => next,
                None => return,
            };
            match self.snapshot.compare_exchange(
                current,
                Owned::new(next),
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(_) => {
                    // Safety: readers still inside the epoch keep the old
                    // snapshot alive until their guards drop
                    unsafe { guard.defer_destroy(current) };
                    return;
                }
                Err(_) => backoff.spin(),
            }
        }
    }
}

impl<T> Default for DequeRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for DequeRegistry<T> {
    fn drop(&mut self) {
        // Safety: no other thread holds a reference during drop
        unsafe {
            let guard = epoch::unprotected();
            let snapshot = self.snapshot.load(Ordering::Relaxed, guard);
            drop(snapshot.into_owned());
        }
    }
}
