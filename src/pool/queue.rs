// Copyright (c) 2025 RustyPool Contributors
//
// Two-tier work queue and worker-activation protocol
//
// Work enters either the caller's own deque (when the caller is a worker of
// this pool) or the shared injection queue. Every enqueue records an
// activation slot and guarantees at least one pending semaphore release,
// coalesced through a single outstanding-request flag so an enqueue storm
// wakes workers one at a time instead of all at once.

use super::{worker, Task};
use crate::concurrent::{DequeRegistry, InjectionQueue, Steal, UnfairSemaphore, WorkStealingDeque};
use crate::error::{PoolError, Result};
use crossbeam::epoch;
use std::sync::atomic::{fence, AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

pub(crate) struct PoolWorkQueue {
    /// Identity of the owning pool, matched against the caller's
    /// thread-local worker record
    pub(crate) pool_id: u64,
    pub(crate) injection: InjectionQueue<Task>,
    pub(crate) registry: DequeRegistry<Task>,
    pub(crate) semaphore: UnfairSemaphore,
    /// One-way shutdown flag; enqueue rejects once set
    pub(crate) shutdown: AtomicBool,
    /// Activation slots not yet claimed by a dispatching worker
    num_requested_workers: AtomicI32,
    /// Coalesces wake-ups: at most one release is pending at a time
    has_outstanding_thread_request: AtomicI32,
    /// Statistics
    pub(crate) tasks_submitted: AtomicU64,
    pub(crate) tasks_stolen: AtomicU64,
}

impl PoolWorkQueue {
    pub(crate) fn new(pool_id: u64) -> Self {
        Self {
            pool_id,
            injection: InjectionQueue::new(),
            registry: DequeRegistry::new(),
            semaphore: UnfairSemaphore::new(),
            shutdown: AtomicBool::new(false),
            num_requested_workers: AtomicI32::new(0),
            has_outstanding_thread_request: AtomicI32::new(0),
            tasks_submitted: AtomicU64::new(0),
            tasks_stolen: AtomicU64::new(0),
        }
    }

    /// Enqueue a work item and request a worker for it
    ///
    /// The item lands on the caller's own deque when the caller is a worker
    /// of this pool and `force_global` is false; otherwise it goes through
    /// the injection queue.
    pub(crate) fn enqueue(&self, task: Task, force_global: bool) -> Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::Shutdown);
        }

        let task = if force_global {
            Some(task)
        } else {
            match worker::try_push_local(self.pool_id, task) {
                Ok(()) => None,
                Err(task) => Some(task),
            }
        };
        if let Some(task) = task {
            self.injection.push(task);
        }

        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
        self.request_active_worker();
        self.ensure_thread_requested();
        Ok(())
    }

    /// Guarantee that one semaphore release is pending for the work just
    /// enqueued, without stacking a release per enqueue
    pub(crate) fn ensure_thread_requested(&self) {
        if self
            .has_outstanding_thread_request
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            self.semaphore.release(1);
        }
    }

    /// Clear the outstanding-request flag so the next enqueue can wake
    /// another worker; must run before the dispatcher touches real work
    pub(crate) fn mark_thread_request_satisfied(&self) {
        self.has_outstanding_thread_request.store(0, Ordering::Relaxed);
        fence(Ordering::SeqCst);
    }

    /// Record an activation slot for a newly enqueued item
    pub(crate) fn request_active_worker(&self) {
        self.num_requested_workers.fetch_add(1, Ordering::SeqCst);
    }

    /// Claim an activation slot; returns false once none remain
    pub(crate) fn take_active_request(&self) -> bool {
        let mut count = self.num_requested_workers.load(Ordering::Acquire);
        while count > 0 {
            match self.num_requested_workers.compare_exchange_weak(
                count,
                count - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => count = actual,
            }
        }
        false
    }

    /// Find the next work item: own deque first, then the injection queue,
    /// then one randomized pass over the other workers' deques
    pub(crate) fn dequeue(
        &self,
        own: &Arc<WorkStealingDeque<Task>>,
        rng: &mut fastrand::Rng,
    ) -> Option<Task> {
        if let Some(task) = own.pop() {
            return Some(task);
        }
        if let Some(task) = self.injection.try_pop() {
            return Some(task);
        }
        self.try_steal(own, rng)
    }

    fn try_steal(&self, own: &Arc<WorkStealingDeque<Task>>, rng: &mut fastrand::Rng) -> Option<Task> {
        let guard = &epoch::pin();
        let victims = self.registry.snapshot(guard);
        let count = victims.len();
        if count == 0 {
            return None;
        }

        let start = rng.usize(..count);
        for offset in 0..count {
            let victim = &victims[(start + offset) % count];
            if Arc::ptr_eq(victim, own) {
                continue;
            }
            match victim.steal() {
                Steal::Success(task) => {
                    self.tasks_stolen.fetch_add(1, Ordering::Relaxed);
                    return Some(task);
                }
                // A contended victim is skipped for this pass
                Steal::Empty | Steal::Retry => {}
            }
        }
        None
    }
}
