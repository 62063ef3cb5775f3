// Copyright (c) 2025 RustyPool Contributors
//
// Worker lifecycle and dispatch loop
//
// Each worker owns a registered deque and parks on the pool semaphore
// between bursts. A woken worker claims activation slots and runs dispatch
// rounds bounded by the time quantum; a worker that times out while the
// population is above the floor retires, spilling any local work back to
// the injection queue first.

use super::{PoolInner, Task, DISPATCH_QUANTUM};
use crate::concurrent::WorkStealingDeque;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

thread_local! {
    static CURRENT_WORKER: RefCell<Option<CurrentWorker>> = const { RefCell::new(None) };
}

/// Thread-local record identifying the calling thread as a worker
///
/// The pool id keeps coexisting pools apart: a worker of pool A submitting
/// to pool B must fall through to B's injection queue.
struct CurrentWorker {
    pool_id: u64,
    worker_id: usize,
    deque: Arc<WorkStealingDeque<Task>>,
}

/// Push onto the calling worker's deque if the caller is a worker of the
/// given pool; hands the task back otherwise
pub(crate) fn try_push_local(pool_id: u64, task: Task) -> std::result::Result<(), Task> {
    CURRENT_WORKER.with(|cell| match cell.borrow().as_ref() {
        Some(current) if current.pool_id == pool_id => {
            current.deque.push(task);
            Ok(())
        }
        _ => Err(task),
    })
}

/// Get the calling thread's worker id within the given pool, if any
pub(crate) fn current_worker_id(pool_id: u64) -> Option<usize> {
    CURRENT_WORKER.with(|cell| {
        cell.borrow()
            .as_ref()
            .filter(|current| current.pool_id == pool_id)
            .map(|current| current.worker_id)
    })
}

/// Worker thread entry point
pub(crate) fn run(inner: Arc<PoolInner>, worker_id: usize) {
    let deque: Arc<WorkStealingDeque<Task>> = Arc::new(WorkStealingDeque::new());
    inner.queue.registry.register(&deque);
    CURRENT_WORKER.with(|cell| {
        *cell.borrow_mut() = Some(CurrentWorker {
            pool_id: inner.queue.pool_id,
            worker_id,
            deque: Arc::clone(&deque),
        })
    });
    let mut rng = fastrand::Rng::new();
    tracing::debug!("worker {} started", worker_id);

    let mut retired = false;
    loop {
        if inner.queue.shutdown.load(Ordering::Acquire) {
            break;
        }

        inner.parked_workers.fetch_add(1, Ordering::SeqCst);
        let acquired = inner.queue.semaphore.wait(inner.settings.thread_timeout);
        inner.parked_workers.fetch_sub(1, Ordering::SeqCst);

        if inner.queue.shutdown.load(Ordering::Acquire) {
            break;
        }

        if !acquired {
            // Idle past the timeout: retire if the population stays above
            // the configured floor
            if inner.try_retire() {
                tracing::debug!("worker {} retiring after idle timeout", worker_id);
                retired = true;
                break;
            }
            continue;
        }

        // Clear the outstanding request this wake consumed, even if no
        // activation slot is left; otherwise a later enqueue would see the
        // flag still set and never release
        inner.queue.mark_thread_request_satisfied();

        while inner.queue.take_active_request() {
            let productive = dispatch(&inner, &deque, &mut rng);
            if !productive {
                break;
            }
            // Soften start/stop churn between dispatch rounds
            std::thread::yield_now();
            if inner.processor_count > 1 {
                for _ in 0..64 {
                    std::hint::spin_loop();
                }
            }
        }
    }

    if inner.queue.shutdown.load(Ordering::Acquire) {
        drain(&inner, &deque, &mut rng);
    }

    // Spill unfinished local work before the deque disappears
    let mut spilled = 0u64;
    while let Some(task) = deque.pop() {
        inner.queue.injection.push(task);
        spilled += 1;
    }
    if spilled > 0 {
        inner.queue.request_active_worker();
        inner.queue.ensure_thread_requested();
    }

    inner.queue.registry.unregister(&deque);
    CURRENT_WORKER.with(|cell| *cell.borrow_mut() = None);

    if retired {
        inner.stats.workers_retired.fetch_add(1, Ordering::Relaxed);
    } else {
        // Shutdown exit: the retire path already gave up its slot
        inner.live_workers.fetch_sub(1, Ordering::AcqRel);
    }
    tracing::debug!("worker {} exited", worker_id);
}

/// One dispatch round
///
/// Returns true if the round did useful work and the worker should keep its
/// activation claim pattern going; false signals the caller that this
/// worker found nothing and is surplus.
fn dispatch(
    inner: &Arc<PoolInner>,
    deque: &Arc<WorkStealingDeque<Task>>,
    rng: &mut fastrand::Rng,
) -> bool {
    let queue = &inner.queue;

    // Let the next enqueue wake another worker before we settle into work
    queue.mark_thread_request_satisfied();

    let mut current = queue.injection.try_pop();
    if current.is_none() {
        current = queue.dequeue(deque, rng);
        if current.is_none() {
            queue.ensure_thread_requested();
            return false;
        }
    }

    // We hold an item, and there may be more: recruit a peer
    queue.ensure_thread_requested();
    let start = Instant::now();

    loop {
        let task = match current.take() {
            Some(task) => task,
            None => match queue.dequeue(deque, rng) {
                Some(task) => task,
                None => {
                    queue.ensure_thread_requested();
                    return true;
                }
            },
        };

        run_task(inner, task);

        if start.elapsed() >= DISPATCH_QUANTUM {
            return true;
        }
    }
}

/// Drain every reachable item; used on shutdown so pending work completes
fn drain(inner: &Arc<PoolInner>, deque: &Arc<WorkStealingDeque<Task>>, rng: &mut fastrand::Rng) {
    while let Some(task) = inner.queue.dequeue(deque, rng) {
        run_task(inner, task);
    }
}

fn run_task(inner: &Arc<PoolInner>, task: Task) {
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(()) => {
            inner.stats.tasks_executed.fetch_add(1, Ordering::Relaxed);
        }
        Err(_) => {
            // A panicking work item must not take the worker down with it
            inner.stats.tasks_panicked.fetch_add(1, Ordering::Relaxed);
            tracing::error!("work item panicked; worker continues");
        }
    }
}
