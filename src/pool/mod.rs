// Copyright (c) 2025 RustyPool Contributors
//
// Dedicated thread pool
//
// A fixed-identity pool of worker threads built for short-running work
// items with low dispatch latency. Work submitted from a worker lands on
// that worker's own deque; work from outside goes through the shared
// injection queue. Parked workers are gated by the unfair semaphore, woken
// one at a time through the coalesced thread-request protocol, and retire
// after an idle timeout while the population stays above the configured
// floor.

mod queue;
mod worker;

use crate::concurrent::semaphore::{SemaphoreStats, MAX_WORKERS};
use crate::error::{PoolError, Result};
use parking_lot::Mutex;
use queue::PoolWorkQueue;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A unit of work: a parameterless callable run for its side effects
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

/// Wall-clock budget a worker spends inside one dispatch round before
/// yielding back to its outer loop
pub(crate) const DISPATCH_QUANTUM: Duration = Duration::from_millis(30);

/// Pool identities, so a worker of one pool submitting to another is
/// routed through the injection queue
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(0);

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Workers kept alive even when idle
    pub min_threads: u32,
    /// Hard ceiling on the worker population
    pub max_threads: u32,
    /// How long an idle worker above the floor waits before retiring
    pub thread_timeout: Duration,
    /// Pool name; worker threads are named "{name}-worker-{id}"
    pub name: String,
    /// Worker stack size in bytes; 0 selects the platform default
    pub thread_stack_size: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        let processors = num_cpus::get().max(1) as u32;
        Self {
            min_threads: processors,
            max_threads: processors * 2,
            thread_timeout: Duration::from_secs(1),
            name: "rusty-pool".to_string(),
            thread_stack_size: 0,
        }
    }
}

impl PoolSettings {
    /// Validate the settings against their allowed ranges
    pub fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            return Err(PoolError::Configuration(
                "max_threads must be at least 1".to_string(),
            ));
        }
        if self.min_threads > self.max_threads {
            return Err(PoolError::Configuration(format!(
                "min_threads ({}) must not exceed max_threads ({})",
                self.min_threads, self.max_threads
            )));
        }
        if self.max_threads > MAX_WORKERS as u32 {
            return Err(PoolError::Configuration(format!(
                "max_threads ({}) must not exceed {}",
                self.max_threads, MAX_WORKERS
            )));
        }
        if self.thread_timeout.is_zero() {
            return Err(PoolError::Configuration(
                "thread_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

struct WorkerHandle {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

/// Always-on pool counters
pub(crate) struct PoolCounters {
    pub(crate) workers_spawned: AtomicU64,
    pub(crate) workers_retired: AtomicU64,
    pub(crate) tasks_executed: AtomicU64,
    pub(crate) tasks_panicked: AtomicU64,
}

pub(crate) struct PoolInner {
    pub(crate) settings: PoolSettings,
    pub(crate) queue: PoolWorkQueue,
    /// Current worker population; slots are claimed before spawning and
    /// given back on retire/exit
    pub(crate) live_workers: AtomicU32,
    /// Workers currently inside a semaphore wait
    pub(crate) parked_workers: AtomicU32,
    next_worker_id: AtomicUsize,
    workers: Mutex<Vec<WorkerHandle>>,
    pub(crate) stats: PoolCounters,
    pub(crate) processor_count: usize,
}

impl PoolInner {
    /// Spawn one worker thread; the caller must already hold a live slot
    fn spawn_worker(self: &Arc<Self>) {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(self);

        let mut builder =
            std::thread::Builder::new().name(format!("{}-worker-{}", self.settings.name, id));
        if self.settings.thread_stack_size > 0 {
            builder = builder.stack_size(self.settings.thread_stack_size);
        }
        let handle = builder
            .spawn(move || worker::run(inner, id))
            .expect("failed to spawn worker thread");

        self.stats.workers_spawned.fetch_add(1, Ordering::Relaxed);
        self.workers.lock().push(WorkerHandle {
            id,
            handle: Some(handle),
        });
    }

    /// Spawn one extra worker when a submission finds nobody parked and
    /// the population is below the ceiling
    fn try_grow(self: &Arc<Self>) {
        if self.queue.shutdown.load(Ordering::Acquire)
            || self.parked_workers.load(Ordering::Acquire) > 0
        {
            return;
        }
        let max = self.settings.max_threads;
        let claimed = self
            .live_workers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < max).then_some(live + 1)
            })
            .is_ok();
        if claimed {
            self.spawn_worker();
        }
    }

    /// Give up a live slot if the population stays above the floor
    pub(crate) fn try_retire(&self) -> bool {
        let min = self.settings.min_threads;
        self.live_workers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live > min).then_some(live - 1)
            })
            .is_ok()
    }
}

/// Dedicated work-stealing thread pool
///
/// Work items run exactly once on one of the pool's own threads. Dropping
/// the pool disposes it: pending work is drained and every worker joined.
pub struct DedicatedThreadPool {
    inner: Arc<PoolInner>,
}

impl DedicatedThreadPool {
    /// Create a pool, eagerly spawning `min_threads` workers
    pub fn new(settings: PoolSettings) -> Result<Self> {
        settings.validate()?;
        let pool_id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);

        let inner = Arc::new(PoolInner {
            queue: PoolWorkQueue::new(pool_id),
            live_workers: AtomicU32::new(0),
            parked_workers: AtomicU32::new(0),
            next_worker_id: AtomicUsize::new(0),
            workers: Mutex::new(Vec::with_capacity(settings.min_threads as usize)),
            stats: PoolCounters {
                workers_spawned: AtomicU64::new(0),
                workers_retired: AtomicU64::new(0),
                tasks_executed: AtomicU64::new(0),
                tasks_panicked: AtomicU64::new(0),
            },
            processor_count: num_cpus::get().max(1),
            settings,
        });

        for _ in 0..inner.settings.min_threads {
            inner.live_workers.fetch_add(1, Ordering::SeqCst);
            inner.spawn_worker();
        }
        tracing::debug!(
            "pool '{}' started with {} workers (max {})",
            inner.settings.name,
            inner.settings.min_threads,
            inner.settings.max_threads
        );

        Ok(Self { inner })
    }

    /// Submit a work item
    ///
    /// When the calling thread is a worker of this pool the item lands on
    /// that worker's own deque; otherwise it goes through the injection
    /// queue. A panic inside the item is caught, logged, and counted; the
    /// worker survives.
    pub fn submit<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_task(Box::new(work), false)
    }

    /// Submit a work item straight to the injection queue, even from a
    /// worker of this pool
    pub fn submit_global<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_task(Box::new(work), true)
    }

    fn submit_task(&self, task: Task, force_global: bool) -> Result<()> {
        self.inner.queue.enqueue(task, force_global)?;
        self.inner.try_grow();
        Ok(())
    }

    /// Shut the pool down: reject new work, drain what is pending, and
    /// join every worker. Idempotent; safe to call more than once.
    pub fn dispose(&self) {
        let inner = &self.inner;
        if !inner.queue.shutdown.swap(true, Ordering::AcqRel) {
            tracing::debug!("pool '{}' shutting down", inner.settings.name);
        }

        // Wake every parked worker so it can observe the flag and drain
        let live = inner.live_workers.load(Ordering::Acquire);
        if live > 0 {
            inner.queue.semaphore.release(live.min(MAX_WORKERS as u32) as u16);
        }

        // A worker disposing its own pool cannot join itself
        let own_id = worker::current_worker_id(inner.queue.pool_id);
        let handles: Vec<WorkerHandle> = {
            let mut workers = inner.workers.lock();
            workers.drain(..).collect()
        };
        for mut entry in handles {
            if Some(entry.id) == own_id {
                continue;
            }
            if let Some(handle) = entry.handle.take() {
                let _ = handle.join();
            }
        }
    }

    /// Get a snapshot of the pool counters
    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        let injection = inner.queue.injection.stats();
        PoolStats {
            workers_live: inner.live_workers.load(Ordering::Relaxed),
            workers_parked: inner.parked_workers.load(Ordering::Relaxed),
            workers_spawned: inner.stats.workers_spawned.load(Ordering::Relaxed),
            workers_retired: inner.stats.workers_retired.load(Ordering::Relaxed),
            tasks_submitted: inner.queue.tasks_submitted.load(Ordering::Relaxed),
            tasks_injected: injection.enqueue_count,
            tasks_executed: inner.stats.tasks_executed.load(Ordering::Relaxed),
            tasks_stolen: inner.queue.tasks_stolen.load(Ordering::Relaxed),
            tasks_panicked: inner.stats.tasks_panicked.load(Ordering::Relaxed),
        }
    }

    /// Get a snapshot of the semaphore counters
    pub fn semaphore_stats(&self) -> SemaphoreStats {
        self.inner.queue.semaphore.stats()
    }
}

impl Drop for DedicatedThreadPool {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Statistics for the pool
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub workers_live: u32,
    pub workers_parked: u32,
    pub workers_spawned: u64,
    pub workers_retired: u64,
    pub tasks_submitted: u64,
    pub tasks_injected: u64,
    pub tasks_executed: u64,
    pub tasks_stolen: u64,
    pub tasks_panicked: u64,
}
