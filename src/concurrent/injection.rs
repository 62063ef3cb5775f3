// Copyright (c) 2025 RustyPool Contributors
//
// Shared FIFO injection queue
//
// Multi-producer multi-consumer queue holding work submitted from outside
// the pool, plus anything a retiring worker spills back before it exits.
// Delivery is FIFO under a single consumer; no ordering is guaranteed
// relative to the per-worker deques.

use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct InjectionQueue<T> {
    queue: SegQueue<T>,
    /// Total number of enqueues (for statistics)
    enqueue_count: AtomicU64,
    /// Total number of successful dequeues (for statistics)
    dequeue_count: AtomicU64,
}

impl<T> InjectionQueue<T> {
    /// Create a new empty queue
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            enqueue_count: AtomicU64::new(0),
            dequeue_count: AtomicU64::new(0),
        }
    }

    /// Enqueue an item at the back of the queue
    pub fn push(&self, value: T) {
        self.queue.push(value);
        self.enqueue_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Dequeue the oldest item, if any
    pub fn try_pop(&self) -> Option<T> {
        let value = self.queue.pop();
        if value.is_some() {
            self.dequeue_count.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Get the approximate queue length
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Get statistics
    pub fn stats(&self) -> InjectionStats {
        InjectionStats {
            enqueue_count: self.enqueue_count.load(Ordering::Relaxed),
            dequeue_count: self.dequeue_count.load(Ordering::Relaxed),
            current_size: self.len(),
        }
    }
}

impl<T> Default for InjectionQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics for the injection queue
#[derive(Debug, Clone, Copy)]
pub struct InjectionStats {
    pub enqueue_count: u64,
    pub dequeue_count: u64,
    pub current_size: usize,
}
