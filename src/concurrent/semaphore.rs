// Copyright (c) 2025 RustyPool Contributors
//
// Unfair throttling semaphore
//
// Gate for a bounded population of frequently-waking worker threads. The
// semaphore is deliberately unfair: a release prefers threads that are
// still spinning, because they are cache-hot and can be handed a permit
// without a kernel transition. Only threads that exhaust their spin budget
// fall back to a kernel-backed wait, and leftover permits are banked for
// future spinners rather than being lost.
//
// State encoding (one 64-bit atomic, four 16-bit lanes, each capped at
// 0x7FFF):
// - Bits 0-15:  spinners            - threads in the spin phase
// - Bits 16-31: count for spinners  - permits reserved for spinners
// - Bits 32-47: waiters             - threads blocked on the kernel tier
// - Bits 48-63: count for waiters   - permits promised to kernel waiters
//
// Every transition is a CAS on the packed word, so the four lanes always
// move together.

use super::Backoff;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Maximum value any counter lane may hold
pub const MAX_WORKERS: u16 = 0x7FFF;

/// Spin budget per logical processor before a spinner becomes a waiter
const SPIN_LIMIT_PER_PROCESSOR: u32 = 50;

const SPINNERS_SHIFT: u32 = 0;
const COUNT_FOR_SPINNERS_SHIFT: u32 = 16;
const WAITERS_SHIFT: u32 = 32;
const COUNT_FOR_WAITERS_SHIFT: u32 = 48;
const LANE_MASK: u64 = 0xFFFF;

/// Unpacked view of the semaphore state word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Counts {
    spinners: u16,
    count_for_spinners: u16,
    waiters: u16,
    count_for_waiters: u16,
}

impl Counts {
    fn unpack(word: u64) -> Self {
        Self {
            spinners: ((word >> SPINNERS_SHIFT) & LANE_MASK) as u16,
            count_for_spinners: ((word >> COUNT_FOR_SPINNERS_SHIFT) & LANE_MASK) as u16,
            waiters: ((word >> WAITERS_SHIFT) & LANE_MASK) as u16,
            count_for_waiters: ((word >> COUNT_FOR_WAITERS_SHIFT) & LANE_MASK) as u16,
        }
    }

    fn pack(self) -> u64 {
        debug_assert!(self.spinners <= MAX_WORKERS);
        debug_assert!(self.count_for_spinners <= MAX_WORKERS);
        debug_assert!(self.waiters <= MAX_WORKERS);
        debug_assert!(self.count_for_waiters <= MAX_WORKERS);
        debug_assert!(
            self.count_for_spinners as u32 + self.count_for_waiters as u32 <= MAX_WORKERS as u32
        );
        ((self.spinners as u64) << SPINNERS_SHIFT)
            | ((self.count_for_spinners as u64) << COUNT_FOR_SPINNERS_SHIFT)
            | ((self.waiters as u64) << WAITERS_SHIFT)
            | ((self.count_for_waiters as u64) << COUNT_FOR_WAITERS_SHIFT)
    }
}

/// Kernel tier: a plain counting semaphore over a mutex and condvar
struct KernelSemaphore {
    permits: Mutex<u64>,
    available: Condvar,
}

impl KernelSemaphore {
    fn new() -> Self {
        Self {
            permits: Mutex::new(0),
            available: Condvar::new(),
        }
    }

    fn wait(&self, timeout: Duration) -> bool {
        // A timeout too large to represent as a deadline means "wait forever"
        let deadline = Instant::now().checked_add(timeout);
        let mut permits = self.permits.lock();
        while *permits == 0 {
            match deadline {
                Some(deadline) => {
                    if self.available.wait_until(&mut permits, deadline).timed_out() {
                        if *permits > 0 {
                            break;
                        }
                        return false;
                    }
                }
                None => self.available.wait(&mut permits),
            }
        }
        *permits -= 1;
        true
    }

    fn release(&self, count: u64) {
        if count == 0 {
            return;
        }
        let mut permits = self.permits.lock();
        *permits += count;
        if count == 1 {
            self.available.notify_one();
        } else {
            self.available.notify_all();
        }
    }
}

/// Unfair two-tier semaphore
#[repr(C, align(64))]
pub struct UnfairSemaphore {
    /// Packed state: [count_for_waiters:16][waiters:16][count_for_spinners:16][spinners:16]
    state: AtomicU64,
    /// Padding to keep the hot word on its own cache line
    _pad: [u8; 64 - size_of::<AtomicU64>()],
    kernel: KernelSemaphore,
    processor_count: usize,
    /// Statistics
    release_calls: AtomicU64,
    released_total: AtomicU64,
    credit_grants: AtomicU64,
    spinner_grants: AtomicU64,
    waiter_grants: AtomicU64,
    banked_credits: AtomicU64,
    kernel_releases: AtomicU64,
}

impl UnfairSemaphore {
    /// Create a new semaphore with no available permits
    pub fn new() -> Self {
        Self {
            state: AtomicU64::new(0),
            _pad: [0; 64 - size_of::<AtomicU64>()],
            kernel: KernelSemaphore::new(),
            processor_count: num_cpus::get().max(1),
            release_calls: AtomicU64::new(0),
            released_total: AtomicU64::new(0),
            credit_grants: AtomicU64::new(0),
            spinner_grants: AtomicU64::new(0),
            waiter_grants: AtomicU64::new(0),
            banked_credits: AtomicU64::new(0),
            kernel_releases: AtomicU64::new(0),
        }
    }

    /// Wait for a permit, spinning first and blocking in the kernel last
    ///
    /// Returns true if a permit was acquired, false on timeout. The timeout
    /// applies to the kernel tier; the spin phase is bounded by the spin
    /// budget, not the clock.
    pub fn wait(&self, timeout: Duration) -> bool {
        // Phase 1: take a banked permit, or sign on as a spinner
        let mut backoff = Backoff::new();
        loop {
            let word = self.state.load(Ordering::Relaxed);
            let mut counts = Counts::unpack(word);
            if counts.count_for_spinners > 0 {
                counts.count_for_spinners -= 1;
                if self.transition(word, counts) {
                    self.credit_grants.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
            } else {
                debug_assert!(counts.spinners < MAX_WORKERS);
                counts.spinners += 1;
                if self.transition(word, counts) {
                    break;
                }
            }
            backoff.spin();
        }

        // Phase 2: spin, yielding the timeslice between attempts. The spin
        // budget contracts as more threads spin per processor.
        let mut num_spins: u32 = 0;
        loop {
            let word = self.state.load(Ordering::Relaxed);
            let mut counts = Counts::unpack(word);

            if counts.count_for_spinners > 0 {
                counts.count_for_spinners -= 1;
                counts.spinners -= 1;
                if self.transition(word, counts) {
                    self.spinner_grants.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                continue;
            }

            let crowding =
                (counts.spinners as f64 / self.processor_count as f64).max(1.0);
            let spin_limit = (SPIN_LIMIT_PER_PROCESSOR as f64 / crowding).round() as u32;
            if num_spins >= spin_limit {
                counts.spinners -= 1;
                debug_assert!(counts.waiters < MAX_WORKERS);
                counts.waiters += 1;
                if self.transition(word, counts) {
                    break;
                }
            } else {
                std::thread::yield_now();
                num_spins += 1;
            }
        }

        // Phase 3: block on the kernel tier
        let acquired = self.kernel.wait(timeout);
        loop {
            let word = self.state.load(Ordering::Relaxed);
            let mut counts = Counts::unpack(word);
            counts.waiters -= 1;
            if acquired {
                debug_assert!(counts.count_for_waiters > 0);
                counts.count_for_waiters -= 1;
            }
            if self.transition(word, counts) {
                break;
            }
        }
        if acquired {
            self.waiter_grants.fetch_add(1, Ordering::Relaxed);
        }
        acquired
    }

    /// Release `count` permits
    ///
    /// Spinners without a reserved permit are served first, then kernel
    /// waiters; anything left over is banked for future spinners.
    pub fn release(&self, count: u16) {
        debug_assert!(count > 0);
        self.release_calls.fetch_add(1, Ordering::Relaxed);
        self.released_total.fetch_add(count as u64, Ordering::Relaxed);

        let mut backoff = Backoff::new();
        loop {
            let word = self.state.load(Ordering::Relaxed);
            let mut counts = Counts::unpack(word);

            let unserved_spinners = counts.spinners.saturating_sub(counts.count_for_spinners);
            let to_spinners = count.min(unserved_spinners);
            let remaining = count - to_spinners;

            let unserved_waiters = counts.waiters.saturating_sub(counts.count_for_waiters);
            let to_waiters = remaining.min(unserved_waiters);
            let banked = remaining - to_waiters;

            counts.count_for_spinners += to_spinners + banked;
            counts.count_for_waiters += to_waiters;

            if self.transition(word, counts) {
                if to_waiters > 0 {
                    self.kernel_releases.fetch_add(to_waiters as u64, Ordering::Relaxed);
                    self.kernel.release(to_waiters as u64);
                }
                if banked > 0 {
                    self.banked_credits.fetch_add(banked as u64, Ordering::Relaxed);
                }
                return;
            }
            backoff.spin();
        }
    }

    fn transition(&self, current: u64, next: Counts) -> bool {
        self.state
            .compare_exchange(current, next.pack(), Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Get statistics
    pub fn stats(&self) -> SemaphoreStats {
        SemaphoreStats {
            release_calls: self.release_calls.load(Ordering::Relaxed),
            released_total: self.released_total.load(Ordering::Relaxed),
            credit_grants: self.credit_grants.load(Ordering::Relaxed),
            spinner_grants: self.spinner_grants.load(Ordering::Relaxed),
            waiter_grants: self.waiter_grants.load(Ordering::Relaxed),
            banked_credits: self.banked_credits.load(Ordering::Relaxed),
            kernel_releases: self.kernel_releases.load(Ordering::Relaxed),
        }
    }
}

impl Default for UnfairSemaphore {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics for the semaphore
#[derive(Debug, Clone, Copy)]
pub struct SemaphoreStats {
    pub release_calls: u64,
    pub released_total: u64,
    pub credit_grants: u64,
    pub spinner_grants: u64,
    pub waiter_grants: u64,
    pub banked_credits: u64,
    pub kernel_releases: u64,
}
