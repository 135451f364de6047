//! Node-wide quota on calls blocked while shaping.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Bounded gate shared by every counter on the node.
///
/// Limits how many request threads may be parked waiting for budget at the
/// same time, so many over-budget names cannot exhaust the thread pool. The
/// bound can be changed while the pool is in use; the new value only affects
/// later acquisitions.
#[derive(Debug)]
pub struct SleepSlotPool {
    in_use: AtomicUsize,
    limit: AtomicUsize,
}

impl SleepSlotPool {
    pub fn new(limit: usize) -> Self {
        Self {
            in_use: AtomicUsize::new(0),
            limit: AtomicUsize::new(limit),
        }
    }

    /// Claim a slot if one is free.
    pub fn try_acquire(&self) -> bool {
        let limit = self.limit.load(Ordering::SeqCst);
        self.in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_ok()
    }

    /// Return a slot. Saturates at zero.
    pub fn release(&self) {
        let _ = self
            .in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Claim a slot as a guard that releases it on drop.
    pub fn acquire_slot(&self) -> Option<SleepSlot<'_>> {
        self.try_acquire().then_some(SleepSlot { pool: self })
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::SeqCst)
    }

    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::SeqCst);
    }
}

/// A held sleep slot.
#[derive(Debug)]
pub struct SleepSlot<'a> {
    pool: &'a SleepSlotPool,
}

impl Drop for SleepSlot<'_> {
    fn drop(&mut self) {
        self.pool.release();
    }
}
