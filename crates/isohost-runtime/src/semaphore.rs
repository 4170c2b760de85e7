//! Counting admission gate.
//!
//! Slots are taken with a compare-and-swap retry loop over an atomic counter.
//! A caller that loses the race parks on a [`Notify`] instead of blocking its
//! thread, so waiting never stalls the scheduler. There is no queue: whichever
//! waiter polls first after a release wins the slot, and starvation is
//! possible.

use std::sync::atomic::{AtomicI64, Ordering};

use tokio::sync::Notify;

/// A counting gate initialized with a fixed number of slots.
#[derive(Debug)]
pub struct Semaphore {
    free_slots: AtomicI64,
    released: Notify,
}

/// A held slot. Dropping it releases the slot.
#[derive(Debug)]
#[must_use = "dropping the permit releases the slot immediately"]
pub struct Permit<'a> {
    semaphore: &'a Semaphore,
}

impl Semaphore {
    pub fn new(slots: usize) -> Self {
        Self {
            free_slots: AtomicI64::new(i64::try_from(slots).unwrap_or(i64::MAX)),
            released: Notify::new(),
        }
    }

    /// Number of slots currently free.
    pub fn available(&self) -> usize {
        self.free_slots.load(Ordering::SeqCst).max(0) as usize
    }

    /// Suspend until a slot is free, then take it.
    pub async fn acquire(&self) -> Permit<'_> {
        loop {
            if self.take_slot() {
                return Permit { semaphore: self };
            }

            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register before re-checking so a release between the failed CAS
            // and the await is not lost.
            notified.as_mut().enable();

            if self.take_slot() {
                return Permit { semaphore: self };
            }

            notified.await;
        }
    }

    /// Take a slot without waiting.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        self.take_slot().then(|| Permit { semaphore: self })
    }

    /// Return a slot. Never blocks.
    ///
    /// Prefer dropping a [`Permit`]; this is for callers that hold a slot
    /// across an ownership boundary via [`Permit::forget`].
    pub fn release(&self) {
        self.free_slots.fetch_add(1, Ordering::SeqCst);
        self.released.notify_one();
    }

    fn take_slot(&self) -> bool {
        let mut current = self.free_slots.load(Ordering::SeqCst);
        while current > 0 {
            match self.free_slots.compare_exchange_weak(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
        false
    }
}

impl Permit<'_> {
    /// Keep the slot taken after the permit is dropped.
    pub fn forget(self) {
        std::mem::forget(self);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}
