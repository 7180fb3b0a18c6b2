//! Counting semaphore for free TX descriptors.
//!
//! Any number of senders take; only the reclaim path gives. A give that would
//! push the count above the ring size means a descriptor was reclaimed twice,
//! which is a bookkeeping bug, so it panics instead of saturating.

use core::sync::atomic::{AtomicUsize, Ordering};

use super::hal::Scheduler;

/// Free TX descriptors, plus the lowest count ever observed
pub struct TxSlots {
    capacity: usize,
    available: AtomicUsize,
    lowest: AtomicUsize,
}

impl TxSlots {
    /// Semaphore with every slot free
    pub const fn new(capacity: usize) -> Self {
        TxSlots {
            capacity,
            available: AtomicUsize::new(capacity),
            lowest: AtomicUsize::new(capacity),
        }
    }

    /// Slots free right now
    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    /// Slots handed out and not yet given back
    pub fn outstanding(&self) -> usize {
        self.capacity - self.available()
    }

    /// Low-water mark of [`TxSlots::available`]
    pub fn lowest(&self) -> usize {
        self.lowest.load(Ordering::Relaxed)
    }

    /// Take a slot if one is free, without waiting
    pub fn try_take(&self) -> bool {
        let taken = self
            .available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match taken {
            Ok(previous) => {
                self.lowest.fetch_min(previous - 1, Ordering::Relaxed);
                true
            }
            Err(_) => false,
        }
    }

    /// Take a slot, idling the caller for at most `timeout_ms`
    pub fn take<S: Scheduler>(&self, scheduler: &S, timeout_ms: u32) -> bool {
        let start = scheduler.now_ms();
        loop {
            if self.try_take() {
                return true;
            }
            if scheduler.elapsed_ms(start) >= timeout_ms {
                return false;
            }
            scheduler.idle();
        }
    }

    /// Return a slot
    pub fn give(&self) {
        let given = self
            .available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            });
        assert!(given.is_ok(), "TX slot given back more often than taken");
    }

    /// Mark every slot free again; the low-water mark is kept
    pub fn reset(&self) {
        self.available.store(self.capacity, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct Ticks(Cell<u32>);

    impl Scheduler for Ticks {
        fn now_ms(&self) -> u32 {
            self.0.get()
        }
        fn idle(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn counts_down_and_up() {
        let slots = TxSlots::new(2);
        assert!(slots.try_take());
        assert!(slots.try_take());
        assert!(!slots.try_take());
        assert_eq!(slots.outstanding(), 2);
        slots.give();
        assert_eq!(slots.available(), 1);
        assert_eq!(slots.lowest(), 0);
    }

    #[test]
    fn take_gives_up_after_the_timeout() {
        let slots = TxSlots::new(1);
        let ticks = Ticks(Cell::new(0));
        assert!(slots.take(&ticks, 50));
        assert!(!slots.take(&ticks, 50));
        assert_eq!(ticks.0.get(), 50);
    }

    #[test]
    #[should_panic]
    fn over_release_panics() {
        let slots = TxSlots::new(1);
        slots.give();
    }
}
