//! Event word shared between the interrupt handler and the worker

use core::sync::atomic::{AtomicU32, Ordering};

use ufmt::derive::uDebug;

use super::hal::Scheduler;

/// Work the interrupt handler posts for the worker
#[derive(Clone, Copy, Debug, uDebug, Eq, PartialEq)]
#[repr(u32)]
pub enum Event {
    /// A frame landed, or the RX DMA ran out of descriptors
    Receive = 1 << 0,
    /// A transmission completed
    Transmit = 1 << 1,
    /// Abnormal DMA condition
    Error = 1 << 2,
}

/// Pending events as a bit set.
///
/// Raising is a `fetch_or` and consuming a `fetch_and`, so a bit raised
/// while the worker handles the same event is never lost.
#[derive(Default)]
pub struct EventFlags(AtomicU32);

impl EventFlags {
    /// No events pending
    pub const fn new() -> Self {
        EventFlags(AtomicU32::new(0))
    }

    /// Post events; callable from interrupt context
    pub fn raise(&self, bits: u32) {
        self.0.fetch_or(bits, Ordering::AcqRel);
    }

    /// Snapshot of the pending bits
    pub fn pending(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// True if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    /// Consume one event, returning whether it was pending
    pub fn take(&self, event: Event) -> bool {
        let bit = event as u32;
        self.0.fetch_and(!bit, Ordering::AcqRel) & bit != 0
    }

    /// Idle until something is pending or `timeout_ms` have passed
    pub fn wait<S: Scheduler>(&self, scheduler: &S, timeout_ms: u32) {
        let start = scheduler.now_ms();
        while self.is_empty() && scheduler.elapsed_ms(start) < timeout_ms {
            scheduler.idle();
        }
    }
}
