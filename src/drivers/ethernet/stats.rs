//! Loss and throughput counters for diagnostics

use core::sync::atomic::{AtomicU32, Ordering};

use ufmt::derive::uDebug;

/// Snapshot of the driver counters
#[derive(Clone, Copy, Debug, uDebug, Default, Eq, PartialEq)]
pub struct Statistics {
    /// Frames handed to the network stack
    pub rx_delivered: u32,
    /// Frames recycled in place: hardware error, filtered out or no spare buffer
    pub rx_dropped: u32,
    /// Frame chains the network stack refused
    pub rx_events_lost: u32,
    /// Accepted frames dropped because the pool had no replacement buffer
    pub rx_no_buffer: u32,
    /// Frames queued to the DMA
    pub tx_sent: u32,
    /// Frames rejected by `transmit`
    pub tx_dropped: u32,
    /// TX descriptors reclaimed after completion
    pub tx_reclaimed: u32,
    /// Abnormal DMA interrupts
    pub dma_errors: u32,
    /// Abnormal DMA interrupts caused by a bus error; the DMA stops on these
    pub fatal_bus_errors: u32,
    /// Lowest free buffer count the pool reported, if it tracks one
    pub min_free_buffers: Option<u32>,
    /// Lowest number of free TX descriptors seen
    pub min_free_tx_slots: u32,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub rx_delivered: AtomicU32,
    pub rx_dropped: AtomicU32,
    pub rx_events_lost: AtomicU32,
    pub rx_no_buffer: AtomicU32,
    pub tx_sent: AtomicU32,
    pub tx_dropped: AtomicU32,
    pub tx_reclaimed: AtomicU32,
    pub dma_errors: AtomicU32,
    pub fatal_bus_errors: AtomicU32,
    min_free_buffers: AtomicU32,
    min_free_tx_slots: AtomicU32,
}

/// `min_free_buffers` before the pool reported anything
const UNKNOWN: u32 = u32::MAX;

impl Counters {
    pub(crate) fn new(tx_slots: usize) -> Self {
        Counters {
            min_free_buffers: AtomicU32::new(UNKNOWN),
            min_free_tx_slots: AtomicU32::new(tx_slots as u32),
            ..Default::default()
        }
    }

    pub(crate) fn bump(counter: &AtomicU32) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU32, n: u32) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Fold in the current low-water marks
    pub(crate) fn record_watermarks(&self, free_buffers: Option<usize>, free_tx_slots: usize) {
        if let Some(free) = free_buffers {
            self.min_free_buffers
                .fetch_min(free as u32, Ordering::Relaxed);
        }
        self.min_free_tx_slots
            .fetch_min(free_tx_slots as u32, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> Statistics {
        let load = |c: &AtomicU32| c.load(Ordering::Relaxed);
        let min_free_buffers = load(&self.min_free_buffers);
        Statistics {
            rx_delivered: load(&self.rx_delivered),
            rx_dropped: load(&self.rx_dropped),
            rx_events_lost: load(&self.rx_events_lost),
            rx_no_buffer: load(&self.rx_no_buffer),
            tx_sent: load(&self.tx_sent),
            tx_dropped: load(&self.tx_dropped),
            tx_reclaimed: load(&self.tx_reclaimed),
            dma_errors: load(&self.dma_errors),
            fatal_bus_errors: load(&self.fatal_bus_errors),
            min_free_buffers: (min_free_buffers != UNKNOWN).then_some(min_free_buffers),
            min_free_tx_slots: load(&self.min_free_tx_slots),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermarks_only_go_down() {
        let counters = Counters::new(5);
        assert_eq!(counters.snapshot().min_free_buffers, None);
        counters.record_watermarks(Some(12), 4);
        counters.record_watermarks(Some(20), 5);
        counters.record_watermarks(None, 2);
        let stats = counters.snapshot();
        assert_eq!(stats.min_free_buffers, Some(12));
        assert_eq!(stats.min_free_tx_slots, 2);
    }

    #[test]
    fn counters_accumulate() {
        let counters = Counters::new(3);
        Counters::bump(&counters.tx_sent);
        Counters::add(&counters.rx_delivered, 5);
        let stats = counters.snapshot();
        assert_eq!(stats.tx_sent, 1);
        assert_eq!(stats.rx_delivered, 5);
        assert_eq!(stats.rx_dropped, 0);
    }
}
