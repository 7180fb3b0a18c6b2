//! DMA descriptor layout, descriptor tables and per-slot buffer ownership.
//!
//! The DMA controller walks the descriptor tables on its own, so the tables
//! live in `'static` memory and every word is accessed atomically. Which side
//! may touch a descriptor's buffer is decided by the OWN bit in the first word;
//! software additionally records the buffer handle for each slot in a [`Slot`],
//! so a buffer can only be reached through the ring while software holds it.

use core::sync::atomic::{fence, AtomicU32, Ordering};

use static_assertions::assert_eq_size;

/// OWN bit, shared by RX and TX descriptors
pub const DMA_OWNED: u32 = 1 << 31;

/// Descriptor layout for the "alternate descriptor size" (8-word) DMA mode.
///
/// Hardware interprets descriptors as members of a linked list. Each one holds
/// a pointer to its buffer, a pointer to the next descriptor, and control and
/// status bits describing the buffer content.
#[repr(C)]
pub struct DmaDescriptor {
    /// Status and, for TX, control flags (RDES0 / TDES0)
    status: AtomicU32,
    /// Control flags and buffer sizes (RDES1 / TDES1)
    control: AtomicU32,
    /// Buffer 1 address
    buffer1: AtomicU32,
    /// Next descriptor address (chained mode)
    next: AtomicU32,
    /// Extended status (RDES4)
    extended_status: AtomicU32,
    _reserved: AtomicU32,
    /// IEEE-1588 timestamp, low word
    timestamp_low: AtomicU32,
    /// IEEE-1588 timestamp, high word
    timestamp_high: AtomicU32,
}

assert_eq_size!(DmaDescriptor, [u32; 8]);

impl DmaDescriptor {
    #[allow(clippy::declare_interior_mutable_const)]
    const ZERO: DmaDescriptor = DmaDescriptor {
        status: AtomicU32::new(0),
        control: AtomicU32::new(0),
        buffer1: AtomicU32::new(0),
        next: AtomicU32::new(0),
        extended_status: AtomicU32::new(0),
        _reserved: AtomicU32::new(0),
        timestamp_low: AtomicU32::new(0),
        timestamp_high: AtomicU32::new(0),
    };

    /// First descriptor word
    pub fn status(&self) -> u32 {
        self.status.load(Ordering::Acquire)
    }

    /// Overwrite the first descriptor word
    pub fn set_status(&self, value: u32) {
        self.status.store(value, Ordering::Release);
    }

    /// Second descriptor word
    pub fn control(&self) -> u32 {
        self.control.load(Ordering::Acquire)
    }

    /// Overwrite the second descriptor word
    pub fn set_control(&self, value: u32) {
        self.control.store(value, Ordering::Release);
    }

    /// Buffer 1 address
    pub fn buffer_address(&self) -> u32 {
        self.buffer1.load(Ordering::Acquire)
    }

    /// Set buffer 1 address
    pub fn set_buffer_address(&self, address: u32) {
        self.buffer1.store(address, Ordering::Release);
    }

    /// Next descriptor address
    pub fn next_address(&self) -> u32 {
        self.next.load(Ordering::Acquire)
    }

    /// True while the DMA owns this descriptor and its buffer
    pub fn is_dma_owned(&self) -> bool {
        self.status() & DMA_OWNED != 0
    }

    /// Hand the descriptor to the DMA.
    ///
    /// All other words must be written before this; the fence keeps the
    /// compiler and CPU from sinking those writes below the OWN bit.
    pub fn give(&self) {
        fence(Ordering::SeqCst);
        self.status.fetch_or(DMA_OWNED, Ordering::SeqCst);
    }

    fn clear(&self) {
        self.status.store(0, Ordering::Relaxed);
        self.control.store(0, Ordering::Relaxed);
        self.buffer1.store(0, Ordering::Relaxed);
        self.next.store(0, Ordering::Relaxed);
        self.extended_status.store(0, Ordering::Relaxed);
        self._reserved.store(0, Ordering::Relaxed);
        self.timestamp_low.store(0, Ordering::Relaxed);
        self.timestamp_high.store(0, Ordering::Relaxed);
    }
}

/// Descriptor list for one direction.
///
/// The DMA requires word alignment; 32 keeps every descriptor on its own
/// cache line on parts that have a data cache.
#[repr(C, align(32))]
pub struct DescriptorTable<const N: usize> {
    descriptors: [DmaDescriptor; N],
}

impl<const N: usize> DescriptorTable<N> {
    const NOT_EMPTY: () = assert!(N > 0);

    /// Zeroed table, suitable for a `static`
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let _: () = Self::NOT_EMPTY;
        DescriptorTable {
            descriptors: [DmaDescriptor::ZERO; N],
        }
    }

    /// Number of descriptors
    pub const fn len(&self) -> usize {
        N
    }

    /// Always false; a table has at least one descriptor
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Address of the first descriptor, as written to the DMA base register
    pub fn base_address(&self) -> u32 {
        self.address_of(0)
    }

    /// Address of descriptor `index`
    pub fn address_of(&self, index: usize) -> u32 {
        &self.descriptors[index] as *const DmaDescriptor as usize as u32
    }

    /// Descriptor `index`
    pub fn get(&self, index: usize) -> &DmaDescriptor {
        &self.descriptors[index]
    }

    /// Zero every descriptor, then chain them into a closed cycle of `N`
    /// nodes whose last link points back at the first
    pub(crate) fn reset(&self) {
        for descriptor in self.descriptors.iter() {
            descriptor.clear();
        }
        for index in 0..N {
            self.descriptors[index]
                .next
                .store(self.address_of(next_index::<N>(index)), Ordering::Relaxed);
        }
        fence(Ordering::SeqCst);
    }
}

impl<const N: usize> Default for DescriptorTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Ring position following `index`
#[inline(always)]
pub const fn next_index<const N: usize>(index: usize) -> usize {
    (index + 1) % N
}

/// Which side holds the buffer attached to a descriptor
pub enum Slot<B> {
    /// Handed to the DMA; software must not touch the buffer
    Hardware(B),
    /// Held by software, possibly without a buffer
    Software(Option<B>),
}

impl<B> Slot<B> {
    /// Idle slot without a buffer
    pub const fn empty() -> Self {
        Slot::Software(None)
    }

    /// True if the buffer was handed to the DMA
    pub fn is_hardware(&self) -> bool {
        matches!(self, Slot::Hardware(_))
    }

    /// Buffer attached to this slot, whichever side holds it
    pub fn buffer(&self) -> Option<&B> {
        match self {
            Slot::Hardware(b) => Some(b),
            Slot::Software(b) => b.as_ref(),
        }
    }

    /// Detach the buffer, leaving the slot idle
    pub fn take(&mut self) -> Option<B> {
        match core::mem::replace(self, Slot::empty()) {
            Slot::Hardware(b) => Some(b),
            Slot::Software(b) => b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_is_eight_words() {
        assert_eq!(core::mem::size_of::<DmaDescriptor>(), 32);
        assert_eq!(core::mem::align_of::<DescriptorTable<4>>(), 32);
    }

    #[test]
    fn reset_links_a_closed_cycle() {
        let table: DescriptorTable<5> = DescriptorTable::new();
        table.reset();
        let mut index = 0;
        for _ in 0..5 {
            let next = table.get(index).next_address();
            index = (0..5).find(|&i| table.address_of(i) == next).unwrap();
        }
        assert_eq!(index, 0);
        assert_eq!(table.get(4).next_address(), table.base_address());
    }

    #[test]
    fn give_sets_only_the_own_bit() {
        let table: DescriptorTable<1> = DescriptorTable::new();
        let d = table.get(0);
        d.set_status(0x0000_0120);
        assert!(!d.is_dma_owned());
        d.give();
        assert!(d.is_dma_owned());
        assert_eq!(d.status(), DMA_OWNED | 0x0000_0120);
    }

    #[test]
    fn next_index_wraps() {
        assert_eq!(next_index::<3>(0), 1);
        assert_eq!(next_index::<3>(2), 0);
    }

    #[test]
    fn slot_take_leaves_it_empty() {
        let mut slot = Slot::Hardware(3_u8);
        assert!(slot.is_hardware());
        assert_eq!(slot.take(), Some(3));
        assert!(!slot.is_hardware());
        assert_eq!(slot.take(), None);
    }
}
