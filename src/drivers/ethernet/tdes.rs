//! TX descriptor field definitions and the transmit ring

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use smoltcp::wire::{
    EthernetFrame, EthernetProtocol, Icmpv4Packet, IpProtocol, Ipv4Packet, ETHERNET_HEADER_LEN,
    IPV4_HEADER_LEN,
};

use super::descriptor::{next_index, DescriptorTable};
use super::hal::{BufferPool, NetworkBuffer};

/// Default number of TX descriptors
pub const TXDESCRS: usize = 5;

/// Default number of bytes per TX buffer
pub const TXBUFSIZE: usize = 1536;

/// TX descriptor field masks for the first word (TDES0)
#[derive(Clone, Copy)]
#[repr(u32)]
pub enum TDES0 {
    // Status flag set by the DMA or the user to transfer ownership
    /// Flag that DMA owns this descriptor
    OWN = 1 << 31,
    // To be set by the user
    /// Interrupt at end of transmission
    IC = 1 << 30,
    /// Last segment of the frame
    LS = 1 << 29,
    /// First segment of the frame
    FS = 1 << 28,
    /// Disable CRC insertion
    DC = 1 << 27,
    /// Disable zero-padding
    DP = 1 << 26,
    /// Transmit timestamp enable
    TTSE = 1 << 25,
    /// Insert IPv4 header checksum only
    CicIPV4 = 1 << 22,
    /// Insert IPv4 header checksum and payload checksum without pseudoheader
    CicFrameOnly = 2 << 22,
    /// Insert IPv4 header checksum and payload checksum including pseudoheader
    CicFull = 3 << 22,
    /// Transmit end of ring
    TER = 1 << 21,
    /// Second address is the next descriptor
    TCH = 1 << 20,

    // Status flags set by the DMA
    /// IP header error occurred
    IHE = 1 << 16,
    /// An error of any kind occurred
    ES = 1 << 15,
    /// Jabber timeout error
    JT = 1 << 14,
    /// Frame flushed by software
    FF = 1 << 13,
    /// IP payload error
    IPE = 1 << 12,
    /// Loss of carrier error
    LOC = 1 << 11,
    /// No carrier error
    NC = 1 << 10,
    /// Late collision error
    LC = 1 << 9,
    /// Excessive collision error
    EC = 1 << 8,
    /// Underflow error
    UF = 1 << 1,
}

/// TX descriptor field masks for the second word (TDES1)
#[derive(Clone, Copy)]
#[repr(u32)]
pub enum TDES1 {
    /// Size of valid data in second buffer
    TBS2 = 0x1fff << 16,
    /// Size of valid data in first buffer
    TBS1 = 0x1fff,
}

/// Idle TX descriptor: chained, hardware checksum insertion
const IDLE_STATUS: u32 = TDES0::TCH as u32 | TDES0::CicFull as u32;

/// Single-descriptor frame, interrupt on completion, hardware checksum insertion
const TRANSMIT_STATUS: u32 =
    IDLE_STATUS | TDES0::IC as u32 | TDES0::LS as u32 | TDES0::FS as u32;

/// Zero the ICMP checksum of an IPv4/ICMP frame.
///
/// With full checksum insertion the MAC computes the ICMP checksum itself, but
/// only into a zeroed field. Only the ethertype, the IHL and the protocol byte
/// are looked at, so a frame cut short by truncation still gets its field
/// cleared as long as the ICMP header is inside `frame`. Returns true if the
/// frame was ICMP.
pub fn clear_icmp_checksum(frame: &mut [u8]) -> bool {
    if frame.len() < ETHERNET_HEADER_LEN + IPV4_HEADER_LEN {
        return false;
    }
    let ip_header_len = {
        let ethernet = EthernetFrame::new_unchecked(&*frame);
        if ethernet.ethertype() != EthernetProtocol::Ipv4 {
            return false;
        }
        let ip = Ipv4Packet::new_unchecked(ethernet.payload());
        if ip.next_header() != IpProtocol::Icmp {
            return false;
        }
        usize::from(ip.header_len())
    };
    if ip_header_len < IPV4_HEADER_LEN {
        return false;
    }

    match frame.get_mut(ETHERNET_HEADER_LEN + ip_header_len..) {
        Some(icmp) if icmp.len() >= ICMP_CHECKSUM_END => {
            Icmpv4Packet::new_unchecked(icmp).set_checksum(0);
            true
        }
        _ => false,
    }
}

/// Bytes of ICMP header up to and including the checksum
const ICMP_CHECKSUM_END: usize = 4;

/// Slot holds nothing; the next sender to land here may fill it
const EMPTY: u8 = 0;
/// A sender claimed the slot and is still writing the descriptor
const FILLING: u8 = 1;
/// Frame handed to the DMA; only the reclaimer may take it
const QUEUED: u8 = 2;
/// Reclaimer or shutdown is detaching the buffer
const DRAINING: u8 = 3;

/// One TX descriptor's buffer handle and who may touch it
struct TxSlot<B> {
    state: AtomicU8,
    buffer: UnsafeCell<Option<B>>,
}

impl<B> TxSlot<B> {
    const fn new() -> Self {
        TxSlot {
            state: AtomicU8::new(EMPTY),
            buffer: UnsafeCell::new(None),
        }
    }

    /// Detach the buffer of a queued slot, leaving it empty
    fn drain(&self) -> Option<B> {
        self.state
            .compare_exchange(QUEUED, DRAINING, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;
        // SAFETY: DRAINING is only reachable through the exchange above, so
        // no sender or other reclaimer can reach the cell until EMPTY is stored
        let buffer = unsafe { (*self.buffer.get()).take() };
        self.state.store(EMPTY, Ordering::Release);
        buffer
    }
}

/// TX descriptor ring: the table shared with the DMA, the buffer handle of
/// every slot, the write cursor and the reclaim cursor.
///
/// Senders and the worker never lock each other out. Senders advance the
/// write cursor and fill the slot they claimed; the worker alone advances the
/// reclaim cursor. A slot changes hands through its state word and the OWN
/// bit. The TX slot count keeps the write cursor from lapping the reclaim
/// cursor, so a claimed slot is always empty.
pub(crate) struct TxRing<B, const N: usize> {
    table: &'static DescriptorTable<N>,
    slots: [TxSlot<B>; N],
    write: AtomicUsize,
    reclaim: AtomicUsize,
}

// SAFETY: every access to a slot's buffer cell is serialised by the slot's
// state word, see `TxSlot::drain` and `TxRing::fill`
unsafe impl<B: Send, const N: usize> Sync for TxRing<B, N> {}

impl<B: NetworkBuffer, const N: usize> TxRing<B, N> {
    pub(crate) fn new(table: &'static DescriptorTable<N>) -> Self {
        TxRing {
            table,
            slots: core::array::from_fn(|_| TxSlot::new()),
            write: AtomicUsize::new(0),
            reclaim: AtomicUsize::new(0),
        }
    }

    pub(crate) fn table(&self) -> &'static DescriptorTable<N> {
        self.table
    }

    #[cfg(test)]
    pub(crate) fn write_cursor(&self) -> usize {
        self.write.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn reclaim_cursor(&self) -> usize {
        self.reclaim.load(Ordering::Acquire)
    }

    /// Chain the descriptors and leave them all idle and software-owned.
    /// No sender or reclaimer may be running.
    pub(crate) fn init<P>(&self, pool: &P)
    where
        P: BufferPool<Buffer = B>,
    {
        self.release_all(pool);
        self.table.reset();
        for index in 0..N {
            self.table.get(index).set_status(IDLE_STATUS);
        }
        self.write.store(0, Ordering::Release);
        self.reclaim.store(0, Ordering::Release);
    }

    /// Attach a frame to the next free descriptor and hand it to the DMA.
    ///
    /// The caller must hold a TX slot.
    pub(crate) fn queue(&self, buffer: B, len: usize) {
        let index = self.claim();
        self.fill(index, buffer, len);
    }

    /// Reserve the descriptor at the write cursor for one sender
    pub(crate) fn claim(&self) -> usize {
        let claimed = self
            .write
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                Some(next_index::<N>(w))
            });
        // The closure never refuses
        claimed.unwrap_or_else(|w| w)
    }

    /// Write descriptor `index`, claimed by this sender, and give it to the DMA.
    ///
    /// A DMA-owned or occupied descriptor here means the slot accounting is
    /// broken and the ring can no longer be trusted.
    pub(crate) fn fill(&self, index: usize, buffer: B, len: usize) {
        let descriptor = self.table.get(index);
        let slot = &self.slots[index];
        assert!(
            !descriptor.is_dma_owned()
                && slot
                    .state
                    .compare_exchange(EMPTY, FILLING, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok(),
            "TX descriptor {} still owned by the DMA",
            index
        );

        descriptor.set_buffer_address(buffer.dma_address());
        descriptor.set_control(len as u32 & TDES1::TBS1 as u32);
        descriptor.set_status(TRANSMIT_STATUS);
        // SAFETY: FILLING belongs to this sender until QUEUED is stored
        unsafe { *slot.buffer.get() = Some(buffer) };
        descriptor.give();
        slot.state.store(QUEUED, Ordering::Release);
    }

    /// Detach the buffer of the oldest completed descriptor, if any.
    ///
    /// `outstanding` is the number of TX slots taken and not yet given back.
    /// Stops at a slot a sender has claimed but not queued yet. Only the
    /// worker calls this.
    pub(crate) fn reclaim_next(&self, outstanding: usize) -> Option<B> {
        if outstanding == 0 {
            return None;
        }
        let index = self.reclaim.load(Ordering::Acquire);
        let slot = &self.slots[index];
        // QUEUED is stored after OWN, so OWN is visible once QUEUED is
        if slot.state.load(Ordering::Acquire) != QUEUED {
            return None;
        }
        let descriptor = self.table.get(index);
        if descriptor.is_dma_owned() {
            return None;
        }

        descriptor.set_buffer_address(0);
        let buffer = slot.drain();
        if buffer.is_some() {
            self.reclaim.store(next_index::<N>(index), Ordering::Release);
        }
        buffer
    }

    /// True if slot `index` holds a frame or is being filled
    #[cfg(test)]
    pub(crate) fn is_occupied(&self, index: usize) -> bool {
        self.slots[index].state.load(Ordering::Acquire) != EMPTY
    }

    /// Buffer queued in slot `index`
    #[cfg(test)]
    pub(crate) fn queued(&self, index: usize) -> Option<&B> {
        let slot = &self.slots[index];
        if slot.state.load(Ordering::Acquire) != QUEUED {
            return None;
        }
        // SAFETY: tests call this with no reclaimer running, so a queued
        // buffer stays put while borrowed
        unsafe { (*slot.buffer.get()).as_ref() }
    }

    /// Return every queued buffer to the pool, leaving descriptors idle.
    /// Slots still being filled are left to their sender.
    pub(crate) fn release_all<P>(&self, pool: &P)
    where
        P: BufferPool<Buffer = B>,
    {
        for (index, slot) in self.slots.iter().enumerate() {
            let descriptor = self.table.get(index);
            if slot.state.load(Ordering::Acquire) == FILLING {
                continue;
            }
            descriptor.set_status(IDLE_STATUS);
            descriptor.set_buffer_address(0);
            if let Some(buffer) = slot.drain() {
                pool.release(buffer);
            }
        }
        self.reclaim
            .store(self.write.load(Ordering::Acquire), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn icmp_echo(checksum: u16) -> Vec<u8> {
        let mut frame = vec![0_u8; 14 + 20 + 8];
        frame[12..14].copy_from_slice(&[0x08, 0x00]);
        frame[14] = 0x45;
        frame[16..18].copy_from_slice(&28_u16.to_be_bytes());
        frame[23] = 1; // ICMP
        frame[34] = 8; // echo request
        frame[36..38].copy_from_slice(&checksum.to_be_bytes());
        frame
    }

    #[test]
    fn icmp_checksum_is_zeroed() {
        let mut frame = icmp_echo(0xbeef);
        assert!(clear_icmp_checksum(&mut frame));
        assert_eq!(&frame[36..38], &[0, 0]);
        assert_eq!(frame[34], 8);
    }

    #[test]
    fn other_protocols_are_left_alone() {
        let mut frame = icmp_echo(0xbeef);
        frame[23] = 17; // UDP
        assert!(!clear_icmp_checksum(&mut frame));
        assert_eq!(&frame[36..38], &0xbeef_u16.to_be_bytes());

        let mut arp = icmp_echo(0xbeef);
        arp[12..14].copy_from_slice(&[0x08, 0x06]);
        assert!(!clear_icmp_checksum(&mut arp));
    }

    #[test]
    fn icmp_checksum_is_zeroed_in_a_truncated_frame() {
        // Cut inside the echo identifier; IPv4 total length now overshoots
        let mut frame = icmp_echo(0xbeef);
        frame.truncate(40);
        assert!(clear_icmp_checksum(&mut frame));
        assert_eq!(&frame[36..38], &[0, 0]);

        // Header options push the ICMP header out of the frame
        let mut frame = icmp_echo(0xbeef);
        frame[14] = 0x4f;
        assert!(!clear_icmp_checksum(&mut frame));
        assert_eq!(&frame[36..38], &0xbeef_u16.to_be_bytes());
    }

    #[test]
    fn bogus_header_length_is_ignored() {
        let mut frame = icmp_echo(0xbeef);
        frame[14] = 0x42;
        assert!(!clear_icmp_checksum(&mut frame));
    }

    #[test]
    fn truncated_frames_are_ignored() {
        let mut frame = vec![0_u8; 10];
        assert!(!clear_icmp_checksum(&mut frame));
    }

    #[test]
    fn transmit_status_flags() {
        assert_eq!(TRANSMIT_STATUS & TDES0::OWN as u32, 0);
        assert_ne!(TRANSMIT_STATUS & TDES0::FS as u32, 0);
        assert_ne!(TRANSMIT_STATUS & TDES0::LS as u32, 0);
        assert_ne!(TRANSMIT_STATUS & TDES0::IC as u32, 0);
        assert_eq!(TRANSMIT_STATUS & TDES0::CicFull as u32, TDES0::CicFull as u32);
    }
}
