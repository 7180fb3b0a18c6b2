//! RX descriptor field definitions and the receive ring

use modular_bitfield::prelude::*;
use ufmt::derive::uDebug;

use super::descriptor::{next_index, DescriptorTable, DmaDescriptor, Slot};
use super::hal::{BufferPool, NetworkBuffer};
use super::InitError;

/// Default number of RX descriptors/buffers
pub const RXDESCRS: usize = 5;

/// Default number of bytes per RX buffer
pub const RXBUFSIZE: usize = 1536;

/// Length of the CRC trailer the MAC leaves at the end of each frame
pub const CRC_LEN: usize = 4;

/// RX descriptor field masks for the first word (RDES0)
#[derive(Clone, Copy)]
#[repr(u32)]
pub enum RDES0 {
    /// Flag that DMA owns this descriptor
    OWN = 1 << 31,
    /// Destination address filter fail
    AFM = 1 << 30,
    /// Frame length, including CRC
    FL = 0x3fff << 16,
    /// An error of any kind occurred
    ES = 1 << 15,
    /// Descriptor error: frame did not fit the current descriptor
    DE = 1 << 14,
    /// Source address filter fail
    SAF = 1 << 13,
    /// Length field does not match the frame
    LE = 1 << 12,
    /// Frame dropped because the RX FIFO overflowed
    OE = 1 << 11,
    /// Frame is VLAN-tagged
    VLAN = 1 << 10,
    /// First descriptor of a frame
    FS = 1 << 9,
    /// Last descriptor of a frame
    LS = 1 << 8,
    /// IPv4 header checksum error (or giant frame)
    IPHCE = 1 << 7,
    /// Late collision (half duplex)
    LC = 1 << 6,
    /// Ethernet-type frame (length/type field >= 1536)
    FT = 1 << 5,
    /// Receive watchdog timeout
    RWT = 1 << 4,
    /// Receive error from the PHY
    RE = 1 << 3,
    /// Dribble bit error
    DBE = 1 << 2,
    /// CRC error
    CE = 1 << 1,
    /// Payload checksum error (or extended status available)
    PCE = 1,
}

/// RX descriptor field masks for the second word (RDES1)
#[derive(Clone, Copy)]
#[repr(u32)]
pub enum RDES1 {
    /// Disable interrupt on completion
    DIC = 1 << 31,
    /// Size of second buffer
    RBS2 = 0x1fff << 16,
    /// Receive end of ring
    RER = 1 << 15,
    /// Second address is the next descriptor
    RCH = 1 << 14,
    /// Size of first buffer
    RBS1 = 0x1fff,
}

/// A frame is only worth looking at when none of these are set except `FT`
const RECEIVE_STATUS_MASK: u32 = RDES0::CE as u32 | RDES0::IPHCE as u32 | RDES0::FT as u32;

/// RDES0 parser
#[bitfield(bits = 32)]
#[derive(Clone, Copy, Eq, PartialEq)]
#[allow(missing_docs)]
struct RxStatusBitfield {
    pub payload_checksum_error: B1,
    pub crc_error: B1,
    pub dribble_bit_error: B1,
    pub receive_error: B1,
    pub watchdog_timeout: B1,
    pub frame_type: B1,
    pub late_collision: B1,
    pub ipv4_header_error: B1,
    pub last_segment: B1,
    pub first_segment: B1,
    pub vlan: B1,
    pub overflow_error: B1,
    pub length_error: B1,
    pub source_filter_fail: B1,
    pub descriptor_error: B1,
    pub error_summary: B1,
    pub frame_length: B14,
    pub destination_filter_fail: B1,
    pub dma_owned: B1,
}

/// Decoded RDES0 of a released descriptor
#[derive(Clone, Copy, Debug, uDebug, Eq, PartialEq)]
#[allow(missing_docs)]
pub struct RxStatus {
    pub frame_length: u16,
    pub first_segment: bool,
    pub last_segment: bool,
    pub frame_type: bool,
    pub crc_error: bool,
    pub ipv4_header_error: bool,
    pub error_summary: bool,
    pub overflow_error: bool,
    pub descriptor_error: bool,
    pub dma_owned: bool,
}

impl RxStatus {
    /// Parse RDES0
    pub fn new(reg: u32) -> Self {
        let b = RxStatusBitfield::from_bytes(reg.to_le_bytes());
        RxStatus {
            frame_length: b.frame_length(),
            first_segment: b.first_segment() != 0,
            last_segment: b.last_segment() != 0,
            frame_type: b.frame_type() != 0,
            crc_error: b.crc_error() != 0,
            ipv4_header_error: b.ipv4_header_error() != 0,
            error_summary: b.error_summary() != 0,
            overflow_error: b.overflow_error() != 0,
            descriptor_error: b.descriptor_error() != 0,
            dma_owned: b.dma_owned() != 0,
        }
    }

    /// Payload length without the CRC trailer
    pub fn payload_len(&self) -> usize {
        (self.frame_length as usize).saturating_sub(CRC_LEN)
    }
}

/// True if RDES0 describes a well-formed Ethernet-type frame
pub fn is_receivable(rdes0: u32) -> bool {
    rdes0 & RECEIVE_STATUS_MASK == RDES0::FT as u32
}

/// RX descriptor ring: the table shared with the DMA, the buffer handle of
/// every slot, and the read cursor
pub(crate) struct RxRing<B, const N: usize> {
    table: &'static DescriptorTable<N>,
    slots: [Slot<B>; N],
    cursor: usize,
}

impl<B: NetworkBuffer, const N: usize> RxRing<B, N> {
    pub(crate) fn new(table: &'static DescriptorTable<N>) -> Self {
        RxRing {
            table,
            slots: core::array::from_fn(|_| Slot::empty()),
            cursor: 0,
        }
    }

    pub(crate) fn table(&self) -> &'static DescriptorTable<N> {
        self.table
    }

    #[cfg(test)]
    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    /// Chain the descriptors, attach a fresh buffer to each and hand them all
    /// to the DMA. On failure every buffer already attached goes back to the pool.
    pub(crate) fn init<P>(
        &mut self,
        pool: &P,
        buffer_size: usize,
        wait_ms: u32,
    ) -> Result<(), InitError>
    where
        P: BufferPool<Buffer = B>,
    {
        self.release_all(pool);
        self.table.reset();
        self.cursor = 0;

        for index in 0..N {
            let buffer = match pool.acquire(buffer_size, wait_ms) {
                Some(buffer) => buffer,
                None => {
                    self.release_all(pool);
                    return Err(InitError::OutOfBuffers);
                }
            };
            self.arm(index, buffer, buffer_size);
        }

        Ok(())
    }

    /// RDES0 of the descriptor at the cursor, if the DMA has released it
    pub(crate) fn released(&self) -> Option<u32> {
        let descriptor = self.current();
        if descriptor.is_dma_owned() {
            None
        } else {
            Some(descriptor.status())
        }
    }

    /// Buffer of the descriptor at the cursor, once the DMA has released it
    pub(crate) fn current_frame(&self) -> Option<&B> {
        if self.current().is_dma_owned() {
            None
        } else {
            self.slots[self.cursor].buffer()
        }
    }

    /// Give the descriptor at the cursor back to the DMA with the buffer it
    /// already holds, dropping whatever frame was in it
    pub(crate) fn recycle_current(&mut self, buffer_size: usize) {
        let buffer = self.take_current();
        self.rearm_current(buffer, buffer_size);
    }

    /// Detach the buffer of the released descriptor at the cursor
    pub(crate) fn take_current(&mut self) -> B {
        assert!(
            !self.current().is_dma_owned(),
            "RX descriptor taken while the DMA owns it"
        );
        match self.slots[self.cursor].take() {
            Some(buffer) => buffer,
            None => panic!("RX descriptor {} has no buffer", self.cursor),
        }
    }

    /// Attach `buffer` to the descriptor at the cursor, give it back to the
    /// DMA and move on to the next descriptor
    pub(crate) fn rearm_current(&mut self, buffer: B, buffer_size: usize) {
        self.arm(self.cursor, buffer, buffer_size);
        self.cursor = next_index::<N>(self.cursor);
    }

    /// Buffer sitting in slot `index`
    #[cfg(test)]
    pub(crate) fn buffer_mut(&mut self, index: usize) -> Option<&mut B> {
        match &mut self.slots[index] {
            Slot::Hardware(b) => Some(b),
            Slot::Software(b) => b.as_mut(),
        }
    }

    /// Return every attached buffer to the pool, leaving descriptors software-owned
    pub(crate) fn release_all<P>(&mut self, pool: &P)
    where
        P: BufferPool<Buffer = B>,
    {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let descriptor = self.table.get(index);
            descriptor.set_status(0);
            descriptor.set_buffer_address(0);
            if let Some(buffer) = slot.take() {
                pool.release(buffer);
            }
        }
    }

    fn current(&self) -> &DmaDescriptor {
        self.table.get(self.cursor)
    }

    fn arm(&mut self, index: usize, buffer: B, buffer_size: usize) {
        debug_assert!(
            buffer_size <= RDES1::RBS1 as usize,
            "RX buffer size {} too large",
            buffer_size
        );
        let descriptor = self.table.get(index);
        descriptor.set_buffer_address(buffer.dma_address());
        descriptor.set_control(RDES1::RCH as u32 | (buffer_size as u32 & RDES1::RBS1 as u32));
        descriptor.set_status(0);
        self.slots[index] = Slot::Hardware(buffer);
        descriptor.give();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_length_field() {
        let status = RxStatus::new(RDES0::FT as u32 | RDES0::FS as u32 | RDES0::LS as u32 | (64 << 16));
        assert_eq!(status.frame_length, 64);
        assert_eq!(status.payload_len(), 60);
        assert!(status.first_segment && status.last_segment && status.frame_type);
        assert!(!status.dma_owned);
    }

    #[test]
    fn runt_length_saturates() {
        assert_eq!(RxStatus::new(2 << 16).payload_len(), 0);
    }

    #[test]
    fn receivable_needs_frame_type_and_no_crc_errors() {
        assert!(is_receivable(RDES0::FT as u32 | RDES0::LS as u32));
        assert!(!is_receivable(RDES0::FT as u32 | RDES0::CE as u32));
        assert!(!is_receivable(RDES0::FT as u32 | RDES0::IPHCE as u32));
        assert!(!is_receivable(RDES0::LS as u32));
    }
}
