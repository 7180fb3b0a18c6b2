//! Capabilities the ring engine borrows from its surroundings.
//!
//! The driver core never touches MCU registers, the network buffer allocator,
//! the network stack or the task scheduler directly. Production code binds one
//! implementation of each trait (the `tm4c129` module does it for EMAC0); tests
//! bind fakes.

use ufmt::derive::uDebug;

use super::chain::FrameChain;

/// Physical link state as reported by the PHY
#[derive(Clone, Copy, Debug, uDebug, Eq, PartialEq)]
pub enum LinkStatus {
    /// No carrier
    Down,
    /// Carrier present
    Up,
}

/// Station address filter slot
#[derive(Clone, Copy, Debug, uDebug, Eq, PartialEq)]
pub enum MacAddressIndex {
    /// Primary unicast address
    Index0,
    /// Secondary address, usually a multicast group (LLMNR)
    Index1,
}

/// Interface between MAC and PHY
#[derive(Clone, Copy, Debug, uDebug, Eq, PartialEq)]
pub enum MediaInterface {
    /// Media-independent interface
    Mii,
    /// Reduced media-independent interface
    Rmii,
}

/// Register-level operations of the MAC/DMA peripheral.
///
/// All methods take `&self`: the interrupt handler and the worker both hold a
/// shared reference, and each method is a single register access or a short,
/// self-contained sequence.
pub trait Emac {
    /// Reset and configure MAC and DMA for the given media interface
    fn initialize(&self, media: MediaInterface);

    /// Program a station address
    fn set_mac_address(&self, index: MacAddressIndex, address: [u8; 6]);

    /// Write the RX descriptor list base address
    fn set_dma_rx_descriptor_table(&self, address: u32);

    /// Write the TX descriptor list base address
    fn set_dma_tx_descriptor_table(&self, address: u32);

    /// Kick the RX DMA out of suspension
    fn rx_poll_demand(&self);

    /// Kick the TX DMA so it fetches the next descriptor now
    fn tx_poll_demand(&self);

    /// Raw DMA interrupt status register
    fn interrupt_flags(&self) -> u32;

    /// Clear the given interrupt status bits (write-one-to-clear)
    fn acknowledge_interrupt(&self, flags: u32);

    /// Unmask the given DMA interrupt sources
    fn enable_interrupts(&self, mask: u32);

    /// Check the "receive buffer unavailable" status and clear it if set
    fn take_rx_buffer_unavailable(&self) -> bool;

    /// Link state as currently seen by the MAC
    fn link_status(&self) -> LinkStatus;

    /// Query the PHY for the link state
    fn phy_read_link_status(&self) -> LinkStatus;

    /// Restart auto-negotiation and wait for it to finish.
    /// Returns false if negotiation did not complete.
    fn phy_start_auto_negotiation(&self) -> bool;

    /// Apply speed and duplex, falling back to safe defaults when negotiation failed
    fn configure_mac(&self, auto_negotiation_failed: bool);

    /// Start DMA and MAC transmit/receive
    fn start(&self);

    /// Stop MAC and DMA transmit/receive
    fn stop(&self);
}

/// A packet buffer lent out by the network buffer pool.
///
/// The handle may move freely, but the payload region it designates must stay
/// put for as long as the handle exists: its address is handed to the DMA.
pub trait NetworkBuffer {
    /// Whole payload region
    fn payload(&self) -> &[u8];

    /// Whole payload region, writable
    fn payload_mut(&mut self) -> &mut [u8];

    /// Number of valid bytes in the payload
    fn data_len(&self) -> usize;

    /// Set the number of valid bytes in the payload
    fn set_data_len(&mut self, len: usize);

    /// Bus address of the payload as seen by the DMA
    fn dma_address(&self) -> u32 {
        self.payload().as_ptr() as usize as u32
    }
}

/// Fixed-size packet buffer allocator shared with the network stack
pub trait BufferPool {
    /// Buffer handle type
    type Buffer: NetworkBuffer;

    /// Get a buffer of at least `size` bytes, waiting at most `timeout_ms`
    fn acquire(&self, size: usize, timeout_ms: u32) -> Option<Self::Buffer>;

    /// Return a buffer to the pool
    fn release(&self, buffer: Self::Buffer);

    /// Lowest number of free buffers seen since start, if the pool tracks it
    fn minimum_free(&self) -> Option<usize> {
        None
    }
}

/// The network stack above the driver
pub trait NetworkInterface<B> {
    /// Hand over a chain of received frames.
    ///
    /// On failure the chain comes back untouched and the driver releases it.
    fn deliver<const N: usize>(
        &self,
        frames: FrameChain<B, N>,
        timeout_ms: u32,
    ) -> Result<(), FrameChain<B, N>>;

    /// Best-effort notification that the link went down
    fn network_down(&self);

    /// Configured IPv4 address, if any
    fn local_ipv4(&self) -> Option<[u8; 4]> {
        None
    }

    /// Whether a UDP socket is bound to `port`
    fn has_udp_socket(&self, _port: u16) -> bool {
        true
    }
}

/// Time and wake-up services of the task scheduler
pub trait Scheduler {
    /// Monotonic millisecond tick, wrapping
    fn now_ms(&self) -> u32;

    /// Yield the worker for a short while (one tick, or until the next interrupt)
    fn idle(&self) {
        core::hint::spin_loop();
    }

    /// Wake the worker; called from interrupt context
    fn notify(&self) {}

    /// Milliseconds elapsed since `since`
    fn elapsed_ms(&self, since: u32) -> u32 {
        self.now_ms().wrapping_sub(since)
    }
}
