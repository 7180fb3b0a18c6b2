//! DMA interrupt status and interrupt enable bits
use modular_bitfield::{prelude::*, BitfieldSpecifier};
use ufmt::derive::uDebug;

use super::event::Event;

/// DMA interrupt sources, as laid out in both the status and the enable register
#[derive(Clone, Copy, Debug, uDebug, Eq, PartialEq)]
#[repr(u32)]
pub enum DmaInterrupt {
    /// Transmit complete
    Transmit = 1 << 0,
    /// Transmit process stopped
    TransmitStopped = 1 << 1,
    /// Transmit jabber timeout
    TransmitJabberTimeout = 1 << 3,
    /// Receive FIFO overflow
    ReceiveOverflow = 1 << 4,
    /// Transmit FIFO underflow
    TransmitUnderflow = 1 << 5,
    /// Frame received
    Receive = 1 << 6,
    /// Receive descriptor unavailable, RX DMA suspended
    ReceiveBufferUnavailable = 1 << 7,
    /// Receive process stopped
    ReceiveStopped = 1 << 8,
    /// Receive watchdog timeout
    ReceiveWatchdogTimeout = 1 << 9,
    /// Fatal bus error
    FatalBusError = 1 << 13,
    /// Early receive
    EarlyReceive = 1 << 14,
    /// Abnormal interrupt summary
    AbnormalSummary = 1 << 15,
    /// Normal interrupt summary
    NormalSummary = 1 << 16,
}

impl DmaInterrupt {
    /// Sources the driver unmasks: every normal and abnormal condition the
    /// DMA reports, except timestamp, power management and MMC
    pub const DRIVER_MASK: u32 = DmaInterrupt::NormalSummary as u32
        | DmaInterrupt::AbnormalSummary as u32
        | DmaInterrupt::EarlyReceive as u32
        | DmaInterrupt::FatalBusError as u32
        | DmaInterrupt::ReceiveWatchdogTimeout as u32
        | DmaInterrupt::ReceiveStopped as u32
        | DmaInterrupt::ReceiveBufferUnavailable as u32
        | DmaInterrupt::Receive as u32
        | DmaInterrupt::TransmitUnderflow as u32
        | DmaInterrupt::ReceiveOverflow as u32
        | DmaInterrupt::TransmitJabberTimeout as u32
        | DmaInterrupt::TransmitStopped as u32
        | DmaInterrupt::Transmit as u32;

    /// Every interrupt bit of the status register; the bits above hold
    /// process states
    pub const ALL: u32 = (1 << 17) - 1;
}

/// DMA status register (DMARIS) layout
#[bitfield(bits = 32)]
#[derive(Clone, Copy, Eq, PartialEq)]
struct DmaStatusBitfield {
    transmit: B1,
    tx_stopped: B1,
    _tx_buffer_unavailable: B1,
    tx_jabber_timeout: B1,
    rx_overflow: B1,
    tx_underflow: B1,
    receive: B1,
    rx_buffer_unavailable: B1,
    rx_stopped: B1,
    rx_watchdog_timeout: B1,
    _early_transmit: B1,
    _reserved0: B2,
    fatal_bus_error: B1,
    _early_receive: B1,
    abnormal: B1,
    _normal: B1,
    rx_state: RxDmaState,
    tx_state: TxDmaState,
    bus_error_source: BusErrorSource,
    _reserved1: B6,
}

/// What the driver reads out of the DMA status register
#[derive(Clone, Copy, Debug, uDebug, Eq, PartialEq)]
#[allow(missing_docs)]
pub struct DmaStatus {
    pub transmit: bool,
    pub receive: bool,
    pub rx_buffer_unavailable: bool,
    pub abnormal: bool,

    // Abnormal causes
    pub fatal_bus_error: bool,
    pub rx_overflow: bool,
    pub tx_underflow: bool,
    pub tx_jabber_timeout: bool,
    pub rx_watchdog_timeout: bool,
    pub rx_stopped: bool,
    pub tx_stopped: bool,

    pub rx_state: RxDmaState,
    pub tx_state: TxDmaState,
    /// Only meaningful with `fatal_bus_error`
    pub bus_error_source: BusErrorSource,
}

impl DmaStatus {
    /// Parse the raw register value
    pub fn new(reg: u32) -> Self {
        let b = DmaStatusBitfield::from_bytes(reg.to_le_bytes());
        DmaStatus {
            transmit: b.transmit() != 0,
            receive: b.receive() != 0,
            rx_buffer_unavailable: b.rx_buffer_unavailable() != 0,
            abnormal: b.abnormal() != 0,
            fatal_bus_error: b.fatal_bus_error() != 0,
            rx_overflow: b.rx_overflow() != 0,
            tx_underflow: b.tx_underflow() != 0,
            tx_jabber_timeout: b.tx_jabber_timeout() != 0,
            rx_watchdog_timeout: b.rx_watchdog_timeout() != 0,
            rx_stopped: b.rx_stopped() != 0,
            tx_stopped: b.tx_stopped() != 0,
            rx_state: b.rx_state(),
            tx_state: b.tx_state(),
            bus_error_source: b.bus_error_source(),
        }
    }

    /// Worker events this status calls for
    pub fn events(&self) -> u32 {
        let mut events = 0;
        if self.receive || self.rx_buffer_unavailable {
            events |= Event::Receive as u32;
        }
        if self.transmit {
            events |= Event::Transmit as u32;
        }
        if self.abnormal {
            events |= Event::Error as u32;
        }
        events
    }
}

/// RX DMA process state (RS field)
#[derive(BitfieldSpecifier, Clone, Copy, Debug, uDebug, Eq, PartialEq)]
#[bits = 3]
#[allow(missing_docs)]
pub enum RxDmaState {
    Stopped = 0,
    Fetching = 1,
    Reserved = 2,
    Waiting = 3,
    Suspended = 4,
    Closing = 5,
    Timestamping = 6,
    Transferring = 7,
}

/// TX DMA process state (TS field)
#[derive(BitfieldSpecifier, Clone, Copy, Debug, uDebug, Eq, PartialEq)]
#[bits = 3]
#[allow(missing_docs)]
pub enum TxDmaState {
    Stopped = 0,
    Fetching = 1,
    Waiting = 2,
    Reading = 3,
    Timestamping = 4,
    Reserved = 5,
    Suspended = 6,
    Closing = 7,
}

/// Transfer that hit the bus error (AE field)
#[derive(BitfieldSpecifier, Clone, Copy, Debug, uDebug, Eq, PartialEq)]
#[bits = 3]
#[allow(missing_docs)]
pub enum BusErrorSource {
    RxDataWrite = 0,
    Reserved1 = 1,
    Reserved2 = 2,
    TxDataRead = 3,
    RxDescriptorWrite = 4,
    TxDescriptorWrite = 5,
    RxDescriptorRead = 6,
    TxDescriptorRead = 7,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_and_buffer_unavailable_both_mean_receive() {
        let ri = DmaStatus::new(DmaInterrupt::Receive as u32);
        let rbu = DmaStatus::new(DmaInterrupt::ReceiveBufferUnavailable as u32);
        assert!(ri.receive);
        assert!(rbu.rx_buffer_unavailable);
        assert_eq!(ri.events(), Event::Receive as u32);
        assert_eq!(rbu.events(), Event::Receive as u32);
    }

    #[test]
    fn abnormal_summary_raises_error() {
        let status = DmaStatus::new(
            DmaInterrupt::AbnormalSummary as u32
                | DmaInterrupt::FatalBusError as u32
                | DmaInterrupt::Transmit as u32
                | (6 << 23),
        );
        assert!(status.fatal_bus_error);
        assert_eq!(status.bus_error_source, BusErrorSource::RxDescriptorRead);
        assert_eq!(status.events(), Event::Error as u32 | Event::Transmit as u32);
    }

    #[test]
    fn process_states() {
        let status = DmaStatus::new((4 << 17) | (6 << 20));
        assert_eq!(status.rx_state, RxDmaState::Suspended);
        assert_eq!(status.tx_state, TxDmaState::Suspended);
        assert_eq!(status.events(), 0);
    }

    #[test]
    fn abnormal_causes() {
        let status = DmaStatus::new(
            DmaInterrupt::AbnormalSummary as u32
                | DmaInterrupt::ReceiveOverflow as u32
                | DmaInterrupt::TransmitUnderflow as u32,
        );
        assert!(status.rx_overflow && status.tx_underflow);
        assert!(!status.fatal_bus_error && !status.rx_stopped);
    }
}
