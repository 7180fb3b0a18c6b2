//! [`Emac`] binding for the TM4C129 EMAC0 peripheral and its internal PHY

use tm4c129x_hal::{
    sysctl::PllOutputFrequency,
    tm4c129x::{EMAC0, FLASH_CTRL},
};

use ufmt::derive::uDebug;

use super::hal::{Emac, LinkStatus, MacAddressIndex, MediaInterface};

/// PHY Basic Mode Control address
const EPHYBMCR: u8 = 0x0;

/// PHY Basic Mode Status address
const EPHYBMSR: u8 = 0x1;

/// PHY Status address
const EPHYSTS: u8 = 0x10;

/// PHY MII Interrupt Status 1 address
const EPHYMISR1: u8 = 0x12;

/// PHY MII Interrupt Status 2 address
const EPHYMISR2: u8 = 0x13;

/// BMCR: auto-negotiation enable
const BMCR_ANEN: u16 = 1 << 12;
/// BMCR: restart auto-negotiation
const BMCR_RESTART_AN: u16 = 1 << 9;
/// BMSR: link up (latches low)
const BMSR_LINK: u16 = 1 << 2;
/// BMSR: auto-negotiation complete
const BMSR_AN_COMPLETE: u16 = 1 << 5;
/// EPHYSTS: link up, real-time
const STS_LINK: u16 = 1 << 0;
/// EPHYSTS: 10 Mb/s when set, 100 Mb/s when clear
const STS_SPEED_10: u16 = 1 << 1;
/// EPHYSTS: full duplex
const STS_FULL_DUPLEX: u16 = 1 << 2;

/// PC register interface select value for RMII
const PINTFS_RMII: u8 = 0x4;

/// DMARIS bit for "receive buffer unavailable"
const DMARIS_RU: u32 = 1 << 7;

/// BMSR reads spent waiting for auto-negotiation
const AUTO_NEGOTIATION_POLLS: u32 = 200_000;

/// Get preprogrammed MAC address from ROM
pub fn rom_mac_address(flash: &FLASH_CTRL) -> [u8; 6] {
    // Only the least-significant 3 bytes of each user register are part of
    // the address, and they are stored in reverse order
    let addr0: [u8; 4] = flash.userreg0.read().bits().to_be_bytes();
    let addr1: [u8; 4] = flash.userreg1.read().bits().to_be_bytes();
    [addr0[3], addr0[2], addr0[1], addr1[3], addr1[2], addr1[1]]
}

/// EMAC0 with the settings that are fixed for the lifetime of the driver.
///
/// Uses 8-word descriptors, store-and-forward DMA and masks all MMC
/// interrupts. MDIO goes to the internal PHY unless RMII is selected, in
/// which case the external PHY is used.
pub struct Tm4c129Emac {
    /// EMAC peripheral registers
    pub emac: EMAC0,
    /// System clock frequency, for the MDIO clock divider
    pub system_clk_freq: PllOutputFrequency,
    /// Clock-sync preamble length
    pub preamble_length: PreambleLength,
    /// Inter-frame silence duration in bits
    pub interframe_gap: InterFrameGap,
    /// DMA burst size, same for RX and TX
    pub burst_size: BurstSizeDMA,
}

impl Tm4c129Emac {
    /// Binding with the usual 7-byte preamble, 96-bit gap and 8-word bursts
    pub fn new(emac: EMAC0, system_clk_freq: PllOutputFrequency) -> Self {
        Tm4c129Emac {
            emac,
            system_clk_freq,
            preamble_length: PreambleLength::_7,
            interframe_gap: InterFrameGap::_96,
            burst_size: BurstSizeDMA::_8,
        }
    }

    /// Do a soft reset of the EMAC and DMA.
    ///
    /// This may loop indefinitely if the EMAC fails to come out of reset.
    fn reset(&self) {
        self.emac.dmabusmod.modify(|_, w| w.swr().set_bit());
        while self.emac.dmabusmod.read().swr().bit_is_set() {}
    }

    /// Read a PHY register via MII.
    ///
    /// Spins while the MII link is busy; requires the MDIO clock divider to
    /// have been set by [`Emac::initialize`].
    fn phyread(&self, reg_addr: u8) -> u16 {
        while self.emac.miiaddr.read().miib().bit_is_set() {}

        self.emac.miiaddr.modify(|_, w| unsafe {
            w.mii()
                .bits(reg_addr) // PHY register to read from
                .pla()
                .bits(0) // PHY 0
                .miiw()
                .clear_bit() // Read operation
                .miib()
                .set_bit() // Cleared by hardware when done
        });

        while self.emac.miiaddr.read().miib().bit_is_set() {}
        self.emac.miidata.read().data().bits()
    }

    /// Write a PHY register via MII
    fn phywrite(&self, reg_addr: u8, value: u16) {
        while self.emac.miiaddr.read().miib().bit_is_set() {}

        self.emac.miidata.write(|w| unsafe { w.data().bits(value) });
        self.emac.miiaddr.modify(|_, w| unsafe {
            w.mii()
                .bits(reg_addr)
                .pla()
                .bits(0)
                .miiw()
                .set_bit() // Write operation
                .miib()
                .set_bit()
        });

        while self.emac.miiaddr.read().miib().bit_is_set() {}
    }

    /// Clear PHY interrupts by reading their status
    fn phyclear(&self) {
        self.phyread(EPHYMISR1);
        self.phyread(EPHYMISR2);
    }
}

impl Emac for Tm4c129Emac {
    fn initialize(&self, media: MediaInterface) {
        self.stop();

        // Interface selection latches on reset
        match media {
            MediaInterface::Mii => self.emac.pc.modify(|_, w| {
                w.phyext().clear_bit().mdixen().set_bit().anen().set_bit()
            }),
            MediaInterface::Rmii => self.emac.pc.modify(|_, w| unsafe {
                w.phyext().set_bit().pintfs().bits(PINTFS_RMII)
            }),
        }
        self.reset();

        // 8-word descriptors, equal RX and TX burst limits
        let burst = self.burst_size as u8;
        self.emac.dmabusmod.modify(|_, w| unsafe {
            w.atds().set_bit().pbl().bits(burst).usp().clear_bit()
        });

        // Mask all MMC counter interrupts
        self.emac.mmcrxim.write(|w| unsafe { w.bits(u32::MAX) });
        self.emac.mmctxim.write(|w| unsafe { w.bits(u32::MAX) });

        match self.system_clk_freq {
            // These are below the minimum and may cause hardware UB
            PllOutputFrequency::_6mhz => self.emac.miiaddr.write(|w| w.cr()._20_35()),
            PllOutputFrequency::_12mhz => self.emac.miiaddr.write(|w| w.cr()._20_35()),
            // These are nominal
            PllOutputFrequency::_24mhz => self.emac.miiaddr.write(|w| w.cr()._20_35()),
            PllOutputFrequency::_30mhz => self.emac.miiaddr.write(|w| w.cr()._20_35()),
            PllOutputFrequency::_48mhz => self.emac.miiaddr.write(|w| w.cr()._35_60()),
            PllOutputFrequency::_60mhz => self.emac.miiaddr.write(|w| w.cr()._35_60()),
            PllOutputFrequency::_120mhz => self.emac.miiaddr.write(|w| w.cr()._100_150()),
        }

        match self.preamble_length {
            PreambleLength::_3 => self.emac.cfg.modify(|_, w| w.prelen()._3()),
            PreambleLength::_5 => self.emac.cfg.modify(|_, w| w.prelen()._5()),
            PreambleLength::_7 => self.emac.cfg.modify(|_, w| w.prelen()._7()),
        }
        match self.interframe_gap {
            InterFrameGap::_40 => self.emac.cfg.modify(|_, w| w.ifg()._40()),
            InterFrameGap::_48 => self.emac.cfg.modify(|_, w| w.ifg()._48()),
            InterFrameGap::_56 => self.emac.cfg.modify(|_, w| w.ifg()._56()),
            InterFrameGap::_64 => self.emac.cfg.modify(|_, w| w.ifg()._64()),
            InterFrameGap::_72 => self.emac.cfg.modify(|_, w| w.ifg()._72()),
            InterFrameGap::_80 => self.emac.cfg.modify(|_, w| w.ifg()._80()),
            InterFrameGap::_88 => self.emac.cfg.modify(|_, w| w.ifg()._88()),
            InterFrameGap::_96 => self.emac.cfg.modify(|_, w| w.ifg()._96()),
        }

        // Checksum offload, needed for the descriptors' CIC field to apply
        self.emac.cfg.modify(|_, w| w.ipc().set_bit());
        // Store-and-forward in both directions
        self.emac
            .dmaopmode
            .modify(|_, w| w.tsf().set_bit().rsf().set_bit());

        self.phyclear();
        self.emac.dmaris.write(|w| unsafe { w.bits(u32::MAX) });
    }

    fn set_mac_address(&self, index: MacAddressIndex, address: [u8; 6]) {
        let hi = u16::from_le_bytes([address[4], address[5]]);
        let lo = u32::from_le_bytes([address[0], address[1], address[2], address[3]]);

        // The low register must be written last; that write latches the address
        match index {
            MacAddressIndex::Index0 => {
                self.emac.addr0h.write(|w| unsafe { w.addrhi().bits(hi) });
                self.emac.addr0l.write(|w| unsafe { w.addrlo().bits(lo) });
            }
            MacAddressIndex::Index1 => {
                self.emac
                    .addr1h
                    .write(|w| unsafe { w.addrhi().bits(hi).ae().set_bit() });
                self.emac.addr1l.write(|w| unsafe { w.addrlo().bits(lo) });
            }
        }
    }

    fn set_dma_rx_descriptor_table(&self, address: u32) {
        self.emac.rxdladdr.write(|w| unsafe { w.bits(address) });
    }

    fn set_dma_tx_descriptor_table(&self, address: u32) {
        self.emac.txdladdr.write(|w| unsafe { w.bits(address) });
    }

    fn rx_poll_demand(&self) {
        self.emac.rxpolld.write(|w| unsafe { w.rpd().bits(0) });
    }

    fn tx_poll_demand(&self) {
        self.emac.txpolld.write(|w| unsafe { w.tpd().bits(0) });
    }

    fn interrupt_flags(&self) -> u32 {
        self.emac.dmaris.read().bits()
    }

    fn acknowledge_interrupt(&self, flags: u32) {
        // Write-one-to-clear
        self.emac.dmaris.write(|w| unsafe { w.bits(flags) });
    }

    fn enable_interrupts(&self, mask: u32) {
        self.emac.dmaim.write(|w| unsafe { w.bits(mask) });
    }

    fn take_rx_buffer_unavailable(&self) -> bool {
        cortex_m::asm::dsb();
        if self.emac.dmaris.read().bits() & DMARIS_RU != 0 {
            self.emac.dmaris.write(|w| unsafe { w.bits(DMARIS_RU) });
            true
        } else {
            false
        }
    }

    fn link_status(&self) -> LinkStatus {
        if self.phyread(EPHYSTS) & STS_LINK != 0 {
            LinkStatus::Up
        } else {
            LinkStatus::Down
        }
    }

    fn phy_read_link_status(&self) -> LinkStatus {
        // First read returns the latched value
        self.phyread(EPHYBMSR);
        if self.phyread(EPHYBMSR) & BMSR_LINK != 0 {
            LinkStatus::Up
        } else {
            LinkStatus::Down
        }
    }

    fn phy_start_auto_negotiation(&self) -> bool {
        self.phywrite(EPHYBMCR, BMCR_ANEN | BMCR_RESTART_AN);
        (0..AUTO_NEGOTIATION_POLLS).any(|_| self.phyread(EPHYBMSR) & BMSR_AN_COMPLETE != 0)
    }

    fn configure_mac(&self, auto_negotiation_failed: bool) {
        let (fast, full_duplex) = if auto_negotiation_failed {
            (true, true)
        } else {
            let status = self.phyread(EPHYSTS);
            (status & STS_SPEED_10 == 0, status & STS_FULL_DUPLEX != 0)
        };
        self.emac
            .cfg
            .modify(|_, w| w.fes().bit(fast).dupm().bit(full_duplex));
    }

    /// Start DMA then EMAC (order is important)
    fn start(&self) {
        self.emac
            .dmaopmode
            .modify(|_, w| w.st().set_bit().sr().set_bit());
        self.emac.cfg.modify(|_, w| w.te().set_bit().re().set_bit());
    }

    /// Stop EMAC then DMA (order is important)
    fn stop(&self) {
        self.emac.cfg.modify(|_, w| w.te().clear_bit().re().clear_bit());
        self.emac
            .dmaopmode
            .modify(|_, w| w.st().clear_bit().sr().clear_bit());
    }
}

/// Choices of preamble length in bytes.
///
/// This is the number of alternating 0-1 bits transmitted at the start of each frame
/// in order to synchronize clocks between the transmitter and receiver.
#[derive(Clone, Copy, uDebug, Debug)]
#[allow(missing_docs)]
pub enum PreambleLength {
    _3,
    _5,
    _7,
}

/// Choices of interframe gap length in bits.
///
/// This is the duration of radio-silence used to signal the end of a transmission frame.
#[derive(Clone, Copy, uDebug, Debug)]
#[allow(missing_docs)]
pub enum InterFrameGap {
    _40,
    _48,
    _56,
    _64,
    _72,
    _80,
    _88,
    _96,
}

/// DMA transfer burst size in 32-bit words
#[derive(Clone, Copy, uDebug, Debug, Eq, PartialEq)]
#[allow(missing_docs)]
#[repr(u8)]
pub enum BurstSizeDMA {
    _1 = 1,
    _2 = 2,
    _4 = 4,
    _8 = 8,
    _16 = 16,
    _32 = 32,
}
