//! Driver configuration

use super::hal::MediaInterface;
use super::rdes::RXBUFSIZE;
use super::tdes::TXBUFSIZE;

/// Largest buffer length a descriptor's 13-bit size field can hold
pub const MAX_BUFFER_SIZE: usize = 0x1fff;

/// Tunables of the ring engine. Ring sizes are const generics on the driver,
/// everything else lives here.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Config {
    /// Station address, programmed into address filter 0
    pub mac_address: [u8; 6],
    /// Optional second address, typically the LLMNR multicast group
    /// `01:00:5e:00:00:fc`
    pub extra_mac_address: Option<[u8; 6]>,
    /// MAC to PHY interface
    pub media_interface: MediaInterface,

    /// Bytes per RX buffer, also the length programmed into RX descriptors.
    /// At most [`MAX_BUFFER_SIZE`].
    pub rx_buffer_size: usize,
    /// Longest frame `transmit` will queue; longer frames are truncated.
    /// At most [`MAX_BUFFER_SIZE`].
    pub tx_buffer_size: usize,

    /// How long initialisation waits for each RX buffer
    pub init_buffer_wait_ms: u32,
    /// How long the receive path waits for a replacement buffer
    pub rx_buffer_wait_ms: u32,
    /// How long the network stack gets to take a frame chain
    pub deliver_timeout_ms: u32,
    /// How long `transmit` waits for a free TX descriptor
    pub tx_slot_wait_ms: u32,
    /// Longest idle wait of the worker between events
    pub max_block_ms: u32,

    /// PHY poll interval while the link is up
    pub link_up_check_ms: u32,
    /// PHY poll interval while the link is down
    pub link_down_check_ms: u32,

    /// Inspect IPv4/UDP headers of received frames, not just the ethertype
    pub filter_packets: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mac_address: [0x02, 0x00, 0x00, 0x00, 0x00, 0x01],
            extra_mac_address: None,
            media_interface: MediaInterface::Rmii,
            rx_buffer_size: RXBUFSIZE,
            tx_buffer_size: TXBUFSIZE,
            init_buffer_wait_ms: 100,
            rx_buffer_wait_ms: 250,
            deliver_timeout_ms: 1000,
            tx_slot_wait_ms: 50,
            max_block_ms: 100,
            link_up_check_ms: 2000,
            link_down_check_ms: 1000,
            filter_packets: false,
        }
    }
}

impl Config {
    /// Default configuration with the given station address
    pub fn with_mac_address(mac_address: [u8; 6]) -> Self {
        Config {
            mac_address,
            ..Default::default()
        }
    }

    /// Same configuration with both buffer sizes cut down to what a
    /// descriptor can describe
    pub fn clamped(self) -> Self {
        Config {
            rx_buffer_size: self.rx_buffer_size.min(MAX_BUFFER_SIZE),
            tx_buffer_size: self.tx_buffer_size.min(MAX_BUFFER_SIZE),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sizes_fit_the_descriptor_field() {
        let mut config = Config::default();
        assert_eq!(config.clamped(), config);

        config.rx_buffer_size = 10_000;
        config.tx_buffer_size = MAX_BUFFER_SIZE + 1;
        let clamped = config.clamped();
        assert_eq!(clamped.rx_buffer_size, MAX_BUFFER_SIZE);
        assert_eq!(clamped.tx_buffer_size, MAX_BUFFER_SIZE);
        assert_eq!(clamped.mac_address, config.mac_address);
    }
}
