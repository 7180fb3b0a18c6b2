//! Early accept/reject decision on received frames.
//!
//! Runs before a replacement buffer is taken from the pool, so frames the
//! network stack would throw away anyway never cost a buffer swap.

use smoltcp::wire::{EthernetFrame, EthernetProtocol, IpProtocol, Ipv4Packet, UdpPacket};

/// UDP port replies from DNS servers arrive from
pub const DNS_PORT: u16 = 53;

/// Version 4, header length 5 words
const MIN_VERSION_IHL: u8 = 0x45;

/// Version 4, header length 15 words
const MAX_VERSION_IHL: u8 = 0x4f;

/// Frame admission policy
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AdmissionFilter {
    /// Also inspect IPv4 and UDP headers, not just the ethertype
    pub filter_packets: bool,
}

impl AdmissionFilter {
    /// Filter that only looks at the ethertype, or the IP and UDP headers too
    pub const fn new(filter_packets: bool) -> Self {
        AdmissionFilter { filter_packets }
    }

    /// Decide whether `frame` (without CRC) is worth passing up.
    ///
    /// `local_ipv4` is the configured address, if any; `has_udp_socket`
    /// reports whether anything listens on a UDP port.
    pub fn accept(
        &self,
        frame: &[u8],
        local_ipv4: Option<[u8; 4]>,
        has_udp_socket: impl Fn(u16) -> bool,
    ) -> bool {
        let Ok(ethernet) = EthernetFrame::new_checked(frame) else {
            return false;
        };
        match ethernet.ethertype() {
            EthernetProtocol::Arp => return true,
            EthernetProtocol::Ipv4 => {}
            _ => return false,
        }

        if !self.filter_packets {
            return true;
        }

        let Ok(ip) = Ipv4Packet::new_checked(ethernet.payload()) else {
            return false;
        };

        // Fragments are reassembled above us only if they are whole
        if ip.frag_offset() != 0 {
            return false;
        }

        let version_ihl = (ip.version() << 4) | (ip.header_len() / 4);
        if !(MIN_VERSION_IHL..=MAX_VERSION_IHL).contains(&version_ihl) {
            return false;
        }

        // Unicast for someone else; broadcast (x.x.x.255) always passes
        let destination = ip.dst_addr();
        let destination = destination.as_bytes();
        if let Some(local) = local_ipv4.filter(|a| *a != [0; 4]) {
            if destination != &local[..] && destination[3] != 0xff {
                return false;
            }
        }

        if ip.next_header() == IpProtocol::Udp {
            let Ok(udp) = UdpPacket::new_checked(ip.payload()) else {
                return false;
            };
            if !has_udp_socket(udp.dst_port()) && udp.src_port() != DNS_PORT {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: [u8; 4] = [10, 0, 0, 229];

    fn frame(ethertype: [u8; 2]) -> Vec<u8> {
        let mut f = vec![0_u8; 14];
        f[0..6].copy_from_slice(&[0xff; 6]);
        f[12..14].copy_from_slice(&ethertype);
        f
    }

    fn udp(dst_ip: [u8; 4], src_port: u16, dst_port: u16) -> Vec<u8> {
        let mut f = frame([0x08, 0x00]);
        let mut ip = vec![0_u8; 20 + 8 + 4];
        ip[0] = 0x45;
        let ip_len = ip.len() as u16;
        ip[2..4].copy_from_slice(&ip_len.to_be_bytes());
        ip[8] = 64;
        ip[9] = 17;
        ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ip[16..20].copy_from_slice(&dst_ip);
        ip[20..22].copy_from_slice(&src_port.to_be_bytes());
        ip[22..24].copy_from_slice(&dst_port.to_be_bytes());
        ip[24..26].copy_from_slice(&12_u16.to_be_bytes());
        f.extend_from_slice(&ip);
        f
    }

    #[test]
    fn arp_always_passes() {
        let mut arp = frame([0x08, 0x06]);
        arp.extend_from_slice(&[0; 28]);
        assert!(AdmissionFilter::new(false).accept(&arp, None, |_| false));
        assert!(AdmissionFilter::new(true).accept(&arp, Some(LOCAL), |_| false));
    }

    #[test]
    fn unknown_ethertypes_are_rejected() {
        let mut ipv6 = frame([0x86, 0xdd]);
        ipv6.extend_from_slice(&[0; 40]);
        assert!(!AdmissionFilter::new(false).accept(&ipv6, None, |_| true));
    }

    #[test]
    fn runts_are_rejected() {
        assert!(!AdmissionFilter::new(false).accept(&[0_u8; 6], None, |_| true));
    }

    #[test]
    fn ipv4_passes_without_packet_filtering() {
        let f = udp([192, 168, 1, 1], 1000, 2000);
        assert!(AdmissionFilter::new(false).accept(&f, Some(LOCAL), |_| false));
    }

    #[test]
    fn foreign_unicast_is_rejected() {
        let filter = AdmissionFilter::new(true);
        assert!(!filter.accept(&udp([10, 0, 0, 7], 1000, 2000), Some(LOCAL), |_| true));
        assert!(filter.accept(&udp(LOCAL, 1000, 2000), Some(LOCAL), |_| true));
        assert!(filter.accept(&udp([10, 0, 0, 255], 1000, 2000), Some(LOCAL), |_| true));
        // No address configured yet (DHCP in progress)
        assert!(filter.accept(&udp([10, 0, 0, 7], 1000, 2000), None, |_| true));
    }

    #[test]
    fn udp_needs_a_socket_unless_it_is_dns() {
        let filter = AdmissionFilter::new(true);
        assert!(!filter.accept(&udp(LOCAL, 1000, 2000), Some(LOCAL), |_| false));
        assert!(filter.accept(&udp(LOCAL, DNS_PORT, 2000), Some(LOCAL), |_| false));
        assert!(filter.accept(&udp(LOCAL, 1000, 2000), Some(LOCAL), |p| p == 2000));
    }

    #[test]
    fn fragments_and_options_out_of_range_are_rejected() {
        let filter = AdmissionFilter::new(true);
        let mut fragment = udp(LOCAL, 1000, 2000);
        fragment[14 + 6..14 + 8].copy_from_slice(&0x0010_u16.to_be_bytes());
        assert!(!filter.accept(&fragment, Some(LOCAL), |_| true));

        let mut version6 = udp(LOCAL, 1000, 2000);
        version6[14] = 0x65;
        assert!(!filter.accept(&version6, Some(LOCAL), |_| true));
    }
}
