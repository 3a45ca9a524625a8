//! IP layer implementation
//!
//! Handles IPv4 packet construction, parsing, routing, and fragmentation.
//! Provides the foundation for TCP and UDP transport protocols.

#![allow(static_mut_refs)]

use alloc::vec::Vec;

use spin::Mutex;

use super::{IpAddress, Ipv4Address};
use crate::error::KernelError;

/// IP protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IpProtocol {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
}

/// IPv4 header
#[derive(Debug, Clone)]
pub struct Ipv4Header {
    pub version: u8,
    pub ihl: u8,
    pub tos: u8,
    pub total_length: u16,
    pub identification: u16,
    pub flags: u8,
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub source: Ipv4Address,
    pub destination: Ipv4Address,
}

impl Ipv4Header {
    pub const MIN_SIZE: usize = 20;

    pub fn new(src: Ipv4Address, dst: Ipv4Address, protocol: IpProtocol) -> Self {
        Self {
            version: 4,
            ihl: 5, // 5 * 4 = 20 bytes
            tos: 0,
            total_length: 0,
            identification: 0,
            flags: 0,
            fragment_offset: 0,
            ttl: 64,
            protocol: protocol as u8,
            checksum: 0,
            source: src,
            destination: dst,
        }
    }

    pub fn to_bytes(&self) -> [u8; 20] {
        let mut bytes = [0u8; 20];

        bytes[0] = (self.version << 4) | self.ihl;
        bytes[1] = self.tos;
        bytes[2..4].copy_from_slice(&self.total_length.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.identification.to_be_bytes());
        bytes[6] = (self.flags << 5) | ((self.fragment_offset >> 8) as u8);
        bytes[7] = (self.fragment_offset & 0xFF) as u8;
        bytes[8] = self.ttl;
        bytes[9] = self.protocol;
        bytes[10..12].copy_from_slice(&self.checksum.to_be_bytes());
        bytes[12..16].copy_from_slice(&self.source.0);
        bytes[16..20].copy_from_slice(&self.destination.0);

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KernelError> {
        if bytes.len() < Self::MIN_SIZE {
            return Err(KernelError::InvalidArgument {
                name: "ip_header",
                value: "too_short",
            });
        }

        let version = bytes[0] >> 4;
        if version != 4 {
            return Err(KernelError::InvalidArgument {
                name: "ip_version",
                value: "not_ipv4",
            });
        }

        Ok(Self {
            version,
            ihl: bytes[0] & 0x0F,
            tos: bytes[1],
            total_length: u16::from_be_bytes([bytes[2], bytes[3]]),
            identification: u16::from_be_bytes([bytes[4], bytes[5]]),
            flags: bytes[6] >> 5,
            fragment_offset: u16::from_be_bytes([bytes[6] & 0x1F, bytes[7]]),
            ttl: bytes[8],
            protocol: bytes[9],
            checksum: u16::from_be_bytes([bytes[10], bytes[11]]),
            source: Ipv4Address([bytes[12], bytes[13], bytes[14], bytes[15]]),
            destination: Ipv4Address([bytes[16], bytes[17], bytes[18], bytes[19]]),
        })
    }

    /// Calculate checksum
    pub fn calculate_checksum(&mut self) {
        self.checksum = 0;
        let bytes = self.to_bytes();

        let mut sum: u32 = 0;
        for i in 0..10 {
            sum += u16::from_be_bytes([bytes[i * 2], bytes[i * 2 + 1]]) as u32;
        }

        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }

        self.checksum = !(sum as u16);
    }
}

/// Routing table entry
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub destination: Ipv4Address,
    pub netmask: Ipv4Address,
    pub gateway: Option<Ipv4Address>,
    pub interface: usize,
}

/// Simple routing table
static mut ROUTES: Vec<RouteEntry> = Vec::new();

/// Add a route
pub fn add_route(entry: RouteEntry) {
    // SAFETY: ROUTES is a static mut Vec modified during single-threaded kernel
    // init or controlled routing table updates. No concurrent access assumed.
    unsafe {
        ROUTES.push(entry);
    }
}

/// Lookup route for destination
pub fn lookup_route(dest: Ipv4Address) -> Option<RouteEntry> {
    // SAFETY: ROUTES is a static mut Vec read during route lookup. Read-only access
    // assumes no concurrent modification to the routing table.
    unsafe {
        for route in &ROUTES {
            let dest_masked = dest.to_u32() & route.netmask.to_u32();
            let route_masked = route.destination.to_u32() & route.netmask.to_u32();

            if dest_masked == route_masked {
                return Some(route.clone());
            }
        }
    }
    None
}

/// Configuration of the primary network interface.
#[derive(Debug, Clone, Copy)]
struct Interface {
    ip: Ipv4Address,
    netmask: Ipv4Address,
}

/// Primary interface configuration. Set to a QEMU user-mode-networking
/// default; `set_interface_ip` lets DHCP or static config override it.
static INTERFACE: Mutex<Interface> = Mutex::new(Interface {
    ip: Ipv4Address([10, 0, 2, 15]),
    netmask: Ipv4Address([255, 255, 255, 0]),
});

/// Get the currently configured interface IPv4 address.
pub fn get_interface_ip() -> Ipv4Address {
    INTERFACE.lock().ip
}

/// Set the interface IPv4 address (and optionally its netmask).
pub fn set_interface_ip(ip: Ipv4Address, netmask: Ipv4Address) {
    let mut iface = INTERFACE.lock();
    iface.ip = ip;
    iface.netmask = netmask;
}

/// A packet that could not be sent because its next-hop MAC address
/// was not yet resolved.
struct PendingPacket {
    next_hop: Ipv4Address,
    frame: Vec<u8>,
    queued_tick: u64,
}

/// Ticks a pending packet may wait for ARP resolution before being dropped.
const PENDING_TIMEOUT_TICKS: u64 = 300;

static PENDING: Mutex<Vec<PendingPacket>> = Mutex::new(Vec::new());
static PENDING_TICK: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(0);

/// Determine the next-hop IP address for a destination, consulting the
/// routing table and falling back to a configured gateway.
fn next_hop_for(dest: Ipv4Address) -> Ipv4Address {
    match lookup_route(dest) {
        Some(route) => route.gateway.unwrap_or(dest),
        None => dest,
    }
}

/// Route a destination to an egress interface and the next-hop IP that
/// must be ARP-resolved to reach it. Callers that need to resolve ARP
/// themselves (e.g. TCP's blocking `connect`) use this instead of going
/// through [`send`]'s queue-and-retry path.
pub fn route(dest: Ipv4Address) -> Result<Ipv4Address, KernelError> {
    if dest == Ipv4Address::LOCALHOST || dest == get_interface_ip() {
        return Ok(dest);
    }
    Ok(next_hop_for(dest))
}

/// Attempt to transmit a fully-built Ethernet frame addressed to `next_hop`.
/// Queues the frame behind an ARP resolution if the MAC is not yet known.
fn transmit_or_queue(next_hop: Ipv4Address, frame: Vec<u8>) {
    if let Some(mac) = super::arp::resolve(next_hop) {
        let our_mac =
            super::device::with_device("eth0", |dev| dev.mac_address()).unwrap_or(super::MacAddress::ZERO);
        let eth_frame =
            super::ethernet::construct_frame(mac, our_mac, super::ethernet::ETHERTYPE_IPV4, &frame);
        let pkt = super::Packet::from_bytes(&eth_frame);
        let _ = super::device::with_device_mut("eth0", |dev| dev.transmit(&pkt));
        return;
    }

    // Unresolved: kick off ARP resolution and queue the frame for retry.
    super::arp::send_arp_request(next_hop);
    PENDING.lock().push(PendingPacket {
        next_hop,
        frame,
        queued_tick: PENDING_TICK.load(core::sync::atomic::Ordering::Relaxed),
    });
}

/// Re-examine queued packets: transmit any whose next hop has since
/// resolved, and drop any that have waited past the ARP timeout.
pub fn process_pending() {
    let now = PENDING_TICK.fetch_add(1, core::sync::atomic::Ordering::Relaxed) + 1;

    let mut pending = PENDING.lock();
    let mut still_pending = Vec::with_capacity(pending.len());

    for entry in pending.drain(..) {
        if let Some(mac) = super::arp::resolve(entry.next_hop) {
            let our_mac = super::device::with_device("eth0", |dev| dev.mac_address())
                .unwrap_or(super::MacAddress::ZERO);
            let eth_frame = super::ethernet::construct_frame(
                mac,
                our_mac,
                super::ethernet::ETHERTYPE_IPV4,
                &entry.frame,
            );
            let pkt = super::Packet::from_bytes(&eth_frame);
            let _ = super::device::with_device_mut("eth0", |dev| dev.transmit(&pkt));
        } else if now.wrapping_sub(entry.queued_tick) < PENDING_TIMEOUT_TICKS {
            still_pending.push(entry);
        }
        // else: ARP never resolved in time, drop silently
    }

    *pending = still_pending;
}

/// Send IP packet
pub fn send(dest: IpAddress, protocol: IpProtocol, data: &[u8]) -> Result<(), KernelError> {
    match dest {
        IpAddress::V4(dest_v4) => {
            let src = get_interface_ip();

            let mut header = Ipv4Header::new(src, dest_v4, protocol);
            header.total_length = (Ipv4Header::MIN_SIZE + data.len()) as u16;
            header.calculate_checksum();

            let mut packet = Vec::with_capacity(header.total_length as usize);
            packet.extend_from_slice(&header.to_bytes());
            packet.extend_from_slice(data);

            // Loopback destinations never touch the wire.
            if dest_v4 == Ipv4Address::LOCALHOST || dest_v4 == src {
                super::update_stats_tx(header.total_length as usize);
                return dispatch_local(src, dest_v4, protocol, data);
            }

            let next_hop = next_hop_for(dest_v4);
            transmit_or_queue(next_hop, packet);

            super::update_stats_tx(header.total_length as usize);
            Ok(())
        }
        IpAddress::V6(_) => Err(KernelError::NotImplemented {
            feature: "ipv6_send",
        }),
    }
}

/// Deliver a packet addressed to ourselves directly to the transport layer,
/// bypassing the device/ARP path entirely.
fn dispatch_local(
    src: Ipv4Address,
    dst: Ipv4Address,
    protocol: IpProtocol,
    data: &[u8],
) -> Result<(), KernelError> {
    let src_addr = IpAddress::V4(src);
    let dst_addr = IpAddress::V4(dst);
    match protocol {
        IpProtocol::Tcp => super::tcp::process_packet(src_addr, dst_addr, data),
        IpProtocol::Udp => super::udp::process_packet(src_addr, dst_addr, data),
        IpProtocol::Icmp => Ok(()),
    }
}

/// Initialize IP layer
pub fn init() -> Result<(), KernelError> {
    println!("[IP] Initializing IP layer...");

    // Add default loopback route
    add_route(RouteEntry {
        destination: Ipv4Address::new(127, 0, 0, 0),
        netmask: Ipv4Address::new(255, 0, 0, 0),
        gateway: None,
        interface: 0,
    });

    // Add default route for the local subnet via the configured interface
    let iface = INTERFACE.lock();
    add_route(RouteEntry {
        destination: Ipv4Address::from_u32(iface.ip.to_u32() & iface.netmask.to_u32()),
        netmask: iface.netmask,
        gateway: None,
        interface: 1,
    });

    println!("[IP] IP layer initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_ipv4_header() {
        let src = Ipv4Address::new(192, 168, 1, 1);
        let dst = Ipv4Address::new(192, 168, 1, 2);
        let header = Ipv4Header::new(src, dst, IpProtocol::Tcp);

        assert_eq!(header.version, 4);
        assert_eq!(header.protocol, 6);
        assert_eq!(header.source, src);
        assert_eq!(header.destination, dst);
    }

    #[test_case]
    fn test_ipv4_header_roundtrip() {
        let src = Ipv4Address::new(10, 0, 0, 1);
        let dst = Ipv4Address::new(10, 0, 0, 2);
        let mut header = Ipv4Header::new(src, dst, IpProtocol::Udp);
        header.calculate_checksum();

        let bytes = header.to_bytes();
        let parsed = Ipv4Header::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.source, src);
        assert_eq!(parsed.destination, dst);
        assert_eq!(parsed.protocol, 17);
    }
}
