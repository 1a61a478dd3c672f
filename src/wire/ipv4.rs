//! IPv4 framing details the IGMP wire layer depends on.
//!
//! Grounded on `igmpproxy.h`'s `IP_HEADER_RAOPT_LEN` (24) and `request.c`'s
//! `buildIgmpPkt`, which prepends the 4-byte Router Alert option ahead of the
//! IGMP payload on every transmitted query, giving an IHL of 6 words. §6
//! requires Router Alert unconditionally, so it is baked in as a constant
//! here rather than made configurable.

/// RFC 2113 Router Alert option: `{type=0x94, length=4, value=0x0000}`.
/// Prepended to the IP options of every IGMP query this daemon transmits.
pub const ROUTER_ALERT_OPTION: [u8; 4] = [0x94, 0x04, 0x00, 0x00];

/// IHL (in 32-bit words) of an IPv4 header carrying [`ROUTER_ALERT_OPTION`]:
/// the 20-byte fixed header plus the 4-byte option, divided by 4.
pub const IHL_WITH_ROUTER_ALERT: u8 = 6;

/// `IPPROTO_IGMP` (`<netinet/in.h>`), duplicated here rather than pulled from
/// `libc` so `wire::ipv4` has no dependency on the kernel collaborator.
const IPPROTO_IGMP: u8 = 2;

/// Build the 24-byte IPv4 header (20-byte fixed header plus
/// [`ROUTER_ALERT_OPTION`]) every transmitted query is framed with, per
/// `request.c`'s `buildIgmpPkt`. `IP_HDRINCL` is required on the sending
/// socket for this header to actually go out as written.
pub fn build_header(src: std::net::Ipv4Addr, dst: std::net::Ipv4Addr, payload_len: usize, ttl: u8) -> [u8; 24] {
    let mut hdr = [0u8; 24];
    hdr[0] = 0x40 | (IHL_WITH_ROUTER_ALERT & 0x0f);
    hdr[1] = 0xc0; // DSCP: Internet Control, matching IPTOS_PREC_INTERNETCONTROL
    let total_len = (24 + payload_len) as u16;
    hdr[2..4].copy_from_slice(&total_len.to_be_bytes());
    hdr[8] = ttl;
    hdr[9] = IPPROTO_IGMP;
    hdr[12..16].copy_from_slice(&src.octets());
    hdr[16..20].copy_from_slice(&dst.octets());
    hdr[20..24].copy_from_slice(&ROUTER_ALERT_OPTION);
    let sum = checksum(&hdr);
    hdr[10..12].copy_from_slice(&sum.to_be_bytes());
    hdr
}

/// Parse an inbound packet's IPv4 header far enough to hand the core its
/// source address, protocol number, and where the payload starts — as much
/// as a raw `SOCK_RAW`/`IPPROTO_IGMP` receiver ever needs.
pub fn parse_header(buf: &[u8]) -> Option<(std::net::Ipv4Addr, u8, usize)> {
    if buf.len() < 20 {
        return None;
    }
    let ihl = (buf[0] & 0x0f) as usize * 4;
    if buf.len() < ihl {
        return None;
    }
    let src = std::net::Ipv4Addr::new(buf[12], buf[13], buf[14], buf[15]);
    Some((src, buf[9], ihl))
}

/// Internet checksum (RFC 1071): one's-complement sum of 16-bit words,
/// folded and complemented. Used for both the IGMP message checksum and (by
/// the kernel collaborator) the IP header checksum.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum = 0u32;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += u16::from_be_bytes([*last, 0]) as u32;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
