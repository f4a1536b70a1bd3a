//! Frame decoding: link layer, IP and TCP headers down to a [`Segment`].
//!
//! Uses zero-copy header parsing via etherparse. The segment payload is a
//! slice of the frame's buffer.

use std::net::IpAddr;
use std::ops::Range;

use etherparse::{Ethernet2HeaderSlice, Ipv4HeaderSlice, Ipv6HeaderSlice, TcpHeaderSlice};
use tcpweave_core::stream::{NetworkFlow, Segment, TcpFlags, TransportFlow};

use crate::error::DecodeError;
use crate::pcap::RawPacket;

/// Link layer types we can strip.
pub mod linktype {
    pub const NULL: u16 = 0;
    pub const ETHERNET: u16 = 1;
    pub const RAW_BSD: u16 = 12;
    pub const RAW_OPENBSD: u16 = 14;
    pub const RAW: u16 = 101;
    pub const LINUX_SLL: u16 = 113;
    pub const IPV4: u16 = 228;
    pub const IPV6: u16 = 229;
    pub const LINUX_SLL2: u16 = 276;
}

mod ethertype {
    pub const IPV4: u16 = 0x0800;
    pub const IPV6: u16 = 0x86dd;
    pub const VLAN: u16 = 0x8100;
    pub const QINQ: u16 = 0x88a8;
}

mod ip_protocol {
    pub const TCP: u8 = 6;
    pub const HOP_BY_HOP: u8 = 0;
    pub const ROUTING: u8 = 43;
    pub const FRAGMENT: u8 = 44;
    pub const DESTINATION: u8 = 60;
}

/// Network layer found after stripping the link header.
enum Network {
    Ipv4,
    Ipv6,
    Other,
}

/// Decode a captured frame into a TCP segment.
///
/// Returns `Ok(None)` for frames that are valid but carry no TCP segment we
/// can use (non-IP, non-TCP, IP fragments).
pub fn decode(packet: &RawPacket) -> Result<Option<Segment>, DecodeError> {
    let data = &packet.data[..];
    let (network, offset) = strip_link(packet.link_type, data)?;

    let parsed = match network {
        Network::Ipv4 => decode_ipv4(data, offset)?,
        Network::Ipv6 => decode_ipv6(data, offset)?,
        Network::Other => None,
    };
    let Some((net, ip_payload)) = parsed else {
        return Ok(None);
    };

    let tcp = TcpHeaderSlice::from_slice(&data[ip_payload.clone()]).map_err(|e| {
        DecodeError::Malformed {
            layer: "tcp",
            reason: e.to_string(),
        }
    })?;
    let payload_start = ip_payload.start + tcp.slice().len();
    let flags = TcpFlags {
        syn: tcp.syn(),
        ack: tcp.ack(),
        fin: tcp.fin(),
        rst: tcp.rst(),
    };

    Ok(Some(Segment::new(
        net,
        TransportFlow::new(tcp.source_port(), tcp.destination_port()),
        tcp.sequence_number(),
        flags,
        packet.data.slice(payload_start..ip_payload.end),
        packet.timestamp_us,
    )))
}

/// Find the network layer and where it starts.
fn strip_link(link_type: u16, data: &[u8]) -> Result<(Network, usize), DecodeError> {
    match link_type {
        linktype::ETHERNET => {
            let eth = Ethernet2HeaderSlice::from_slice(data).map_err(|e| DecodeError::Malformed {
                layer: "ethernet",
                reason: e.to_string(),
            })?;
            let mut ether_type = eth.ether_type().0;
            let mut offset = eth.slice().len();
            // 802.1Q / 802.1ad tags: 2 bytes TCI, 2 bytes inner ethertype
            while ether_type == ethertype::VLAN || ether_type == ethertype::QINQ {
                let tag = data.get(offset..offset + 4).ok_or(DecodeError::Truncated {
                    layer: "vlan",
                    needed: offset + 4,
                    have: data.len(),
                })?;
                ether_type = u16::from_be_bytes([tag[2], tag[3]]);
                offset += 4;
            }
            Ok((by_ethertype(ether_type), offset))
        }
        linktype::LINUX_SLL => {
            let header = data.get(..16).ok_or(DecodeError::Truncated {
                layer: "linux_sll",
                needed: 16,
                have: data.len(),
            })?;
            Ok((by_ethertype(u16::from_be_bytes([header[14], header[15]])), 16))
        }
        linktype::LINUX_SLL2 => {
            let header = data.get(..20).ok_or(DecodeError::Truncated {
                layer: "linux_sll2",
                needed: 20,
                have: data.len(),
            })?;
            Ok((by_ethertype(u16::from_be_bytes([header[0], header[1]])), 20))
        }
        linktype::NULL => {
            // 4-byte host-order address family, then the IP header
            if data.len() < 4 {
                return Err(DecodeError::Truncated {
                    layer: "null",
                    needed: 4,
                    have: data.len(),
                });
            }
            Ok((by_version(data.get(4).copied()), 4))
        }
        linktype::RAW | linktype::RAW_BSD | linktype::RAW_OPENBSD => {
            Ok((by_version(data.first().copied()), 0))
        }
        linktype::IPV4 => Ok((Network::Ipv4, 0)),
        linktype::IPV6 => Ok((Network::Ipv6, 0)),
        other => Err(DecodeError::UnsupportedLinkType { link_type: other }),
    }
}

fn by_ethertype(ether_type: u16) -> Network {
    match ether_type {
        ethertype::IPV4 => Network::Ipv4,
        ethertype::IPV6 => Network::Ipv6,
        _ => Network::Other,
    }
}

/// Pick the IP version from the first header nibble.
fn by_version(first: Option<u8>) -> Network {
    match first.map(|b| b >> 4) {
        Some(4) => Network::Ipv4,
        Some(6) => Network::Ipv6,
        _ => Network::Other,
    }
}

/// Returns the flow and the byte range of the TCP segment within `data`.
fn decode_ipv4(
    data: &[u8],
    offset: usize,
) -> Result<Option<(NetworkFlow, Range<usize>)>, DecodeError> {
    let ip = Ipv4HeaderSlice::from_slice(&data[offset..]).map_err(|e| DecodeError::Malformed {
        layer: "ipv4",
        reason: e.to_string(),
    })?;
    if ip.protocol().0 != ip_protocol::TCP {
        return Ok(None);
    }
    if ip.more_fragments() || ip.fragments_offset().value() != 0 {
        return Ok(None);
    }

    let start = offset + ip.slice().len();
    // Zero total length shows up in captures taken before segmentation offload
    let end = match ip.total_len() as usize {
        0 => data.len(),
        total => (offset + total).min(data.len()),
    };
    if end < start {
        return Err(DecodeError::Truncated {
            layer: "ipv4",
            needed: start,
            have: end,
        });
    }

    let net = NetworkFlow::new(
        IpAddr::V4(ip.source_addr()),
        IpAddr::V4(ip.destination_addr()),
    );
    Ok(Some((net, start..end)))
}

fn decode_ipv6(
    data: &[u8],
    offset: usize,
) -> Result<Option<(NetworkFlow, Range<usize>)>, DecodeError> {
    let ip = Ipv6HeaderSlice::from_slice(&data[offset..]).map_err(|e| DecodeError::Malformed {
        layer: "ipv6",
        reason: e.to_string(),
    })?;
    let header_end = offset + ip.slice().len();
    let end = match ip.payload_length() as usize {
        0 => data.len(), // Jumbogram or offload
        len => (header_end + len).min(data.len()),
    };

    // Walk the extension headers we can skip
    let mut next_header = ip.next_header().0;
    let mut start = header_end;
    loop {
        match next_header {
            ip_protocol::TCP => break,
            ip_protocol::FRAGMENT => return Ok(None),
            ip_protocol::HOP_BY_HOP | ip_protocol::ROUTING | ip_protocol::DESTINATION => {
                let ext = data.get(start..start + 2).ok_or(DecodeError::Truncated {
                    layer: "ipv6",
                    needed: start + 2,
                    have: data.len(),
                })?;
                next_header = ext[0];
                start += (ext[1] as usize + 1) * 8;
            }
            _ => return Ok(None),
        }
    }
    if end < start {
        return Err(DecodeError::Truncated {
            layer: "ipv6",
            needed: start,
            have: end,
        });
    }

    let net = NetworkFlow::new(
        IpAddr::V6(ip.source_addr()),
        IpAddr::V6(ip.destination_addr()),
    );
    Ok(Some((net, start..end)))
}
