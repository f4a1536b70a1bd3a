//! Fuzz target for frame decoding.
//!
//! The first byte picks a link type; the rest is the frame. Decoding must
//! never panic, and any payload it returns must lie inside the frame.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tcpweave::decode::{decode, linktype};
use tcpweave::pcap::RawPacket;

const LINK_TYPES: [u16; 5] = [
    linktype::ETHERNET,
    linktype::RAW,
    linktype::LINUX_SLL,
    linktype::LINUX_SLL2,
    linktype::NULL,
];

fuzz_target!(|data: &[u8]| {
    let Some((&selector, frame)) = data.split_first() else {
        return;
    };
    let link_type = LINK_TYPES[selector as usize % LINK_TYPES.len()];
    let len = frame.len() as u32;
    let packet = RawPacket::new(1, 0, len, len, link_type, frame.to_vec());

    if let Ok(Some(segment)) = decode(&packet) {
        assert!(segment.payload.len() <= frame.len());
    }
});
