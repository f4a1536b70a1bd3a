//! Fuzz target for single-direction stream reassembly.
//!
//! Input is a list of records `[offset_hi, offset_lo, len, bytes...]`, each
//! ingested at `isn + 1 + offset`. Checks that delivered bytes never change
//! and never exceed what was offered.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tcpweave_core::stream::{OverlapPolicy, StreamBuffer};

fuzz_target!(|data: &[u8]| {
    let Some((&policy, mut rest)) = data.split_first() else {
        return;
    };
    let policy = if policy & 1 == 0 {
        OverlapPolicy::FirstWrite
    } else {
        OverlapPolicy::LastWrite
    };

    // Near the wrap point so sequence arithmetic is exercised.
    let isn = u32::MAX - 64;
    let mut buffer = StreamBuffer::new(policy, 4096);
    buffer.set_initial_seq(isn);

    let mut delivered: Vec<u8> = Vec::new();
    while rest.len() >= 3 {
        let offset = u16::from_be_bytes([rest[0], rest[1]]) as u32;
        let len = (rest[2] as usize).min(rest.len() - 3);
        let payload = Bytes::copy_from_slice(&rest[3..3 + len]);
        rest = &rest[3 + len..];

        buffer.ingest(isn.wrapping_add(1).wrapping_add(offset), &payload);

        let now = buffer.contiguous();
        assert!(now.len() >= delivered.len());
        assert_eq!(&now[..delivered.len()], &delivered[..]);
        delivered = now.to_vec();
    }

    buffer.flush();
    assert!(buffer.contiguous().starts_with(&delivered));
});
