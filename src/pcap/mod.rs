//! PCAP file reading module.
//!
//! This module handles reading PCAP and PCAPNG files (optionally gzipped)
//! and exposing raw packets for decoding.

mod packet;
mod reader;

pub use packet::RawPacket;
pub use reader::{is_gzip_extension, PcapReader};
