//! PCAP file reader.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use pcap_parser::pcapng::Block;
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError, PcapNGReader};

use super::RawPacket;
use crate::error::{Error, PcapError as OurPcapError};

/// Buffer size for reading PCAP files (64KB).
const BUFFER_SIZE: usize = 65536;

/// Gzip magic bytes.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Link type assumed until a header says otherwise.
const LINKTYPE_ETHERNET: u16 = 1;

type Source = BufReader<Box<dyn Read + Send>>;

/// Reader for PCAP and PCAPNG files, with optional gzip decompression.
pub struct PcapReader {
    inner: ReaderInner,
    state: ReadState,
}

enum ReaderInner {
    Legacy(LegacyPcapReader<Source>),
    Ng(PcapNGReader<Source>),
}

/// Bookkeeping shared by both formats.
struct ReadState {
    frame_number: u64,
    /// Link type per interface; legacy files have exactly one.
    link_types: Vec<u16>,
    /// Legacy nanosecond-resolution capture.
    nanosecond: bool,
}

impl ReadState {
    fn link_type(&self, interface: u32) -> u16 {
        self.link_types
            .get(interface as usize)
            .copied()
            .unwrap_or(LINKTYPE_ETHERNET)
    }
}

impl PcapReader {
    /// Open a PCAP file for reading.
    ///
    /// Automatically detects and decompresses gzipped files.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let is_gzipped = is_gzip_file(path)?;

        let file = File::open(path).map_err(|_| {
            Error::Pcap(OurPcapError::FileNotFound {
                path: path.display().to_string(),
            })
        })?;
        let reader: Box<dyn Read + Send> = if is_gzipped {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let mut source = BufReader::with_capacity(BUFFER_SIZE, reader);

        // Peek at the magic number without consuming it
        let head = source.fill_buf()?;
        if head.len() < 4 {
            return Err(Error::Pcap(OurPcapError::InvalidFormat {
                reason: "File too short to read magic number".to_string(),
            }));
        }
        let magic = [head[0], head[1], head[2], head[3]];

        match magic {
            [0xd4, 0xc3, 0xb2, 0xa1] | [0xa1, 0xb2, 0xc3, 0xd4] => Self::open_legacy(source, false),
            [0x4d, 0x3c, 0xb2, 0xa1] | [0xa1, 0xb2, 0x3c, 0x4d] => Self::open_legacy(source, true),
            [0x0a, 0x0d, 0x0d, 0x0a] => Self::open_ng(source),
            _ => Err(Error::Pcap(OurPcapError::InvalidFormat {
                reason: format!("Unknown magic number: {magic:02x?}"),
            })),
        }
    }

    fn open_legacy(source: Source, nanosecond: bool) -> Result<Self, Error> {
        let reader = LegacyPcapReader::new(BUFFER_SIZE, source).map_err(|e| {
            Error::Pcap(OurPcapError::InvalidFormat {
                reason: format!("Failed to parse PCAP header: {e}"),
            })
        })?;

        Ok(Self {
            inner: ReaderInner::Legacy(reader),
            state: ReadState {
                frame_number: 0,
                link_types: Vec::new(),
                nanosecond,
            },
        })
    }

    fn open_ng(source: Source) -> Result<Self, Error> {
        let reader = PcapNGReader::new(BUFFER_SIZE, source).map_err(|e| {
            Error::Pcap(OurPcapError::InvalidFormat {
                reason: format!("Failed to parse PCAPNG header: {e}"),
            })
        })?;

        Ok(Self {
            inner: ReaderInner::Ng(reader),
            state: ReadState {
                frame_number: 0,
                link_types: Vec::new(),
                nanosecond: false,
            },
        })
    }

    /// Link type of the first interface.
    pub fn link_type(&self) -> u16 {
        self.state.link_type(0)
    }

    /// Get the current frame count.
    pub fn frame_count(&self) -> u64 {
        self.state.frame_number
    }

    /// Read the next packet.
    pub fn next_packet(&mut self) -> Result<Option<RawPacket>, Error> {
        match &mut self.inner {
            ReaderInner::Legacy(reader) => read_next(reader, &mut self.state),
            ReaderInner::Ng(reader) => read_next(reader, &mut self.state),
        }
    }
}

fn read_next<R: PcapReaderIterator>(
    reader: &mut R,
    state: &mut ReadState,
) -> Result<Option<RawPacket>, Error> {
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                let packet = match block {
                    PcapBlockOwned::LegacyHeader(header) => {
                        state.link_types = vec![header.network.0 as u16];
                        None
                    }
                    PcapBlockOwned::Legacy(packet) => {
                        state.frame_number += 1;
                        let fraction = if state.nanosecond {
                            packet.ts_usec as i64 / 1_000
                        } else {
                            packet.ts_usec as i64
                        };
                        Some(RawPacket::new(
                            state.frame_number,
                            (packet.ts_sec as i64) * 1_000_000 + fraction,
                            packet.caplen,
                            packet.origlen,
                            state.link_type(0),
                            packet.data.to_vec(),
                        ))
                    }
                    PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                        // Interface ids restart in every section
                        state.link_types.clear();
                        None
                    }
                    PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                        state.link_types.push(idb.linktype.0 as u16);
                        None
                    }
                    PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                        state.frame_number += 1;
                        // Interface time units: microseconds for the default if_tsresol
                        let timestamp_us = ((epb.ts_high as i64) << 32) | (epb.ts_low as i64);
                        Some(RawPacket::new(
                            state.frame_number,
                            timestamp_us,
                            epb.caplen,
                            epb.origlen,
                            state.link_type(epb.if_id),
                            epb.data.to_vec(),
                        ))
                    }
                    PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                        state.frame_number += 1;
                        Some(RawPacket::new(
                            state.frame_number,
                            0, // No timestamp in simple packets
                            spb.data.len() as u32,
                            spb.origlen,
                            state.link_type(0),
                            spb.data.to_vec(),
                        ))
                    }
                    _ => None,
                };
                reader.consume(offset);
                if packet.is_some() {
                    return Ok(packet);
                }
            }
            Err(PcapError::Eof) => return Ok(None),
            Err(PcapError::Incomplete(_)) => {
                reader.refill().map_err(|e| {
                    Error::Pcap(OurPcapError::InvalidFormat {
                        reason: format!("Refill error: {e}"),
                    })
                })?;
            }
            Err(e) => {
                return Err(Error::Pcap(OurPcapError::InvalidFormat {
                    reason: format!("Parse error: {e}"),
                }))
            }
        }
    }
}

/// Check if a file is gzipped by extension or magic bytes.
fn is_gzip_file<P: AsRef<Path>>(path: P) -> Result<bool, Error> {
    let path = path.as_ref();

    if is_gzip_extension(path) {
        return Ok(true);
    }

    let mut file = File::open(path).map_err(|_| {
        Error::Pcap(OurPcapError::FileNotFound {
            path: path.display().to_string(),
        })
    })?;

    let mut magic = [0u8; 2];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == GZIP_MAGIC),
        Err(_) => Ok(false), // File too short to be gzipped
    }
}

/// Check if a path appears to be a gzip file by extension only.
pub fn is_gzip_extension<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .file_name()
        .and_then(|f| f.to_str())
        .map(|name| name.to_lowercase().ends_with(".gz"))
        .unwrap_or(false)
}

/// Iterator adapter for PcapReader.
impl Iterator for PcapReader {
    type Item = Result<RawPacket, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_packet().transpose()
    }
}
