//! Writes reassembled payloads to files.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use tcpweave_core::stream::{Direction, FinishedStream};

/// Exports each finished stream as one file per non-empty direction.
///
/// Files are named `<client>-<server>.c2s.bin` and `<client>-<server>.s2c.bin`.
/// A connection that reuses an earlier four-tuple gets a numeric suffix
/// instead of overwriting the earlier files.
pub struct StreamExporter {
    dir: PathBuf,
}

impl StreamExporter {
    /// Create the output directory if needed.
    pub fn new<P: AsRef<Path>>(dir: P) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Write a stream's payloads and return the paths written.
    pub fn export(&self, stream: &FinishedStream) -> std::io::Result<Vec<PathBuf>> {
        let stem = self.unused_stem(&file_stem(stream));
        let mut written = Vec::with_capacity(2);

        for direction in [Direction::ToServer, Direction::ToClient] {
            let payload = stream.payload(direction);
            if payload.is_empty() {
                continue;
            }

            let path = self.dir.join(format!("{stem}.{}.bin", suffix(direction)));
            let mut writer = BufWriter::new(File::create(&path)?);
            writer.write_all(payload)?;
            writer.flush()?;
            written.push(path);
        }

        Ok(written)
    }

    fn unused_stem(&self, stem: &str) -> String {
        let taken = |candidate: &str| {
            [Direction::ToServer, Direction::ToClient].iter().any(|d| {
                self.dir
                    .join(format!("{candidate}.{}.bin", suffix(*d)))
                    .exists()
            })
        };

        if !taken(stem) {
            return stem.to_string();
        }
        (1u32..)
            .map(|n| format!("{stem}-{n}"))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| stem.to_string())
    }
}

fn suffix(direction: Direction) -> &'static str {
    match direction {
        Direction::ToServer => "c2s",
        Direction::ToClient => "s2c",
    }
}

fn file_stem(stream: &FinishedStream) -> String {
    format!(
        "{}-{}",
        endpoint_name(stream.network.src, stream.transport.src),
        endpoint_name(stream.network.dst, stream.transport.dst)
    )
}

/// Filesystem-safe `ip_port`.
fn endpoint_name(ip: IpAddr, port: u16) -> String {
    format!("{}_{port}", ip.to_string().replace(':', "."))
}
