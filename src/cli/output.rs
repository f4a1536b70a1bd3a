//! Output formatting for reassembled streams.
//!
//! Each finished connection becomes one summary row, written as a table,
//! CSV, or JSON Lines.

use std::io::Write;

use clap::ValueEnum;
use serde_json::json;
use tcpweave_core::stream::FinishedStream;

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed table (default)
    Table,
    /// Comma-separated values
    Csv,
    /// JSON Lines (one JSON object per stream)
    Json,
}

const COLUMNS: [&str; 11] = [
    "client",
    "server",
    "protocol",
    "reason",
    "state",
    "packets",
    "to_server_bytes",
    "to_client_bytes",
    "gaps",
    "first_seen_us",
    "last_seen_us",
];

/// One row of output, detached from the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub client: String,
    pub server: String,
    pub protocol: String,
    pub reason: &'static str,
    pub state: &'static str,
    pub packets: u64,
    pub to_server_bytes: usize,
    pub to_client_bytes: usize,
    pub gaps: u32,
    pub first_seen_us: i64,
    pub last_seen_us: i64,
}

impl From<&FinishedStream> for StreamSummary {
    fn from(stream: &FinishedStream) -> Self {
        Self {
            client: endpoint(stream.network.src, stream.transport.src),
            server: endpoint(stream.network.dst, stream.transport.dst),
            protocol: stream.protocol.to_string(),
            reason: stream.reason.as_str(),
            state: stream.final_state.as_str(),
            packets: stream.packets,
            to_server_bytes: stream.to_server.len(),
            to_client_bytes: stream.to_client.len(),
            gaps: stream.gap_count(),
            first_seen_us: stream.first_seen_us,
            last_seen_us: stream.last_seen_us,
        }
    }
}

impl StreamSummary {
    fn values(&self) -> [String; 11] {
        [
            self.client.clone(),
            self.server.clone(),
            self.protocol.clone(),
            self.reason.to_string(),
            self.state.to_string(),
            self.packets.to_string(),
            self.to_server_bytes.to_string(),
            self.to_client_bytes.to_string(),
            self.gaps.to_string(),
            self.first_seen_us.to_string(),
            self.last_seen_us.to_string(),
        ]
    }
}

/// `ip:port`, with IPv6 addresses bracketed.
fn endpoint(ip: std::net::IpAddr, port: u16) -> String {
    std::net::SocketAddr::new(ip, port).to_string()
}

/// Formats stream summaries for output.
pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    /// Create a new formatter with the specified format.
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Write all summaries to the given writer.
    pub fn write<W: Write>(&self, rows: &[StreamSummary], writer: &mut W) -> std::io::Result<()> {
        match self.format {
            OutputFormat::Table => self.write_table(rows, writer),
            OutputFormat::Csv => self.write_csv(rows, writer),
            OutputFormat::Json => self.write_json(rows, writer),
        }
    }

    fn write_table<W: Write>(&self, rows: &[StreamSummary], writer: &mut W) -> std::io::Result<()> {
        use comfy_table::{Cell, Table};

        let mut table = Table::new();
        table.set_header(COLUMNS.iter().map(|name| Cell::new(*name)));

        for row in rows {
            table.add_row(row.values().into_iter().map(Cell::new));
        }

        writeln!(writer, "{table}")
    }

    fn write_csv<W: Write>(&self, rows: &[StreamSummary], writer: &mut W) -> std::io::Result<()> {
        writeln!(writer, "{}", COLUMNS.join(","))?;

        for row in rows {
            let values: Vec<String> = row
                .values()
                .into_iter()
                .map(|value| {
                    // Escape commas and quotes
                    if value.contains(',') || value.contains('"') || value.contains('\n') {
                        format!("\"{}\"", value.replace('"', "\"\""))
                    } else {
                        value
                    }
                })
                .collect();
            writeln!(writer, "{}", values.join(","))?;
        }

        Ok(())
    }

    fn write_json<W: Write>(&self, rows: &[StreamSummary], writer: &mut W) -> std::io::Result<()> {
        for row in rows {
            let obj = json!({
                "client": row.client,
                "server": row.server,
                "protocol": row.protocol,
                "reason": row.reason,
                "state": row.state,
                "packets": row.packets,
                "to_server_bytes": row.to_server_bytes,
                "to_client_bytes": row.to_client_bytes,
                "gaps": row.gaps,
                "first_seen_us": row.first_seen_us,
                "last_seen_us": row.last_seen_us,
            });
            writeln!(writer, "{obj}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_rows() -> Vec<StreamSummary> {
        vec![
            StreamSummary {
                client: "10.0.0.1:51000".to_string(),
                server: "93.184.216.34:80".to_string(),
                protocol: "http".to_string(),
                reason: "closed",
                state: "closed",
                packets: 9,
                to_server_bytes: 78,
                to_client_bytes: 1256,
                gaps: 0,
                first_seen_us: 1_000_000,
                last_seen_us: 1_250_000,
            },
            StreamSummary {
                client: "[2001:db8::1]:40000".to_string(),
                server: "[2001:db8::2]:443".to_string(),
                protocol: "tls".to_string(),
                reason: "idle",
                state: "established",
                packets: 3,
                to_server_bytes: 517,
                to_client_bytes: 0,
                gaps: 1,
                first_seen_us: 2_000_000,
                last_seen_us: 2_000_100,
            },
        ]
    }

    #[test]
    fn test_table_output() {
        let formatter = OutputFormatter::new(OutputFormat::Table);
        let mut output = Vec::new();
        formatter.write(&create_rows(), &mut output).unwrap();

        let output_str = String::from_utf8(output).unwrap();
        assert!(output_str.contains("10.0.0.1:51000"));
        assert!(output_str.contains("[2001:db8::2]:443"));
        assert!(output_str.contains("1256"));
    }

    #[test]
    fn test_csv_output() {
        let formatter = OutputFormatter::new(OutputFormat::Csv);
        let mut output = Vec::new();
        formatter.write(&create_rows(), &mut output).unwrap();

        let output_str = String::from_utf8(output).unwrap();
        let mut lines = output_str.lines();
        assert_eq!(lines.next(), Some(COLUMNS.join(",").as_str()));
        assert!(output_str.contains("10.0.0.1:51000,93.184.216.34:80,http,closed,closed,9,78,1256,0"));
        assert_eq!(output_str.lines().count(), 3);
    }

    #[test]
    fn test_json_output() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let mut output = Vec::new();
        formatter.write(&create_rows(), &mut output).unwrap();

        let output_str = String::from_utf8(output).unwrap();
        let first: serde_json::Value =
            serde_json::from_str(output_str.lines().next().unwrap()).unwrap();
        assert_eq!(first["protocol"], "http");
        assert_eq!(first["to_client_bytes"], 1256);
        assert_eq!(first["reason"], "closed");
    }

    #[test]
    fn test_endpoint_brackets_ipv6() {
        let v6: std::net::IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(endpoint(v6, 443), "[2001:db8::1]:443");
    }
}
