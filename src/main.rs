//! tcpweave CLI entry point.

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tcpweave::cli::{Args, OutputFormatter, StreamExporter, StreamSummary};
use tcpweave::replay::replay;
use tcpweave_core::stream::{Assembler, IdleReaper, PortTable, StreamReceiver};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Set up logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();

    let exporter = args
        .output_dir
        .as_ref()
        .map(|dir| {
            StreamExporter::new(dir)
                .with_context(|| format!("Failed to create output directory: {}", dir.display()))
        })
        .transpose()?;

    let (assembler, streams) = Assembler::new(args.to_config(), PortTable::default())
        .context("Invalid assembler configuration")?;
    let assembler = Arc::new(assembler);

    let consumer = tokio::spawn(consume(streams, exporter));

    // Measures idleness against the newest capture timestamp seen.
    let reaper = IdleReaper::spawn(Arc::clone(&assembler));

    let replayed = replay(args.file.clone(), Arc::clone(&assembler)).await;

    // Connections read before a failure are still flushed and reported.
    reaper.shutdown().await;
    let stats = assembler.stats();
    // Dropping the last assembler handle closes the channel once queued
    // completions are delivered.
    drop(assembler);

    let rows = consumer.await.context("Stream consumer panicked")?;

    let formatter = OutputFormatter::new(args.format);
    formatter.write(&rows, &mut io::stdout().lock())?;

    let summary =
        replayed.with_context(|| format!("Failed to replay capture: {}", args.file.display()))?;

    info!(
        frames = summary.frames,
        segments = summary.tcp_segments,
        decode_errors = summary.decode_errors,
        truncated = summary.truncated,
        malformed = stats.malformed,
        connections = stats.connections_created,
        peak = stats.peak_connections,
        completed = stats.completed(),
        published = rows.len(),
        "Done"
    );
    Ok(())
}

/// Drain the delivery channel, exporting payloads as they arrive.
async fn consume(
    mut streams: StreamReceiver,
    exporter: Option<StreamExporter>,
) -> Vec<StreamSummary> {
    let mut rows = Vec::new();

    while let Some(stream) = streams.recv().await {
        if let Some(exporter) = &exporter {
            if let Err(e) = exporter.export(&stream) {
                warn!(error = %e, "Failed to write stream payload");
            }
        }
        rows.push(StreamSummary::from(&stream));
    }

    let dropped = streams.dropped();
    if dropped > 0 {
        warn!(dropped, "Streams were dropped because output fell behind");
    }
    rows
}
