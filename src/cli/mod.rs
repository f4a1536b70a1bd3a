//! Command-line interface module.
//!
//! This module handles:
//! - Argument parsing via clap
//! - Output formatting (table, CSV, JSON)
//! - Writing reassembled payloads to files

mod args;
mod export;
mod output;

pub use args::{Args, Backpressure, Overlap};
pub use export::StreamExporter;
pub use output::{OutputFormat, OutputFormatter, StreamSummary};
