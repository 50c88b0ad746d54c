//! Command-line arguments for the relay client.
//!
//! This module defines the CLI interface using `clap`. See `main` for end-to-end usage.
use clap::Parser;
use relay_common::net::{RELAY_PORT, addr};

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Relay address as `host:port`.
    #[clap(long, default_value_t = addr("127.0.0.1", RELAY_PORT))]
    pub server: String,

    /// Symbols to subscribe to, separated by commas or spaces (e.g. `ES.FUT,NQ.FUT`).
    #[clap(long, conflicts_with = "path")]
    pub symbols: Option<String>,

    /// Path to a text file with symbols to subscribe to.
    /// Symbols may be separated by commas, spaces, or new lines.
    #[clap(long)]
    pub path: Option<String>,
}
