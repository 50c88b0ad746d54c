//! Relay Client: subscribes to a quote relay and prints every received event.
//!
//! It takes symbols from `--symbols` or a text file, sends them to the relay as a
//! single request line and then logs each quote, feed status change and error the
//! relay streams back.
//!
//! Usage example (CLI):
//! ```bash
//! relay_client --server 127.0.0.1:8080 --symbols ES.FUT,NQ.FUT
//! relay_client --server 127.0.0.1:8080 --path ./symbols.txt
//! ```
#![warn(missing_docs)]
mod args;
mod subscriber;

use crate::args::Args;
use crate::subscriber::Subscriber;
use clap::Parser;
use log::info;
use relay_common::RelayError;
use relay_common::Result;
use relay_common::symbols::{SymbolParser, parse_symbol_list};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

/// Read timeout so the receive loop can notice Ctrl+C.
const READ_POLL: Duration = Duration::from_millis(500);

fn main() -> Result<(), RelayError> {
    init_logger();
    let args = Args::parse();
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("Ctrl+C received. Shutting down client...");
            shutdown.store(true, Ordering::SeqCst);
        })
        .map_err(|e| RelayError::Format(format!("failed to install Ctrl+C handler: {}", e)))?;
    }

    let symbols = load_symbols(&args)?;
    info!("Symbols: {:?}", symbols);

    info!("Connecting to relay at {}", args.server);
    let mut stream = TcpStream::connect(args.server.trim())
        .map_err(|e| RelayError::Format(format!("Failed to connect to relay: {}", e)))?;
    stream.set_read_timeout(Some(READ_POLL))?;

    Subscriber::send_request(&mut stream, &symbols)?;
    info!("Client is running. Press Ctrl+C to exit.");
    let quotes = Subscriber::read_events(stream, shutdown)?;
    info!("Received {} quotes", quotes);
    Ok(())
}

fn load_symbols(args: &Args) -> Result<BTreeSet<String>> {
    if let Some(list) = &args.symbols {
        return parse_symbol_list(list);
    }
    let Some(raw_path) = &args.path else {
        return Err(RelayError::Format(
            "pass either --symbols or --path".to_string(),
        ));
    };
    let file_path = symbol_file(raw_path)?;
    let file = File::open(file_path)?;
    BTreeSet::<String>::parse_from_reader(BufReader::new(file))
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

/// Resolves `--path`, accepting a value wrapped in single or double quotes.
fn symbol_file(raw: &str) -> Result<PathBuf> {
    let raw = raw.trim();
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|q| raw.strip_prefix(*q).and_then(|s| s.strip_suffix(*q)))
        .unwrap_or(raw);
    let path = PathBuf::from(unquoted);
    if path.is_file() {
        Ok(path)
    } else {
        Err(RelayError::Format(format!(
            "symbol file not found: {}",
            path.display()
        )))
    }
}
