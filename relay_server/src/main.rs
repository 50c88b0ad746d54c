//! Quote relay server.
//!
//! Owns one upstream live-feed connection and streams newline-delimited JSON
//! quotes to every TCP subscriber for the symbols it asked for. The upstream
//! here is the simulated feed; point `DATABENTO_API_KEY` (or `--api-key`) at a
//! non-empty value or it will refuse to connect, like the real vendor would.
//!
//! Usage example (CLI):
//! ```bash
//! DATABENTO_API_KEY=demo relay_server --bind 0.0.0.0:8080 --queue-capacity 512
//! ```
#![warn(missing_docs)]
use clap::Parser;
use crossbeam_channel::bounded;
use log::{info, warn};
use relay_common::symbols::CatalogSymbol;
use relay_common::{RelayError, Result};
use relay_server::Relay;
use relay_server::config::{Args, RelayConfig};
use relay_server::feed::simulated::SimulatedFeed;
use relay_server::listener::RelayListener;
use strum::IntoEnumIterator;

fn main() -> Result<(), RelayError> {
    init_logger();
    let args = Args::parse();
    let config = RelayConfig::from(&args);

    if args.api_key.trim().is_empty() {
        warn!("DATABENTO_API_KEY is not set; the upstream feed will reject the session");
    } else {
        info!("API key loaded: {}", mask_key(&args.api_key));
    }
    info!("Dataset: {}, schema: {}", config.feed.dataset, config.feed.schema);
    if config.session.catalog_only {
        let catalog: Vec<String> = CatalogSymbol::iter()
            .map(|contract| format!("{} ({})", contract, contract.name()))
            .collect();
        info!("Serving catalog symbols only: {}", catalog.join(", "));
    }

    let feed = SimulatedFeed::new(&args.api_key, config.tick_interval);
    let relay = Relay::start(feed, &config)?;
    let listener = RelayListener::bind(&config.bind)?;

    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        info!("Ctrl+C received. Shutting down relay...");
        let _ = shutdown_tx.try_send(());
    })
    .map_err(|e| RelayError::Format(format!("failed to install Ctrl+C handler: {}", e)))?;

    listener.serve(relay.registry().clone(), config.session.clone(), shutdown_rx)?;
    relay.shutdown();
    Ok(())
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

/// Shows only the ends of a key, enough to tell keys apart in logs.
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 12 {
        let head: String = chars[..8].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        "***".to_string()
    }
}
