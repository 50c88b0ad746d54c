//! Command-line arguments and the runtime configuration derived from them.
use std::time::Duration;

use clap::Parser;
use relay_common::net::{RELAY_PORT, addr};

use crate::feed::manager::{DEFAULT_DATASET, DEFAULT_SCHEMA, FeedSettings};
use crate::listener::SessionOptions;

/// Default listen address: every interface on [`RELAY_PORT`].
pub fn default_bind() -> String {
    addr("0.0.0.0", RELAY_PORT)
}

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about = "Relays live top-of-book quotes to many subscribers", long_about = None)]
pub struct Args {
    /// Address subscribers connect to.
    #[arg(long, default_value_t = default_bind())]
    pub bind: String,

    /// Vendor dataset to stream.
    #[arg(long, default_value = DEFAULT_DATASET)]
    pub dataset: String,

    /// Vendor schema to stream.
    #[arg(long, default_value = DEFAULT_SCHEMA)]
    pub schema: String,

    /// Vendor API key.
    #[arg(long, env = "DATABENTO_API_KEY", default_value = "", hide_env_values = true)]
    pub api_key: String,

    /// Events buffered per subscriber before the oldest are dropped.
    #[arg(long, default_value_t = 256)]
    pub queue_capacity: usize,

    /// First reconnect delay ceiling, in milliseconds.
    #[arg(long, default_value_t = 1_000)]
    pub backoff_base_ms: u64,

    /// Largest reconnect delay ceiling, in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    pub backoff_cap_ms: u64,

    /// A subscriber that cannot take a write for this long is disconnected.
    #[arg(long, default_value_t = 5_000)]
    pub write_timeout_ms: u64,

    /// Seconds a symbol nobody subscribes to keeps its last quote. 0 keeps it forever.
    #[arg(long, default_value_t = 600)]
    pub retention_secs: u64,

    /// Seconds between state table eviction sweeps.
    #[arg(long, default_value_t = 30)]
    pub eviction_interval_secs: u64,

    /// Simulated feed tick period, in milliseconds.
    #[arg(long, default_value_t = 250)]
    pub tick_interval_ms: u64,

    /// Only accept symbols from the built-in futures catalog.
    #[arg(long)]
    pub catalog_only: bool,
}

/// Everything the relay needs at runtime.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address.
    pub bind: String,
    /// Feed worker tunables.
    pub feed: FeedSettings,
    /// Per-connection behaviour.
    pub session: SessionOptions,
    /// Per-session queue capacity.
    pub queue_capacity: usize,
    /// Simulated feed tick period.
    pub tick_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            feed: FeedSettings::default(),
            session: SessionOptions::default(),
            queue_capacity: 256,
            tick_interval: Duration::from_millis(250),
        }
    }
}

impl From<&Args> for RelayConfig {
    fn from(args: &Args) -> Self {
        let retention = match args.retention_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self {
            bind: args.bind.clone(),
            feed: FeedSettings {
                dataset: args.dataset.clone(),
                schema: args.schema.clone(),
                backoff_base: Duration::from_millis(args.backoff_base_ms),
                backoff_cap: Duration::from_millis(args.backoff_cap_ms),
                retention,
                eviction_interval: Duration::from_secs(args.eviction_interval_secs.max(1)),
            },
            session: SessionOptions {
                catalog_only: args.catalog_only,
                write_timeout: Duration::from_millis(args.write_timeout_ms.max(1)),
                ..SessionOptions::default()
            },
            queue_capacity: args.queue_capacity.max(1),
            tick_interval: Duration::from_millis(args.tick_interval_ms.max(1)),
        }
    }
}
