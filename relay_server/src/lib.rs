//! Quote relay core.
//!
//! One upstream live-feed connection is fanned out to any number of subscriber
//! sessions, each interested in its own symbols:
//!
//! - `feed`: upstream boundary traits, the connection-owning `FeedManager`,
//!   reconnect backoff and a simulated vendor.
//! - `normalizer`: raw vendor record -> `QuoteUpdate`.
//! - `state_table`: last-known quote per symbol.
//! - `registry`: live subscriptions and the desired symbol union.
//! - `router`: per-update delivery to session queues.
//! - `queue`: bounded drop-oldest queue per session.
//! - `session`: subscriber event stream and its write loop.
//! - `listener`: TCP line-protocol transport.
//! - `config`: CLI arguments and runtime configuration.
//! - `relay`: wiring of all of the above.
#![warn(missing_docs)]
pub mod config;
pub mod feed;
pub mod listener;
pub mod normalizer;
pub mod queue;
pub mod registry;
pub mod relay;
pub mod router;
pub mod session;
pub mod state_table;

pub use relay::Relay;
