//!
//! Common types and utilities shared by the quote relay server and client.
//!
//! This crate aggregates:
//! - `error`: unified error type `RelayError` used across the workspace.
//! - `result`: handy `Result<T, RelayError>` alias.
//! - `quote`: the canonical `QuoteUpdate` and the newline-delimited JSON events
//!   written to subscribers.
//! - `symbols`: symbol-list parsing, validation and the reference catalog.
//! - `net`: networking constants and small helpers.
#![warn(missing_docs)]
pub mod error;
pub mod net;
pub mod quote;
pub mod result;
pub mod symbols;

pub use error::RelayError;
pub use quote::{FeedStatus, QuoteUpdate, StreamEvent};
pub use result::Result;
