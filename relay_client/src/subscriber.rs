//! Talking to the relay over TCP.
//!
//! The client writes its symbol list as one line, then reads newline-delimited
//! JSON events until the server closes the connection, the server reports an
//! error, or shutdown is requested.
use std::collections::BTreeSet;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::TcpStream;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use log::{debug, error, info, warn};
use relay_common::{RelayError, StreamEvent};

/// Helper type for the subscription handshake and the event loop.
pub struct Subscriber;

impl Subscriber {
    /// Sends the subscription request line.
    pub fn send_request(stream: &mut TcpStream, symbols: &BTreeSet<String>) -> Result<(), RelayError> {
        let request: Vec<&str> = symbols.iter().map(String::as_str).collect();
        let line = format!("{}\n", request.join(","));
        info!("Sending subscription: {}", line.trim());
        stream.write_all(line.as_bytes())?;
        stream.flush()?;
        Ok(())
    }

    /// Reads events and logs them until the stream ends. Returns the number of quotes seen.
    pub fn read_events(stream: TcpStream, shutdown: Arc<AtomicBool>) -> Result<u64, RelayError> {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        let mut quotes = 0;

        while !shutdown.load(Ordering::Relaxed) {
            match reader.read_line(&mut line) {
                Ok(0) => {
                    info!("Relay closed the connection");
                    break;
                }
                Ok(_) => {
                    match StreamEvent::from_json_line(&line) {
                        Ok(StreamEvent::Quote(quote)) => {
                            quotes += 1;
                            info!(
                                "QUOTE: {} Bid={} x {} Ask={} x {} Time={}",
                                quote.symbol,
                                fmt_price(quote.bid_price),
                                fmt_size(quote.bid_size),
                                fmt_price(quote.ask_price),
                                fmt_size(quote.ask_size),
                                quote.ts_event
                            );
                        }
                        Ok(StreamEvent::Status { status, timestamp }) => {
                            warn!("Feed status: {} at {}", status, timestamp);
                        }
                        Ok(StreamEvent::Error { error }) => {
                            error!("Relay error: {}", error);
                            return Err(RelayError::Format(error));
                        }
                        Err(_) => debug!("Received non-JSON message: {}", line.trim_end()),
                    }
                    line.clear();
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    continue;
                }
                Err(e) => {
                    error!("Receive data error: {}", e);
                    return Err(RelayError::Io(e));
                }
            }
        }
        info!("Receiver loop stopping...");
        Ok(quotes)
    }
}

fn fmt_price(price: Option<f64>) -> String {
    price.map_or_else(|| "-".to_string(), |p| format!("{:.2}", p))
}

fn fmt_size(size: Option<u32>) -> String {
    size.map_or_else(|| "-".to_string(), |s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_missing_sides_as_dash() {
        assert_eq!(fmt_price(Some(4500.25)), "4500.25");
        assert_eq!(fmt_price(None), "-");
        assert_eq!(fmt_size(Some(7)), "7");
        assert_eq!(fmt_size(None), "-");
    }
}
