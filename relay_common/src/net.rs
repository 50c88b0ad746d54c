//! Shared networking constants and helpers used by client and server.

/// TCP port subscribers connect to.
pub const RELAY_PORT: u16 = 8080;

/// Longest subscription request line the server will read, in bytes.
pub const MAX_REQUEST_LINE: usize = 4096;

/// Helper to format an address with a port like "ip:port".
pub fn addr(ip: &str, port: u16) -> String {
    format!("{}:{}", ip, port)
}
