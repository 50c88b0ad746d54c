//! TCP transport for subscribers.
//!
//! A subscriber connects, sends one line with its symbols (comma or space
//! separated) and then receives newline-delimited JSON events until the session
//! ends. A bad request gets a single `{"error": ...}` line and the connection is
//! closed. Each connection is served by its own thread; a reset connection is
//! noticed by a watcher thread blocked on the read half, a silently vanished one
//! by the write timeout.

use std::io::{self, BufRead, BufReader, BufWriter, ErrorKind, Read};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, select};
use log::{debug, error, info, warn};
use relay_common::{RelayError, Result};
use relay_common::net::MAX_REQUEST_LINE;

use crate::registry::SubscriptionRegistry;
use crate::session::{SessionCloser, deliver, open_request, reject};

/// How often the accept loop checks for shutdown when no client is connecting.
const ACCEPT_POLL: Duration = Duration::from_millis(100);
/// How long a rejected client may keep sending before the connection is dropped.
const REJECT_DRAIN: Duration = Duration::from_millis(500);
/// Most unread bytes discarded from a rejected client.
const MAX_REJECT_DRAIN: u64 = 64 * 1024;

/// Per-connection behaviour.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Reject symbols outside the built-in catalog.
    pub catalog_only: bool,
    /// A write blocked for longer than this kills the session.
    pub write_timeout: Duration,
    /// How long a new connection may take to send its request line.
    pub request_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            catalog_only: false,
            write_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Accepts subscriber connections.
pub struct RelayListener {
    socket: TcpListener,
}

impl RelayListener {
    /// Bind to `bind_addr` (e.g., `0.0.0.0:8080`).
    pub fn bind(bind_addr: &str) -> Result<Self> {
        let socket = TcpListener::bind(bind_addr)?;
        Ok(Self { socket })
    }

    /// Bound address; useful when binding to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Accept connections until `shutdown` fires or its sender is dropped.
    pub fn serve(
        self,
        registry: Arc<SubscriptionRegistry>,
        options: SessionOptions,
        shutdown: Receiver<()>,
    ) -> Result<()> {
        self.socket.set_nonblocking(true)?;
        info!("Relay listening on {}", self.socket.local_addr()?);

        loop {
            match self.socket.accept() {
                Ok((stream, peer)) => {
                    debug!("Subscriber connected from {}", peer);
                    let registry = Arc::clone(&registry);
                    let options = options.clone();
                    let spawned = thread::Builder::new()
                        .name(format!("session-{}", peer))
                        .spawn(move || {
                            if let Err(e) = handle_connection(stream, peer, registry, options) {
                                warn!("Connection {} ended with error: {}", peer, e);
                            }
                        });
                    if let Err(e) = spawned {
                        error!("Failed to spawn session thread for {}: {}", peer, e);
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    select! {
                        recv(shutdown) -> _ => break,
                        default(ACCEPT_POLL) => {}
                    }
                }
                Err(e) => error!("Accept error: {}", e),
            }
        }
        info!("Relay listener stopped");
        Ok(())
    }
}

fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<SubscriptionRegistry>,
    options: SessionOptions,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(options.request_timeout))?;
    stream.set_write_timeout(Some(options.write_timeout))?;

    let mut writer = BufWriter::new(stream.try_clone()?);
    let opened = read_request(&stream)
        .and_then(|request| open_request(&registry, &request, options.catalog_only));
    let session = match opened {
        Ok(session) => session,
        Err(e) => {
            warn!("Rejected subscription from {}: {}", peer, e);
            reject(&mut writer, &e)?;
            drain_and_close(&stream);
            return Ok(());
        }
    };
    info!(
        "Session {} streaming {:?} to {}",
        session.id(),
        session.symbols(),
        peer
    );

    let watcher = stream.try_clone()?;
    watcher.set_read_timeout(None)?;
    let closer = session.closer();
    thread::spawn(move || watch_hangup(watcher, closer));

    let outcome = deliver(session, &mut writer);
    let _ = stream.shutdown(Shutdown::Both);
    outcome.map(|_| ())
}

/// Reads the subscription line. A line longer than [`MAX_REQUEST_LINE`], one that
/// does not arrive within the read timeout, or one that is not UTF-8 is invalid.
fn read_request(stream: &TcpStream) -> Result<String> {
    let mut request = String::new();
    let limit = MAX_REQUEST_LINE as u64 + 1;
    match BufReader::new(stream.take(limit)).read_line(&mut request) {
        Ok(_) => {}
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
            return Err(RelayError::InvalidSubscription(
                "no subscription request received in time".to_string(),
            ));
        }
        Err(e) if e.kind() == ErrorKind::InvalidData => {
            return Err(RelayError::InvalidSubscription(
                "request line is not valid UTF-8".to_string(),
            ));
        }
        Err(e) => return Err(e.into()),
    }
    if !request.ends_with('\n') && request.len() > MAX_REQUEST_LINE {
        return Err(RelayError::InvalidSubscription(
            "request line too long".to_string(),
        ));
    }
    Ok(request)
}

/// Ends a rejected connection, discarding unread input first: closing a socket
/// with unread input resets it and the peer may lose the error line.
fn drain_and_close(stream: &TcpStream) {
    let _ = stream.shutdown(Shutdown::Write);
    let _ = stream.set_read_timeout(Some(REJECT_DRAIN));
    let mut sink = stream.take(MAX_REJECT_DRAIN);
    let _ = io::copy(&mut sink, &mut io::sink());
    let _ = stream.shutdown(Shutdown::Both);
}

/// Blocks on the read half and closes the session once the peer is gone.
///
/// End of input only means the subscriber has nothing more to send: a half-closed
/// client keeps receiving, and a vanished one is caught by the next failed write.
fn watch_hangup(mut stream: TcpStream, closer: SessionCloser) {
    let mut buf = [0u8; 256];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => {
                debug!("Subscriber closed its sending side");
                return;
            }
            Ok(_) => continue,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    closer.close();
}
