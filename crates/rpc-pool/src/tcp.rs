//! Plain TCP transport.
//!
//! Hands out connected [`TcpStream`]s. The RPC layer on top owns framing;
//! this module only opens, probes, and shuts sockets down.
//!
//! Liveness is checked with a non-consuming `peek` under a short read
//! timeout: EOF means the peer hung up, a timeout means the socket is quiet
//! but open.

use std::io::ErrorKind;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::error::TransportError;
use crate::host::HostAddr;
use crate::transport::Transport;

/// Read timeout applied while peeking during [`Transport::ping`].
const PING_TIMEOUT: Duration = Duration::from_millis(100);

/// A [`Transport`] producing raw TCP streams.
#[derive(Clone, Debug)]
pub struct TcpTransport {
    connect_timeout: Duration,
    nodelay: bool,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            nodelay: true,
        }
    }
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            ..Self::default()
        }
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Transport for TcpTransport {
    type Client = TcpStream;

    fn open(&self, host: &HostAddr) -> Result<TcpStream, TransportError> {
        let target = host.to_string();
        let addrs: Vec<_> = target
            .to_socket_addrs()
            .map_err(|e| TransportError::Resolve(format!("{target}: {e}")))?
            .collect();
        if addrs.is_empty() {
            return Err(TransportError::Resolve(target));
        }

        // Try each resolved address; report the last failure.
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(self.nodelay)?;
                    debug!(host = %host, %addr, "tcp connection established");
                    return Ok(stream);
                }
                Err(e) => {
                    debug!(host = %host, %addr, error = %e, "tcp connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.map_or_else(|| TransportError::Resolve(target), TransportError::Io))
    }

    fn ping(&self, stream: &mut TcpStream) -> bool {
        let original_timeout = stream.read_timeout().ok().flatten();
        if stream.set_read_timeout(Some(PING_TIMEOUT)).is_err() {
            return false;
        }

        let mut peek_buf = [0u8; 1];
        let alive = match stream.peek(&mut peek_buf) {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) => matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
        };

        if let Err(e) = stream.set_read_timeout(original_timeout) {
            debug!(error = %e, "failed to restore read timeout after ping");
        }
        alive
    }

    fn close(&self, stream: TcpStream) -> Result<(), TransportError> {
        match stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Peer already gone; nothing left to shut down.
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}
