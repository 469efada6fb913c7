//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rpc_pool::{HostAddr, Transport, TransportError};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rpc_pool=debug")),
        )
        .with_test_writer()
        .try_init();
}

// ── In-memory transport ─────────────────────────────────────────────

/// Transport whose hosts can be taken up and down; clients are the host
/// they were opened to.
#[derive(Default)]
pub struct FakeTransport {
    down: Mutex<HashSet<HostAddr>>,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
}

impl FakeTransport {
    pub fn with_down(hosts: &[&str]) -> Self {
        let transport = Self::default();
        for host in hosts {
            transport.set_down(host, true);
        }
        transport
    }

    pub fn set_down(&self, host: &str, down: bool) {
        let addr: HostAddr = host.parse().expect("valid host:port");
        let mut set = self.down.lock().unwrap();
        if down {
            set.insert(addr);
        } else {
            set.remove(&addr);
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn is_down(&self, host: &HostAddr) -> bool {
        self.down.lock().unwrap().contains(host)
    }
}

impl Transport for FakeTransport {
    type Client = HostAddr;

    fn open(&self, host: &HostAddr) -> Result<HostAddr, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.is_down(host) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        Ok(host.clone())
    }

    fn ping(&self, client: &mut HostAddr) -> bool {
        !self.is_down(client)
    }

    fn close(&self, _client: HostAddr) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── MockRpcServer ───────────────────────────────────────────────────

/// A TCP server that echoes every byte it receives.
pub struct MockRpcServer {
    pub addr: SocketAddr,
}

impl MockRpcServer {
    pub fn start() -> Self {
        Self::spawn(|mut stream| {
            let mut buf = [0u8; 1024];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if stream.write_all(&buf[..n]).is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Start a server that hangs up on every connection right after accept.
    pub fn start_hangup() -> Self {
        Self::spawn(drop)
    }

    fn spawn(handler: fn(TcpStream)) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind to random port");
        let addr = listener.local_addr().expect("local addr");

        std::thread::spawn(move || {
            while let Ok((stream, _)) = listener.accept() {
                std::thread::spawn(move || handler(stream));
            }
        });

        std::thread::sleep(Duration::from_millis(10));
        Self { addr }
    }

    pub fn host(&self) -> HostAddr {
        HostAddr::new(self.addr.ip().to_string(), self.addr.port())
    }
}

/// A `host:port` on which nothing is listening.
pub fn dead_host() -> HostAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind to random port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    HostAddr::new("127.0.0.1", port)
}
