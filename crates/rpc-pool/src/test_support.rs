//! Shared fakes for unit tests.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::connection::Connection;
use crate::error::{PoolError, PoolResult, TransportError};
use crate::factory::ConnectionFactory;
use crate::host::HostAddr;
use crate::transport::Transport;

/// Client handle whose liveness a test can flip.
pub(crate) type Liveness = Arc<AtomicBool>;

#[derive(Default)]
pub(crate) struct MockTransport {
    pub(crate) pings: AtomicUsize,
    pub(crate) closes: AtomicUsize,
}

impl Transport for MockTransport {
    type Client = Liveness;

    fn open(&self, _host: &HostAddr) -> Result<Liveness, TransportError> {
        Ok(Arc::new(AtomicBool::new(true)))
    }

    fn ping(&self, client: &mut Liveness) -> bool {
        self.pings.fetch_add(1, Ordering::Relaxed);
        client.load(Ordering::Relaxed)
    }

    fn close(&self, _client: Liveness) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Factory counting creates and destroys, with switchable failure and delay.
pub(crate) struct MockFactory {
    pub(crate) transport: Arc<MockTransport>,
    create_count: AtomicUsize,
    destroy_count: AtomicUsize,
    /// Connections created and not yet destroyed through the factory.
    open: AtomicUsize,
    peak_open: AtomicUsize,
    pub(crate) should_fail: AtomicBool,
    create_delay_ms: AtomicU64,
    clients: Mutex<Vec<Liveness>>,
}

impl MockFactory {
    pub(crate) fn new() -> Self {
        Self {
            transport: Arc::new(MockTransport::default()),
            create_count: AtomicUsize::new(0),
            destroy_count: AtomicUsize::new(0),
            open: AtomicUsize::new(0),
            peak_open: AtomicUsize::new(0),
            should_fail: AtomicBool::new(false),
            create_delay_ms: AtomicU64::new(0),
            clients: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn creates(&self) -> usize {
        self.create_count.load(Ordering::SeqCst)
    }

    pub(crate) fn destroys(&self) -> usize {
        self.destroy_count.load(Ordering::SeqCst)
    }

    pub(crate) fn peak_open(&self) -> usize {
        self.peak_open.load(Ordering::SeqCst)
    }

    pub(crate) fn pings(&self) -> usize {
        self.transport.pings.load(Ordering::SeqCst)
    }

    pub(crate) fn set_create_delay(&self, delay: Duration) {
        self.create_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    /// Make the `index`-th created connection fail its next ping.
    pub(crate) fn kill(&self, index: usize) {
        self.clients.lock()[index].store(false, Ordering::Relaxed);
    }
}

impl ConnectionFactory for MockFactory {
    type Client = Liveness;

    fn create(&self) -> PoolResult<Connection<Liveness>> {
        let host = HostAddr::new("rpc.test", 9090);
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(PoolError::ConnectionCreate {
                host,
                cause: TransportError::Io(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )),
            });
        }
        let delay = self.create_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        let client = self.transport.open(&host).map_err(|cause| PoolError::ConnectionCreate {
            host: host.clone(),
            cause,
        })?;
        self.clients.lock().push(client.clone());
        self.create_count.fetch_add(1, Ordering::SeqCst);
        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_open.fetch_max(open, Ordering::SeqCst);
        let transport: Arc<dyn Transport<Client = Liveness>> = self.transport.clone();
        Ok(Connection::new(host, client, transport))
    }

    fn destroy(&self, conn: &mut Connection<Liveness>) {
        self.destroy_count.fetch_add(1, Ordering::SeqCst);
        self.open.fetch_sub(1, Ordering::SeqCst);
        conn.destroy();
    }
}

pub(crate) fn make_pool(config: crate::config::PoolConfig) -> (crate::ConnectionPool<Liveness>, Arc<MockFactory>) {
    let factory = Arc::new(MockFactory::new());
    let pool = crate::ConnectionPool::new(config, factory.clone());
    (pool, factory)
}
