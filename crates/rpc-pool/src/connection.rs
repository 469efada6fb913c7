//! A single pooled client handle bound to one host.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::host::HostAddr;
use crate::pool::Shared;
use crate::transport::Transport;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`Connection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle position of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Opened, not yet handed to a pool.
    Created,
    /// Resting in a pool's idle set.
    Idle,
    /// Checked out by a caller.
    Active,
    /// Handle closed. Terminal.
    Destroyed,
}

/// A live client handle to one host.
///
/// While checked out the caller owns it exclusively; hand it back with
/// [`ConnectionPool::release`](crate::ConnectionPool::release). Dropping a
/// checked-out connection instead returns it to its pool for destruction.
pub struct Connection<C: Send + 'static> {
    id: ConnectionId,
    host: HostAddr,
    client: Option<C>,
    transport: Arc<dyn Transport<Client = C>>,
    valid: bool,
    state: ConnectionState,
    created_at: Instant,
    last_used: Instant,
    pool: Weak<Shared<C>>,
}

impl<C: Send + 'static> Connection<C> {
    /// Wrap a freshly opened client. Used by connection factories.
    pub fn new(host: HostAddr, client: C, transport: Arc<dyn Transport<Client = C>>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::next(),
            host,
            client: Some(client),
            transport,
            valid: true,
            state: ConnectionState::Created,
            created_at: now,
            last_used: now,
            pool: Weak::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn host(&self) -> &HostAddr {
        &self.host
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Time spent since the connection was last handed out or returned.
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// The client handle, unless the connection has been destroyed.
    pub fn client(&self) -> Option<&C> {
        self.client.as_ref()
    }

    pub fn client_mut(&mut self) -> Option<&mut C> {
        self.client.as_mut()
    }

    pub fn is_valid(&self) -> bool {
        self.valid && self.client.is_some()
    }

    /// Flag the connection as broken so that release destroys it.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Probe the underlying handle. A failed probe invalidates the connection.
    pub fn validate(&mut self) -> bool {
        if !self.valid {
            return false;
        }
        let Some(client) = self.client.as_mut() else {
            return false;
        };
        let alive = self.transport.ping(client);
        if !alive {
            self.valid = false;
        }
        alive
    }

    /// Close the underlying handle. Safe to call more than once.
    pub fn destroy(&mut self) {
        self.valid = false;
        self.state = ConnectionState::Destroyed;
        if let Some(client) = self.client.take() {
            if let Err(e) = self.transport.close(client) {
                warn!(connection = %self.id, host = %self.host, error = %e, "failed to close connection");
            }
        }
    }

    // ── Pool bookkeeping ────────────────────────────────────────────

    pub(crate) fn attach(&mut self, pool: Weak<Shared<C>>) {
        self.pool = pool;
    }

    /// Forget the owning pool; a detached connection only closes itself on drop.
    pub(crate) fn detach(&mut self) {
        self.pool = Weak::new();
    }

    pub(crate) fn belongs_to(&self, pool: &Arc<Shared<C>>) -> bool {
        std::ptr::eq(self.pool.as_ptr(), Arc::as_ptr(pool))
    }

    pub(crate) fn mark_active(&mut self) {
        self.state = ConnectionState::Active;
        self.last_used = Instant::now();
    }

    pub(crate) fn mark_idle(&mut self) {
        self.state = ConnectionState::Idle;
        self.last_used = Instant::now();
    }
}

impl<C: Send + 'static> Drop for Connection<C> {
    fn drop(&mut self) {
        if self.state == ConnectionState::Active {
            if let Some(pool) = self.pool.upgrade() {
                pool.reclaim_dropped(self);
                return;
            }
        }
        self.destroy();
    }
}

impl<C: Send + 'static> fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("state", &self.state)
            .field("valid", &self.valid)
            .field("open", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[derive(Default)]
    struct MockTransport {
        alive: AtomicBool,
        pings: AtomicUsize,
        closes: AtomicUsize,
        fail_close: AtomicBool,
    }

    impl Transport for MockTransport {
        type Client = u32;

        fn open(&self, _host: &HostAddr) -> Result<u32, TransportError> {
            Ok(7)
        }

        fn ping(&self, _client: &mut u32) -> bool {
            self.pings.fetch_add(1, Ordering::Relaxed);
            self.alive.load(Ordering::Relaxed)
        }

        fn close(&self, _client: u32) -> Result<(), TransportError> {
            self.closes.fetch_add(1, Ordering::Relaxed);
            if self.fail_close.load(Ordering::Relaxed) {
                return Err(TransportError::Closed("reset by peer".to_string()));
            }
            Ok(())
        }
    }

    fn connection(transport: &Arc<MockTransport>) -> Connection<u32> {
        Connection::new(HostAddr::new("rpc.local", 9090), 7, transport.clone())
    }

    fn live_transport() -> Arc<MockTransport> {
        let t = MockTransport::default();
        t.alive.store(true, Ordering::Relaxed);
        Arc::new(t)
    }

    #[test]
    fn new_connection_is_created_and_valid() {
        let t = live_transport();
        let conn = connection(&t);
        assert_eq!(conn.state(), ConnectionState::Created);
        assert!(conn.is_valid());
        assert_eq!(conn.client(), Some(&7));
        assert_eq!(conn.host().to_string(), "rpc.local:9090");
    }

    #[test]
    fn ids_are_unique() {
        let t = live_transport();
        let a = connection(&t);
        let b = connection(&t);
        assert_ne!(a.id(), b.id());
        assert!(a.id() < b.id());
    }

    #[test]
    fn validate_pings_transport() {
        let t = live_transport();
        let mut conn = connection(&t);
        assert!(conn.validate());
        assert_eq!(t.pings.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn failed_ping_invalidates() {
        let t = Arc::new(MockTransport::default());
        let mut conn = connection(&t);
        assert!(!conn.validate());
        assert!(!conn.is_valid());
        // Stays invalid without probing again.
        assert!(!conn.validate());
        assert_eq!(t.pings.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn invalidate_skips_probe() {
        let t = live_transport();
        let mut conn = connection(&t);
        conn.invalidate();
        assert!(!conn.validate());
        assert_eq!(t.pings.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn destroy_is_idempotent() {
        let t = live_transport();
        let mut conn = connection(&t);
        conn.destroy();
        conn.destroy();
        assert_eq!(t.closes.load(Ordering::Relaxed), 1);
        assert_eq!(conn.state(), ConnectionState::Destroyed);
        assert!(conn.client().is_none());
        assert!(!conn.validate());
    }

    #[test]
    fn destroy_swallows_close_errors() {
        let t = live_transport();
        t.fail_close.store(true, Ordering::Relaxed);
        let mut conn = connection(&t);
        conn.destroy();
        assert_eq!(conn.state(), ConnectionState::Destroyed);
    }

    #[test]
    fn drop_without_pool_closes_client() {
        let t = live_transport();
        drop(connection(&t));
        assert_eq!(t.closes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn drop_after_destroy_does_not_close_twice() {
        let t = live_transport();
        let mut conn = connection(&t);
        conn.destroy();
        drop(conn);
        assert_eq!(t.closes.load(Ordering::Relaxed), 1);
    }
}
