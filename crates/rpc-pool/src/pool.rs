//! Connection pool — bounded, blocking checkout of RPC connections.
//!
//! # Architecture
//!
//! ```text
//! acquire(timeout)
//!   → idle connection available → hand it out (no probe on the hot path)
//!   → idle + active + pending < max_active → reserve a slot, Factory::create()
//!   → pool at capacity → wait on `available` until a release or the deadline
//!
//! release(conn)
//!   → pool closed / conn invalid / marked for removal → Factory::destroy()
//!   → otherwise push to the idle set and wake one waiter
//! ```
//!
//! All bookkeeping lives behind one mutex. Factory calls (`create`,
//! `validate`, `destroy`) never run while it is held; creation reserves a
//! `pending` slot first so concurrent creators still respect `max_active`.


use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionId};
use crate::error::{PoolError, PoolResult};
use crate::factory::{ConnectionFactory, TransportFactory};
use crate::host::HostRegistry;
use crate::transport::Transport;

/// Pool-level statistics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Connections resting in the pool.
    pub idle: usize,
    /// Connections checked out by callers.
    pub active: usize,
    /// Creations in flight.
    pub pending: usize,
    /// Idle connections out for validation.
    pub evicting: usize,
    /// Everything counted against `max_active`.
    pub total: usize,
    pub max_active: usize,
    /// Acquires that had to wait at least once.
    pub waits: u64,
    /// Acquires that gave up with `PoolExhausted`.
    pub timeouts: u64,
    pub created: u64,
    pub destroyed: u64,
    pub closed: bool,
}

/// Bookkeeping guarded by the pool lock.
struct State<C: Send + 'static> {
    /// Most recently returned first.
    idle: VecDeque<Connection<C>>,
    checked_out: HashSet<ConnectionId>,
    evicting: HashSet<ConnectionId>,
    /// Connections to destroy instead of reuse once they come back.
    doomed: HashSet<ConnectionId>,
    pending: usize,
    closed: bool,
    created: u64,
    destroyed: u64,
}

impl<C: Send + 'static> State<C> {
    fn total(&self) -> usize {
        self.idle.len() + self.checked_out.len() + self.evicting.len() + self.pending
    }
}

enum Checkout<C: Send + 'static> {
    Idle(Connection<C>),
    Reserved,
    Full,
}

/// State shared between pool handles, connections, and the evictor.
pub(crate) struct Shared<C: Send + 'static> {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory<Client = C>>,
    state: Mutex<State<C>>,
    /// Signalled when an idle connection or a free slot appears.
    available: Notify,
    /// Signalled whenever a connection leaves the pool's books.
    returned: Notify,
    closed_tx: watch::Sender<bool>,
    waits: AtomicU64,
    timeouts: AtomicU64,
}

impl<C: Send + 'static> Shared<C> {
    fn checkout(&self) -> PoolResult<Checkout<C>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::PoolClosed);
        }
        if let Some(mut conn) = state.idle.pop_front() {
            conn.mark_active();
            state.checked_out.insert(conn.id());
            return Ok(Checkout::Idle(conn));
        }
        if state.total() < self.config.max_active {
            state.pending += 1;
            return Ok(Checkout::Reserved);
        }
        Ok(Checkout::Full)
    }

    /// Run `Factory::create` on the blocking pool and book the result with
    /// `admit`. The caller must already hold a `pending` slot.
    ///
    /// The slot stays reserved until the create has finished, even if the
    /// awaiting future is dropped; an orphaned connection is then dropped as
    /// checked out and destroyed through the factory.
    async fn create_with<R, F>(self: &Arc<Self>, admit: F) -> PoolResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&Arc<Self>, Connection<C>) -> PoolResult<R> + Send + 'static,
    {
        let mut reservation = Reservation::new(Arc::clone(self));
        let task = move || {
            let conn = reservation.shared.factory.create()?;
            reservation.disarm();
            admit(&reservation.shared, conn)
        };
        match tokio::task::spawn_blocking(task).await {
            Ok(result) => result,
            Err(err) => match err.try_into_panic() {
                Ok(payload) => std::panic::resume_unwind(payload),
                // Cancelled: the runtime is shutting down.
                Err(_) => Err(PoolError::PoolClosed),
            },
        }
    }

    /// Book a freshly created connection as checked out, trading in its
    /// `pending` reservation.
    fn admit_active(self: &Arc<Self>, mut conn: Connection<C>) -> PoolResult<Connection<C>> {
        let mut state = self.state.lock();
        state.pending -= 1;
        state.created += 1;
        if state.closed {
            drop(state);
            debug!(connection = %conn.id(), "pool closed during create, destroying new connection");
            self.discard(conn);
            return Err(PoolError::PoolClosed);
        }
        conn.attach(Arc::downgrade(self));
        conn.mark_active();
        state.checked_out.insert(conn.id());
        Ok(conn)
    }

    /// Book a freshly created connection as idle. Returns `false` if the
    /// pool closed in the meantime and the connection was destroyed.
    fn admit_idle(self: &Arc<Self>, mut conn: Connection<C>) -> bool {
        let mut state = self.state.lock();
        state.pending -= 1;
        state.created += 1;
        if state.closed {
            drop(state);
            self.discard(conn);
            return false;
        }
        conn.attach(Arc::downgrade(self));
        conn.mark_idle();
        state.idle.push_back(conn);
        drop(state);
        self.available.notify_one();
        true
    }

    /// Destroy a connection the pool no longer tracks.
    fn discard(&self, mut conn: Connection<C>) {
        self.state.lock().destroyed += 1;
        self.factory.destroy(&mut conn);
        conn.detach();
        drop(conn);
        self.slot_freed();
    }

    /// A checked-out connection was dropped without being released.
    pub(crate) fn reclaim_dropped(&self, conn: &mut Connection<C>) {
        {
            let mut state = self.state.lock();
            state.checked_out.remove(&conn.id());
            state.doomed.remove(&conn.id());
            state.destroyed += 1;
        }
        debug!(connection = %conn.id(), host = %conn.host(), "connection dropped while checked out, destroying");
        self.factory.destroy(conn);
        conn.detach();
        self.slot_freed();
    }

    fn slot_freed(&self) {
        self.available.notify_one();
        self.returned.notify_waiters();
    }
}

impl<C: Send + 'static> Drop for Shared<C> {
    fn drop(&mut self) {
        // Last handle gone without `close()`: idle connections still go
        // through the factory.
        let idle = std::mem::take(&mut self.state.get_mut().idle);
        for mut conn in idle {
            self.factory.destroy(&mut conn);
            conn.detach();
        }
    }
}

/// Releases a `pending` reservation unless a connection took its place.
struct Reservation<C: Send + 'static> {
    shared: Arc<Shared<C>>,
    armed: bool,
}

impl<C: Send + 'static> Reservation<C> {
    fn new(shared: Arc<Shared<C>>) -> Self {
        Self { shared, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<C: Send + 'static> Drop for Reservation<C> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.state.lock().pending -= 1;
            self.shared.slot_freed();
        }
    }
}

/// Bounded pool of connections of client type `C`.
///
/// Cheap to clone; clones share the same pool.
pub struct ConnectionPool<C: Send + 'static> {
    inner: Arc<Shared<C>>,
}

impl<C: Send + 'static> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Send + 'static> ConnectionPool<C> {
    /// Create an empty pool. Call [`prewarm`](Self::prewarm) to fill `min_idle`.
    pub fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory<Client = C>>) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Shared {
                config,
                factory,
                state: Mutex::new(State {
                    idle: VecDeque::new(),
                    checked_out: HashSet::new(),
                    evicting: HashSet::new(),
                    doomed: HashSet::new(),
                    pending: 0,
                    closed: false,
                    created: 0,
                    destroyed: 0,
                }),
                available: Notify::new(),
                returned: Notify::new(),
                closed_tx,
                waits: AtomicU64::new(0),
                timeouts: AtomicU64::new(0),
            }),
        }
    }

    /// Create a pool over a [`TransportFactory`].
    pub fn with_transport<T>(config: PoolConfig, registry: Arc<HostRegistry>, transport: T) -> Self
    where
        T: Transport<Client = C>,
    {
        Self::new(config, Arc::new(TransportFactory::new(registry, transport)))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Check out a connection, waiting up to `max_wait`.
    pub async fn acquire(&self) -> PoolResult<Connection<C>> {
        self.acquire_timeout(self.inner.config.max_wait).await
    }

    /// Check out a connection, waiting up to `timeout` when the pool is full.
    ///
    /// Creation failures are returned at once rather than waited out.
    pub async fn acquire_timeout(&self, timeout: Duration) -> PoolResult<Connection<C>> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut waited = false;

        loop {
            // Register before looking at the state so a release in between is not lost.
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.inner.checkout()? {
                Checkout::Idle(conn) => {
                    debug!(connection = %conn.id(), host = %conn.host(), "reused idle connection from pool");
                    return Ok(conn);
                }
                Checkout::Reserved => return self.create_reserved().await,
                Checkout::Full => {}
            }

            if !waited {
                waited = true;
                self.inner.waits.fetch_add(1, Ordering::Relaxed);
                debug!(timeout = ?timeout, "pool at capacity, waiting for a connection");
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let waited = started.elapsed();
                self.inner.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    waited = ?waited,
                    max_active = self.inner.config.max_active,
                    "connection pool exhausted"
                );
                return Err(PoolError::PoolExhausted { waited });
            }
        }
    }

    async fn create_reserved(&self) -> PoolResult<Connection<C>> {
        let conn = self.inner.create_with(Shared::admit_active).await?;
        debug!(connection = %conn.id(), host = %conn.host(), "created new connection");
        Ok(conn)
    }

    /// Return a connection to the pool.
    ///
    /// Invalid connections, connections marked for removal, and anything
    /// released after shutdown are destroyed instead of reused.
    pub fn release(&self, mut conn: Connection<C>) {
        if !conn.belongs_to(&self.inner) {
            warn!(connection = %conn.id(), host = %conn.host(), "released connection belongs to another pool");
            return;
        }

        let mut state = self.inner.state.lock();
        let was_checked_out = state.checked_out.remove(&conn.id());
        let doomed = state.doomed.remove(&conn.id());
        let discard_reason = if state.closed {
            Some("pool closed")
        } else if doomed {
            Some("marked for removal")
        } else if !was_checked_out {
            Some("not checked out")
        } else if !conn.is_valid() {
            Some("invalid")
        } else {
            None
        };

        match discard_reason {
            None => {
                conn.mark_idle();
                let id = conn.id();
                state.idle.push_front(conn);
                let idle = state.idle.len();
                drop(state);
                self.inner.available.notify_one();
                self.inner.returned.notify_waiters();
                debug!(connection = %id, idle, "returned connection to pool");
            }
            Some(reason) => {
                drop(state);
                debug!(connection = %conn.id(), host = %conn.host(), reason, "destroying connection on release");
                self.inner.discard(conn);
            }
        }
    }

    /// Forcibly destroy a checked-out connection.
    pub fn remove(&self, conn: Connection<C>) {
        if !conn.belongs_to(&self.inner) {
            warn!(connection = %conn.id(), host = %conn.host(), "removed connection belongs to another pool");
            return;
        }
        {
            let mut state = self.inner.state.lock();
            state.checked_out.remove(&conn.id());
            state.doomed.remove(&conn.id());
        }
        debug!(connection = %conn.id(), host = %conn.host(), "removing connection");
        self.inner.discard(conn);
    }

    /// Remove a connection by identity, wherever it is.
    ///
    /// Idle connections are destroyed now; checked-out or evicting ones are
    /// destroyed when they come back. Returns `false` if there was nothing
    /// (left) to remove.
    pub fn remove_id(&self, id: ConnectionId) -> bool {
        let mut state = self.inner.state.lock();
        if let Some(pos) = state.idle.iter().position(|c| c.id() == id) {
            let conn = state.idle.remove(pos);
            drop(state);
            if let Some(conn) = conn {
                debug!(connection = %id, "removing idle connection");
                self.inner.discard(conn);
            }
            return true;
        }
        if state.checked_out.contains(&id) || state.evicting.contains(&id) {
            let marked = state.doomed.insert(id);
            if marked {
                debug!(connection = %id, "connection marked for removal");
            }
            return marked;
        }
        false
    }

    /// Probe idle connections that have rested at least `max_idle_time` and
    /// destroy the ones that fail. Returns how many were destroyed.
    ///
    /// Probing happens outside the pool lock.
    pub fn evict(&self) -> usize {
        let max_idle_time = self.inner.config.max_idle_time;
        let candidates: Vec<Connection<C>> = {
            let mut state = self.inner.state.lock();
            if state.closed || state.idle.is_empty() {
                return 0;
            }
            let (expired, fresh): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut state.idle)
                .into_iter()
                .partition(|conn| conn.idle_for() >= max_idle_time);
            state.idle = fresh;
            state.evicting.extend(expired.iter().map(Connection::id));
            expired.into()
        };
        if candidates.is_empty() {
            return 0;
        }

        let checked = candidates.len();
        let mut survivors = Vec::with_capacity(checked);
        let mut failed = Vec::new();
        for mut conn in candidates {
            if self.inner.factory.validate(&mut conn) {
                survivors.push(conn);
            } else {
                debug!(connection = %conn.id(), host = %conn.host(), "idle connection failed validation");
                failed.push(conn);
            }
        }
        let evicted = failed.len();

        let mut returned = 0;
        {
            let mut state = self.inner.state.lock();
            for conn in survivors.iter().chain(failed.iter()) {
                state.evicting.remove(&conn.id());
            }
            for conn in survivors {
                let doomed = state.doomed.remove(&conn.id());
                if state.closed || doomed {
                    failed.push(conn);
                } else {
                    state.idle.push_back(conn);
                    returned += 1;
                }
            }
        }

        for conn in failed {
            self.inner.discard(conn);
        }
        for _ in 0..returned {
            self.inner.available.notify_one();
        }

        if evicted > 0 {
            info!(checked, evicted, "evicted idle connections failing validation");
        } else {
            debug!(checked, "idle connections passed validation");
        }
        evicted
    }

    /// Create idle connections until `min_idle` is met. Returns how many were
    /// created. Failures are logged and end the run.
    pub async fn prewarm(&self) -> usize {
        let min_idle = self.inner.config.min_idle;
        let mut created = 0;

        loop {
            {
                let mut state = self.inner.state.lock();
                if state.closed
                    || state.idle.len() >= min_idle
                    || state.total() >= self.inner.config.max_active
                {
                    break;
                }
                state.pending += 1;
            }
            match self.inner.create_with(|shared, conn| Ok(shared.admit_idle(conn))).await {
                Ok(true) => created += 1,
                Ok(false) => break,
                Err(e) => {
                    warn!(error = %e, "failed to pre-warm connection");
                    break;
                }
            }
        }

        if created > 0 {
            debug!(created, min_idle, "pre-warmed idle connections");
        }
        created
    }

    /// Shut the pool down.
    ///
    /// Idle connections are destroyed now, checked-out ones when they are
    /// released or dropped. Waiting and future acquires fail with
    /// [`PoolError::PoolClosed`].
    pub fn close(&self) {
        let idle: Vec<Connection<C>> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.idle.drain(..).collect()
        };
        self.inner.closed_tx.send_replace(true);
        self.inner.available.notify_waiters();

        info!(idle = idle.len(), "connection pool closing");
        for conn in idle {
            self.inner.discard(conn);
        }
    }

    /// Close the pool and wait up to `timeout` for checked-out connections
    /// to come back. Returns how many were still outstanding.
    pub async fn drain(&self, timeout: Duration) -> usize {
        self.close();
        let deadline = Instant::now() + timeout;

        loop {
            let returned = self.inner.returned.notified();
            tokio::pin!(returned);
            returned.as_mut().enable();

            let outstanding = self.outstanding();
            if outstanding == 0 {
                info!("all in-flight connections drained");
                return 0;
            }
            if tokio::time::timeout_at(deadline, returned).await.is_err() {
                let outstanding = self.outstanding();
                if outstanding > 0 {
                    warn!(outstanding, "drain timeout expired with connections still checked out");
                }
                return outstanding;
            }
        }
    }

    fn outstanding(&self) -> usize {
        let state = self.inner.state.lock();
        state.checked_out.len() + state.pending + state.evicting.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Connections currently resting in the pool (not checked out).
    pub fn size(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            idle: state.idle.len(),
            active: state.checked_out.len(),
            pending: state.pending,
            evicting: state.evicting.len(),
            total: state.total(),
            max_active: self.inner.config.max_active,
            waits: self.inner.waits.load(Ordering::Relaxed),
            timeouts: self.inner.timeouts.load(Ordering::Relaxed),
            created: state.created,
            destroyed: state.destroyed,
            closed: state.closed,
        }
    }

    /// Log pool statistics at `info` level.
    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            idle = stats.idle,
            active = stats.active,
            pending = stats.pending,
            total = stats.total,
            max_active = stats.max_active,
            waits = stats.waits,
            timeouts = stats.timeouts,
            created = stats.created,
            destroyed = stats.destroyed,
            "pool statistics"
        );
    }

    pub(crate) fn downgrade(&self) -> Weak<Shared<C>> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_shared(inner: Arc<Shared<C>>) -> Self {
        Self { inner }
    }

    pub(crate) fn closed_signal(&self) -> watch::Receiver<bool> {
        self.inner.closed_tx.subscribe()
    }
}

impl<C: Send + 'static> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
