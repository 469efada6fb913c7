//! Background eviction — periodically probes idle connections and tops the
//! pool back up to `min_idle`.
//!
//! The task holds only a weak reference to the pool: it stops when the pool
//! is closed or when the last pool handle is dropped.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::pool::{ConnectionPool, Shared};

impl<C: Send + 'static> ConnectionPool<C> {
    /// Spawn the eviction task on the current tokio runtime.
    ///
    /// Returns `None` when `evict_interval` is zero.
    pub fn spawn_evictor(&self) -> Option<JoinHandle<()>> {
        let interval = self.config().evict_interval;
        if interval.is_zero() {
            debug!("background eviction disabled");
            return None;
        }
        let pool = self.downgrade();
        let closed = self.closed_signal();
        Some(tokio::spawn(run_evict_loop(pool, interval, closed)))
    }
}

async fn run_evict_loop<C: Send + 'static>(
    pool: Weak<Shared<C>>,
    interval: Duration,
    mut closed: watch::Receiver<bool>,
) {
    debug!(interval = ?interval, "evictor starting");

    loop {
        if *closed.borrow_and_update() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let Some(shared) = pool.upgrade() else {
                    break;
                };
                run_once(ConnectionPool::from_shared(shared)).await;
            }
            changed = closed.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("evictor shutting down");
}

async fn run_once<C: Send + 'static>(pool: ConnectionPool<C>) {
    let sweeper = pool.clone();
    match tokio::task::spawn_blocking(move || sweeper.evict()).await {
        Ok(evicted) => debug!(evicted, "eviction run finished"),
        Err(e) => error!(error = %e, "eviction run failed"),
    }
    pool.prewarm().await;
}
