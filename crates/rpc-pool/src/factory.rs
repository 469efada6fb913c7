//! Connection factory — creates, validates, and destroys connections.
//!
//! The pool only talks to a [`ConnectionFactory`]; tests inject their own.
//! [`TransportFactory`] is the stock implementation: it asks the
//! [`HostRegistry`] for a host, opens a client through a [`Transport`], and
//! records the outcome against the host.

use std::sync::Arc;

use tracing::{debug, error};

use crate::connection::Connection;
use crate::error::{PoolError, PoolResult};
use crate::host::HostRegistry;
use crate::transport::Transport;

/// Factory for creating new connections — injected into the pool.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Client: Send + 'static;

    /// Open a new connection to some host.
    fn create(&self) -> PoolResult<Connection<Self::Client>>;

    /// Liveness probe. Never fails; a failed probe is `false`.
    fn validate(&self, conn: &mut Connection<Self::Client>) -> bool {
        conn.validate()
    }

    /// Close the connection. Idempotent; close errors are logged, not returned.
    fn destroy(&self, conn: &mut Connection<Self::Client>) {
        conn.destroy();
    }
}

/// [`ConnectionFactory`] backed by a host registry and a transport.
pub struct TransportFactory<T: Transport> {
    registry: Arc<HostRegistry>,
    transport: Arc<T>,
}

impl<T: Transport> TransportFactory<T> {
    pub fn new(registry: Arc<HostRegistry>, transport: T) -> Self {
        Self {
            registry,
            transport: Arc::new(transport),
        }
    }

    pub fn registry(&self) -> &Arc<HostRegistry> {
        &self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport> ConnectionFactory for TransportFactory<T> {
    type Client = T::Client;

    fn create(&self) -> PoolResult<Connection<T::Client>> {
        let host = self.registry.get()?;
        match self.transport.open(&host) {
            Ok(client) => {
                self.registry.mark_success(&host);
                let transport: Arc<dyn Transport<Client = T::Client>> = self.transport.clone();
                let conn = Connection::new(host, client, transport);
                debug!(connection = %conn.id(), host = %conn.host(), "opened connection");
                Ok(conn)
            }
            Err(cause) => {
                self.registry.mark_failure(&host);
                error!(host = %host, error = %cause, "failed to open connection to host");
                Err(PoolError::ConnectionCreate { host, cause })
            }
        }
    }
}

impl<T: Transport> std::fmt::Debug for TransportFactory<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportFactory")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
