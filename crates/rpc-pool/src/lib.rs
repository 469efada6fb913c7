//! rpc-pool — bounded, host-aware connection pool for RPC clients.
//!
//! Spreads connections over a list of RPC hosts, fails over away from
//! unreachable ones, and hands callers exclusive, reusable connections:
//! - **host**: Host registry with weighted round-robin selection and failover
//! - **transport**: The seam to the underlying client (open, ping, close)
//! - **tcp**: Stock TCP transport
//! - **connection**: One pooled client handle bound to one host
//! - **factory**: Creates, validates, and destroys connections for the pool
//! - **pool**: Bounded blocking checkout, release, removal, eviction
//! - **evictor**: Background task that prunes dead idle connections
//! - **config**: TOML client configuration
//!
//! ```text
//! ConnectionPool::acquire ──► ConnectionFactory::create ──► HostRegistry::get
//!        ▲     │                        │                        │
//!        │     ▼                        ▼                        ▼
//!     release  Connection ◄──── Transport::open(host) ◄──── next eligible host
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod evictor;
pub mod factory;
pub mod host;
pub mod pool;
pub mod tcp;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{ClientConfig, HostConfig, PoolConfig, RetryMode};
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use error::{ConfigError, PoolError, PoolResult, TransportError};
pub use factory::{ConnectionFactory, TransportFactory};
pub use host::{HostAddr, HostRegistry, HostStatus, RetryPolicy};
pub use pool::{ConnectionPool, PoolStats};
pub use tcp::TcpTransport;
pub use transport::Transport;
