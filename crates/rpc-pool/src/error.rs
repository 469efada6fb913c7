//! Error types for the RPC connection pool.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::host::HostAddr;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced to callers of the pool.
///
/// A caller of [`ConnectionPool::acquire`](crate::ConnectionPool::acquire)
/// sees either a usable connection or exactly one of these.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Opening a transport to a specific host failed.
    #[error("failed to connect to {host}: {cause}")]
    ConnectionCreate {
        host: HostAddr,
        #[source]
        cause: TransportError,
    },

    /// Every host in the registry is currently marked unhealthy.
    #[error("no host available ({hosts} known, all unhealthy)")]
    NoHostAvailable { hosts: usize },

    /// Capacity stayed fully used for the whole wait.
    #[error("connection pool exhausted after waiting {waited:?}")]
    PoolExhausted { waited: Duration },

    /// The pool has been shut down.
    #[error("connection pool is closed")]
    PoolClosed,
}

impl PoolError {
    /// Whether a later `acquire` may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PoolError::PoolClosed)
    }

    /// The host this error is attributed to, if any.
    pub fn host(&self) -> Option<&HostAddr> {
        match self {
            PoolError::ConnectionCreate { host, .. } => Some(host),
            _ => None,
        }
    }
}

/// Faults reported by a [`Transport`](crate::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not resolve {0}")]
    Resolve(String),

    #[error("transport closed: {0}")]
    Closed(String),
}

/// Errors loading or validating client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid host address {0:?}: expected host:port")]
    InvalidHost(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
