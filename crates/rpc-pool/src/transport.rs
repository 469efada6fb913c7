//! Transport capability — how a client handle is opened, probed, and closed.
//!
//! The pool never speaks the RPC wire protocol itself. A [`Transport`] turns
//! a [`HostAddr`] into a live client handle and knows how to ping and close
//! it. Implementations may block; the pool calls `open` off the async
//! executor.

use crate::error::TransportError;
use crate::host::HostAddr;

/// Opaque `open / ping / close` capability for one kind of client.
pub trait Transport: Send + Sync + 'static {
    /// The live client handle handed to callers.
    type Client: Send + 'static;

    /// Establish a client to `host`.
    fn open(&self, host: &HostAddr) -> Result<Self::Client, TransportError>;

    /// Lightweight liveness probe. Returns `false` on any failure.
    fn ping(&self, client: &mut Self::Client) -> bool;

    /// Shut the client down.
    fn close(&self, client: Self::Client) -> Result<(), TransportError>;
}
