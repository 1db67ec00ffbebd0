//! Error types for the listener and reactor thread.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors surfaced while binding or running the reactor.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The listen host could not be resolved.
    #[error("failed to resolve TCP address {host}:{port}: {source}")]
    Resolve {
        /// Configured host.
        host: String,
        /// Configured port.
        port: u16,
        /// Resolver error.
        #[source]
        source: io::Error,
    },
    /// Resolution succeeded but produced nothing.
    #[error("no TCP addresses resolved for {host}:{port}")]
    ResolveEmpty {
        /// Configured host.
        host: String,
        /// Configured port.
        port: u16,
    },
    /// The listening socket could not be created or configured.
    #[error("failed to prepare listening socket for {addr}: {source}")]
    Socket {
        /// Address being bound.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The address could not be bound.
    #[error("failed to bind TCP listener at {addr}: {source}")]
    BindTcp {
        /// Address being bound.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The socket could not start listening.
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        /// Bound address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The bound address could not be read back.
    #[error("failed to read listener address: {source}")]
    LocalAddr {
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The readiness poller could not be set up.
    #[error("failed to set up readiness polling: {source}")]
    Poll {
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The reactor thread could not be spawned.
    #[error("failed to spawn reactor thread: {source}")]
    Spawn {
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The reactor thread panicked.
    #[error("reactor thread panicked")]
    ThreadPanic,
}
