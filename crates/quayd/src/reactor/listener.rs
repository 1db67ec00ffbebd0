//! Listening socket setup.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};

use mio::net::TcpStream;
use socket2::{Domain, Protocol, SockRef, Socket, Type};

use super::ListenerError;

const LISTEN_BACKLOG: i32 = 1024;

/// Resolves `host:port` and binds a non-blocking listener with address reuse.
pub(super) fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_string(),
            port,
            source,
        })?;
    let addr = addrs
        .find(|addr| matches!(addr, SocketAddr::V4(_) | SocketAddr::V6(_)))
        .ok_or_else(|| ListenerError::ResolveEmpty {
            host: host.to_string(),
            port,
        })?;

    let prepare = |source| ListenerError::Socket { addr, source };
    let socket =
        Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)).map_err(prepare)?;
    socket.set_reuse_address(true).map_err(prepare)?;
    socket
        .bind(&addr.into())
        .map_err(|source| ListenerError::BindTcp { addr, source })?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|source| ListenerError::Listen { addr, source })?;
    socket.set_nonblocking(true).map_err(prepare)?;
    Ok(socket.into())
}

/// Applies per-connection socket options.
pub(super) fn configure_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    SockRef::from(stream).set_keepalive(true)
}
