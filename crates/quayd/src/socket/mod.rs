//! Reference-counted connection handles.
//!
//! Every accepted connection is represented by one shared record. A
//! [`SocketHandle`] value is one counted reference to it: [`SocketHandle::acquire`]
//! hands out another, and dropping or [`SocketHandle::release`]-ing a handle
//! gives one back. When the last counted reference goes, the transport is shut
//! down if it is still open and the close hook runs, exactly once.
//!
//! Request contexts and queued work only carry a [`SocketRef`], which never
//! keeps a connection alive. Replies written through a `SocketRef` to a
//! connection that has already gone fail with [`SendError::Closed`].

mod hook;

use std::fmt;
use std::io::{self, Write};
use std::mem;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;

use mio::net::TcpStream;
use thiserror::Error;
use tracing::{debug, error};

pub use self::hook::CloseHook;

const SOCKET_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::socket");

type DisconnectWatcher = Box<dyn FnOnce(ConnectionId) + Send>;

/// Identifier of an accepted connection. Never reused within a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(usize);

impl ConnectionId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Raw identifier.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised while writing to a connection.
#[derive(Debug, Error)]
pub enum SendError {
    /// The connection was closed or released before the write finished.
    #[error("connection {connection} is closed")]
    Closed {
        /// Target connection.
        connection: ConnectionId,
    },
    /// The transport reported an error other than would-block.
    #[error("failed to write to connection {connection}: {source}")]
    Io {
        /// Target connection.
        connection: ConnectionId,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

struct SocketState {
    refs: usize,
    stream: Option<Arc<TcpStream>>,
    on_close: CloseHook,
    watchers: Vec<DisconnectWatcher>,
}

struct SocketInner {
    id: ConnectionId,
    peer: SocketAddr,
    closed: AtomicBool,
    state: Mutex<SocketState>,
    writer: Mutex<()>,
}

impl SocketInner {
    fn state(&self) -> MutexGuard<'_, SocketState> {
        self.state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn try_acquire(self: &Arc<Self>) -> Option<SocketHandle> {
        let mut state = self.state();
        if state.refs == 0 {
            return None;
        }
        state.refs += 1;
        Some(SocketHandle {
            inner: Arc::clone(self),
        })
    }

    fn release_one(&self) {
        let (stream, hook) = {
            let mut state = self.state();
            debug_assert!(state.refs > 0, "socket {} released below zero", self.id);
            if state.refs == 0 {
                error!(
                    target: SOCKET_TARGET,
                    connection = %self.id,
                    "socket reference released below zero"
                );
                return;
            }
            state.refs -= 1;
            if state.refs > 0 {
                return;
            }
            self.closed.store(true, Ordering::SeqCst);
            state.watchers.clear();
            (
                state.stream.take(),
                mem::replace(&mut state.on_close, CloseHook::None),
            )
        };
        if let Some(stream) = stream {
            shutdown_stream(self.id, &stream);
        }
        debug!(
            target: SOCKET_TARGET,
            connection = %self.id,
            peer = %self.peer,
            "last socket reference released"
        );
        hook.run(self.id, self.peer);
    }

    fn close_transport(&self) {
        let (stream, watchers) = {
            let mut state = self.state();
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            (state.stream.take(), mem::take(&mut state.watchers))
        };
        if let Some(stream) = stream {
            shutdown_stream(self.id, &stream);
        }
        for watcher in watchers {
            watcher(self.id);
        }
    }

    fn set_close_hook(&self, hook: CloseHook) -> CloseHook {
        mem::replace(&mut self.state().on_close, hook)
    }

    fn watch_disconnect(&self, watcher: DisconnectWatcher) {
        {
            let mut state = self.state();
            if !self.closed.load(Ordering::SeqCst) {
                state.watchers.push(watcher);
                return;
            }
        }
        watcher(self.id);
    }

    fn stream(&self) -> Option<Arc<TcpStream>> {
        self.state().stream.clone()
    }

    fn send_all(&self, bytes: &[u8]) -> Result<(), SendError> {
        let closed = || SendError::Closed {
            connection: self.id,
        };
        let stream = self.stream().ok_or_else(closed)?;
        let _writer = self
            .writer
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let mut written = 0;
        while let Some(rest) = bytes.get(written..).filter(|rest| !rest.is_empty()) {
            match (&*stream).write(rest) {
                Ok(0) => {
                    return Err(SendError::Io {
                        connection: self.id,
                        source: io::ErrorKind::WriteZero.into(),
                    });
                }
                Ok(count) => written += count,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    if self.closed.load(Ordering::SeqCst) {
                        return Err(closed());
                    }
                    thread::yield_now();
                }
                Err(source) => {
                    return Err(SendError::Io {
                        connection: self.id,
                        source,
                    });
                }
            }
        }
        Ok(())
    }
}

fn shutdown_stream(id: ConnectionId, stream: &TcpStream) {
    if let Err(error) = stream.shutdown(Shutdown::Both)
        && error.kind() != io::ErrorKind::NotConnected
    {
        debug!(
            target: SOCKET_TARGET,
            connection = %id,
            error = %error,
            "socket shutdown failed"
        );
    }
}

/// One counted reference to a connection.
///
/// Dropping the handle releases the reference.
pub struct SocketHandle {
    inner: Arc<SocketInner>,
}

impl SocketHandle {
    /// Creates the record for a fresh connection; the returned handle is its
    /// first reference.
    #[must_use]
    pub fn new(id: ConnectionId, peer: SocketAddr, stream: Option<Arc<TcpStream>>) -> Self {
        Self {
            inner: Arc::new(SocketInner {
                id,
                peer,
                closed: AtomicBool::new(false),
                state: Mutex::new(SocketState {
                    refs: 1,
                    stream,
                    on_close: CloseHook::Default,
                    watchers: Vec::new(),
                }),
                writer: Mutex::new(()),
            }),
        }
    }

    /// Connection identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Remote address captured at accept time.
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.inner.peer
    }

    /// Whether the transport has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Current number of counted references.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.inner.state().refs
    }

    /// Takes another counted reference.
    #[must_use]
    pub fn acquire(&self) -> Self {
        self.inner.state().refs += 1;
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Gives this reference back.
    pub fn release(self) {
        drop(self);
    }

    /// Non-counting link to the same connection.
    #[must_use]
    pub fn downgrade(&self) -> SocketRef {
        SocketRef {
            inner: Arc::downgrade(&self.inner),
            id: self.inner.id,
        }
    }

    /// Installs the hook run when the last reference is released, returning
    /// the previous one.
    pub fn set_close_hook(&self, hook: CloseHook) -> CloseHook {
        self.inner.set_close_hook(hook)
    }

    /// Runs `watcher` once when the transport is closed; immediately if it
    /// already is.
    pub fn watch_disconnect<F>(&self, watcher: F)
    where
        F: FnOnce(ConnectionId) + Send + 'static,
    {
        self.inner.watch_disconnect(Box::new(watcher));
    }

    /// Closes the transport after a receive failure. Disconnect watchers run
    /// once; later calls do nothing. The reference count is untouched.
    pub fn close_transport(&self) {
        self.inner.close_transport();
    }

    /// Shuts the stream down without closing the record, so the reactor sees
    /// end-of-stream and retires the connection through its normal path.
    ///
    /// # Errors
    ///
    /// Returns the IO error reported by the shutdown call.
    pub fn shutdown(&self) -> io::Result<()> {
        match self.inner.stream() {
            Some(stream) => stream.shutdown(Shutdown::Both),
            None => Ok(()),
        }
    }

    /// Writes a whole frame, resuming after partial writes.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] when the connection is closed or the write fails.
    pub fn send_all(&self, bytes: &[u8]) -> Result<(), SendError> {
        self.inner.send_all(bytes)
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        self.inner.release_one();
    }
}

impl fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHandle")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Non-counting link to a connection.
#[derive(Clone)]
pub struct SocketRef {
    inner: Weak<SocketInner>,
    id: ConnectionId,
}

impl SocketRef {
    /// Connection identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Takes a counted reference while the connection still has one.
    #[must_use]
    pub fn acquire(&self) -> Option<SocketHandle> {
        self.inner.upgrade()?.try_acquire()
    }

    /// Whether the connection is closed or gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner
            .upgrade()
            .is_none_or(|inner| inner.closed.load(Ordering::SeqCst))
    }

    /// Installs a close hook; returns `false` when the connection is gone.
    pub fn set_close_hook(&self, hook: CloseHook) -> bool {
        match self.inner.upgrade() {
            Some(inner) => {
                drop(inner.set_close_hook(hook));
                true
            }
            None => false,
        }
    }

    /// Registers a disconnect watcher. Runs it immediately when the
    /// connection is already closed or gone.
    pub fn watch_disconnect<F>(&self, watcher: F)
    where
        F: FnOnce(ConnectionId) + Send + 'static,
    {
        match self.inner.upgrade() {
            Some(inner) => inner.watch_disconnect(Box::new(watcher)),
            None => watcher(self.id),
        }
    }

    /// Writes a whole frame.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] when the connection is gone, otherwise as
    /// [`SocketHandle::send_all`].
    pub fn send_all(&self, bytes: &[u8]) -> Result<(), SendError> {
        match self.inner.upgrade() {
            Some(inner) => inner.send_all(bytes),
            None => Err(SendError::Closed {
                connection: self.id,
            }),
        }
    }
}

impl fmt::Debug for SocketRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketRef").field("id", &self.id).finish()
    }
}
