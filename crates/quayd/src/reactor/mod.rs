//! Readiness-driven TCP reactor.
//!
//! One thread owns the listening socket and every accepted connection. It
//! accepts, reads, reassembles frames and parses them; complete requests go to
//! the dispatcher. Connections are registered for read readiness only. Replies
//! are written synchronously by whichever thread holds the request.

mod errors;
mod listener;
mod pipeline;
mod reassembly;

use std::collections::HashMap;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use quay_config::Config;
use quay_wire::SCRATCH_BUFFER_LEN;
use tracing::{debug, error, info, warn};

use crate::socket::{ConnectionId, SocketHandle};

pub use self::errors::ListenerError;
pub use self::pipeline::RequestPipeline;
use self::reassembly::{Reassembly, Verdict};

pub(crate) const REACTOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::reactor");

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CONNECTION: usize = 2;
const EVENTS_CAPACITY: usize = 1024;
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Tunables for a reactor instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReactorOptions {
    partial_frame_timeout: Option<Duration>,
}

impl ReactorOptions {
    /// Reads the tunables from configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            partial_frame_timeout: config.partial_frame_timeout(),
        }
    }

    /// Closes connections whose partial frame makes no progress for
    /// `timeout`. `None` waits forever.
    #[must_use]
    pub const fn with_partial_frame_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.partial_frame_timeout = timeout;
        self
    }
}

/// A bound, not yet running reactor.
pub struct Reactor {
    listener: TcpListener,
    local_addr: SocketAddr,
    poll: Poll,
    pipeline: RequestPipeline,
    options: ReactorOptions,
}

impl Reactor {
    /// Binds `host:port` and prepares the poller.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the address cannot be resolved or bound,
    /// or the poller cannot be created.
    pub fn bind(
        host: &str,
        port: u16,
        pipeline: RequestPipeline,
        options: ReactorOptions,
    ) -> Result<Self, ListenerError> {
        let std_listener = listener::bind_tcp(host, port)?;
        let local_addr = std_listener
            .local_addr()
            .map_err(|source| ListenerError::LocalAddr { source })?;
        let poll = Poll::new().map_err(|source| ListenerError::Poll { source })?;
        let mut listener = TcpListener::from_std(std_listener);
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(|source| ListenerError::Poll { source })?;
        Ok(Self {
            listener,
            local_addr,
            poll,
            pipeline,
            options,
        })
    }

    /// Address actually bound.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the reactor on its own thread.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the waker or the thread cannot be
    /// created.
    pub fn start(self) -> Result<ReactorHandle, ListenerError> {
        let waker = Arc::new(
            Waker::new(self.poll.registry(), WAKER)
                .map_err(|source| ListenerError::Poll { source })?,
        );
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);
        let local_addr = self.local_addr;
        let handle = thread::Builder::new()
            .name("quayd-reactor".to_owned())
            .spawn(move || self.run(&shutdown_flag))
            .map_err(|source| ListenerError::Spawn { source })?;
        Ok(ReactorHandle {
            shutdown,
            waker,
            local_addr,
            handle: Some(handle),
        })
    }

    fn run(mut self, shutdown: &AtomicBool) {
        info!(
            target: REACTOR_TARGET,
            address = %self.local_addr,
            "reactor listening"
        );
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let mut scratch = vec![0_u8; SCRATCH_BUFFER_LEN].into_boxed_slice();
        let mut connections = HashMap::new();
        let mut next_id = FIRST_CONNECTION;
        let poll_timeout = self
            .options
            .partial_frame_timeout
            .map(|timeout| timeout.min(SWEEP_INTERVAL));

        while !shutdown.load(Ordering::SeqCst) {
            if let Err(poll_error) = self.poll.poll(&mut events, poll_timeout) {
                if poll_error.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(
                    target: REACTOR_TARGET,
                    error = %poll_error,
                    "readiness poll failed, stopping reactor"
                );
                break;
            }
            for event in &events {
                match event.token() {
                    LISTENER => self.accept(&mut connections, &mut next_id),
                    WAKER => {}
                    token => {
                        let verdict = connections
                            .get_mut(&token)
                            .map(|connection: &mut Connection| {
                                connection.on_readable(&mut scratch, &self.pipeline)
                            });
                        if verdict == Some(Verdict::Close)
                            && let Some(connection) = connections.remove(&token)
                        {
                            self.close(connection);
                        }
                    }
                }
            }
            if let Some(timeout) = self.options.partial_frame_timeout {
                self.expire_stalled(&mut connections, timeout);
            }
        }

        let remaining = connections.len();
        for (_, connection) in connections.drain() {
            self.close(connection);
        }
        info!(
            target: REACTOR_TARGET,
            closed = remaining,
            "reactor stopped"
        );
    }

    fn accept(&self, connections: &mut HashMap<Token, Connection>, next_id: &mut usize) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    if let Err(error) = listener::configure_stream(&stream) {
                        debug!(
                            target: REACTOR_TARGET,
                            peer = %peer,
                            error = %error,
                            "failed to set socket options"
                        );
                    }
                    let token = Token(*next_id);
                    *next_id += 1;
                    if let Err(error) =
                        self.poll
                            .registry()
                            .register(&mut stream, token, Interest::READABLE)
                    {
                        warn!(
                            target: REACTOR_TARGET,
                            peer = %peer,
                            error = %error,
                            "failed to register connection"
                        );
                        continue;
                    }
                    let stream = Arc::new(stream);
                    let handle =
                        SocketHandle::new(ConnectionId::new(token.0), peer, Some(Arc::clone(&stream)));
                    debug!(
                        target: REACTOR_TARGET,
                        connection = %handle.id(),
                        peer = %peer,
                        "connection accepted"
                    );
                    connections.insert(
                        token,
                        Connection {
                            handle,
                            stream,
                            reassembly: Reassembly::default(),
                        },
                    );
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    warn!(
                        target: REACTOR_TARGET,
                        error = %error,
                        "socket accept error"
                    );
                    break;
                }
            }
        }
    }

    fn expire_stalled(&self, connections: &mut HashMap<Token, Connection>, timeout: Duration) {
        let now = Instant::now();
        let stalled: Vec<Token> = connections
            .iter()
            .filter(|(_, connection)| connection.reassembly.stalled(now, timeout))
            .map(|(token, _)| *token)
            .collect();
        for token in stalled {
            if let Some(connection) = connections.remove(&token) {
                info!(
                    target: REACTOR_TARGET,
                    connection = %connection.handle.id(),
                    missing = connection.reassembly.missing(),
                    "partial frame timed out"
                );
                self.close(connection);
            }
        }
    }

    /// Deregisters, shuts the transport down and drops the reactor's
    /// reference. The descriptor closes once the last reference goes.
    fn close(&self, connection: Connection) {
        let fd = connection.stream.as_raw_fd();
        if let Err(error) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
            debug!(
                target: REACTOR_TARGET,
                connection = %connection.handle.id(),
                error = %error,
                "deregister failed"
            );
        }
        connection.handle.close_transport();
        debug!(
            target: REACTOR_TARGET,
            connection = %connection.handle.id(),
            "connection closed"
        );
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("local_addr", &self.local_addr)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

struct Connection {
    handle: SocketHandle,
    stream: Arc<TcpStream>,
    reassembly: Reassembly,
}

enum ReadOutcome {
    Data(usize),
    WouldBlock,
    Closed(Option<io::Error>),
}

impl Connection {
    /// Reads until the socket would block, feeding every chunk through
    /// reassembly.
    fn on_readable(&mut self, scratch: &mut [u8], pipeline: &RequestPipeline) -> Verdict {
        loop {
            let fed = match self.reassembly.pending_buffer() {
                Some(pending) => match read_into(&self.stream, pending) {
                    ReadOutcome::Data(len) => self
                        .reassembly
                        .feed_pending(len, |body| pipeline.handle_frame(&self.handle, body)),
                    ReadOutcome::WouldBlock => return Verdict::Continue,
                    ReadOutcome::Closed(cause) => return self.closed_by_peer(cause),
                },
                None => match read_into(&self.stream, scratch) {
                    ReadOutcome::Data(len) => self.reassembly.feed_scratch(
                        scratch.get(..len).unwrap_or_default(),
                        |body| pipeline.handle_frame(&self.handle, body),
                    ),
                    ReadOutcome::WouldBlock => return Verdict::Continue,
                    ReadOutcome::Closed(cause) => return self.closed_by_peer(cause),
                },
            };
            match fed {
                Ok(Verdict::Continue) => {}
                Ok(Verdict::Close) => return Verdict::Close,
                Err(error) => {
                    debug!(
                        target: REACTOR_TARGET,
                        connection = %self.handle.id(),
                        error = %error,
                        "invalid frame length"
                    );
                    return Verdict::Close;
                }
            }
        }
    }

    fn closed_by_peer(&self, cause: Option<io::Error>) -> Verdict {
        match cause {
            None => debug!(
                target: REACTOR_TARGET,
                connection = %self.handle.id(),
                "peer closed connection"
            ),
            Some(error) => debug!(
                target: REACTOR_TARGET,
                connection = %self.handle.id(),
                error = %error,
                "receive failed"
            ),
        }
        Verdict::Close
    }
}

fn read_into(stream: &TcpStream, buffer: &mut [u8]) -> ReadOutcome {
    let mut reader = stream;
    loop {
        match reader.read(buffer) {
            Ok(0) => return ReadOutcome::Closed(None),
            Ok(len) => return ReadOutcome::Data(len),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                return ReadOutcome::WouldBlock;
            }
            Err(error) => return ReadOutcome::Closed(Some(error)),
        }
    }
}

/// Handle to a running reactor thread.
pub struct ReactorHandle {
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
    local_addr: SocketAddr,
    handle: Option<thread::JoinHandle<()>>,
}

impl ReactorHandle {
    /// Address the reactor listens on.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Asks the reactor to stop; it closes every connection on the way out.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(error) = self.waker.wake() {
            warn!(
                target: REACTOR_TARGET,
                error = %error,
                "failed to wake reactor"
            );
        }
    }

    /// Waits for the reactor thread to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ThreadPanic`] when the thread panicked.
    pub fn join(mut self) -> Result<(), ListenerError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ListenerError::ThreadPanic),
            None => Ok(()),
        }
    }
}

impl Drop for ReactorHandle {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for ReactorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorHandle")
            .field("local_addr", &self.local_addr)
            .field("running", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}
