//! Per-request context and reply operations.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use quay_wire::{
    CodecError, ErrorCode, Payload, PayloadCodec, Reply, ReplyCode, RequestFlags, RequestFrame,
    RequestId, WireError,
};
use thiserror::Error;
use tracing::{trace, warn};

use crate::dispatch::RequestError;
use crate::socket::{ConnectionId, SendError, SocketHandle, SocketRef};
use crate::stats::Stats;

const REPLY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::reply");

/// Transport a request arrived on. Only TCP is served; the others exist for
/// the per-transport counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Stream socket.
    Tcp,
    /// Datagram socket.
    Udp,
    /// SCTP association.
    Sctp,
    /// TIPC link.
    Tipc,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Sctp => "sctp",
            Self::Tipc => "tipc",
        };
        f.write_str(label)
    }
}

/// Errors raised while replying to a request.
#[derive(Debug, Error)]
pub enum ReplyError {
    /// The reply frame could not be built.
    #[error("failed to encode reply: {0}")]
    Encode(#[from] WireError),
    /// The reply payload could not be encoded.
    #[error("failed to encode reply payload: {0}")]
    Codec(#[from] CodecError),
    /// The frame could not be written.
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Everything needed to answer one request after its frame is gone.
///
/// Cloning yields an independent copy suitable for a queue entry; the copy
/// keeps only a non-counting link to the connection. Contexts built by the
/// reactor carry the server counters so failed replies are counted.
#[derive(Clone, Debug)]
pub struct RequestContext {
    socket: SocketRef,
    transport: TransportKind,
    peer: SocketAddr,
    id: RequestId,
    command: u16,
    flags: RequestFlags,
    stats: Option<Arc<Stats>>,
}

impl RequestContext {
    /// Builds a context for a TCP request.
    #[must_use]
    pub const fn new(
        socket: SocketRef,
        peer: SocketAddr,
        id: RequestId,
        command: u16,
        flags: RequestFlags,
    ) -> Self {
        Self {
            socket,
            transport: TransportKind::Tcp,
            peer,
            id,
            command,
            flags,
            stats: None,
        }
    }

    /// Counts send failures of this context's replies in `stats`.
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<Stats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub(crate) fn from_frame(socket: &SocketHandle, frame: &RequestFrame<'_>) -> Self {
        Self::new(
            socket.downgrade(),
            socket.peer(),
            frame.id,
            frame.command,
            frame.flags,
        )
    }

    /// Connection the request arrived on.
    #[must_use]
    pub const fn connection(&self) -> ConnectionId {
        self.socket.id()
    }

    /// Link to the connection.
    #[must_use]
    pub const fn socket(&self) -> &SocketRef {
        &self.socket
    }

    /// Transport kind.
    #[must_use]
    pub const fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Remote address.
    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Request id echoed in replies.
    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// Command code.
    #[must_use]
    pub const fn command(&self) -> u16 {
        self.command
    }

    /// Flag bits.
    #[must_use]
    pub const fn flags(&self) -> RequestFlags {
        self.flags
    }

    /// Whether the client waits for a reply.
    #[must_use]
    pub const fn is_sync(&self) -> bool {
        self.flags.is_sync()
    }

    /// Sends a status-only reply.
    ///
    /// # Errors
    ///
    /// Returns [`ReplyError`] when the frame cannot be written.
    pub fn reply_short(&self, code: ReplyCode) -> Result<(), ReplyError> {
        self.deliver(Reply::Short { id: self.id, code })
    }

    /// Sends an error reply.
    ///
    /// # Errors
    ///
    /// Returns [`ReplyError`] when the frame cannot be written.
    pub fn reply_error(&self, code: ErrorCode) -> Result<(), ReplyError> {
        self.deliver(Reply::Error { id: self.id, code })
    }

    /// Sends a value reply; `None` degrades to a short reply.
    ///
    /// # Errors
    ///
    /// Returns [`ReplyError`] when the value is too large or the frame cannot
    /// be written.
    pub fn reply_value(&self, code: ReplyCode, value: Option<&[u8]>) -> Result<(), ReplyError> {
        self.deliver(Reply::Value {
            id: self.id,
            code,
            value,
        })
    }

    /// Encodes `tree` and sends it as a value reply.
    ///
    /// # Errors
    ///
    /// Returns [`ReplyError`] when encoding or sending fails.
    pub fn reply_payload(
        &self,
        code: ReplyCode,
        tree: &Payload,
        codec: &dyn PayloadCodec,
    ) -> Result<(), ReplyError> {
        let value = codec.encode(tree)?;
        self.reply_value(code, Some(&value))
    }

    fn deliver(&self, reply: Reply<'_>) -> Result<(), ReplyError> {
        let frame = reply.encode()?;
        trace!(
            target: REPLY_TARGET,
            connection = %self.connection(),
            id = %self.id,
            frame = ?frame,
            "sending reply"
        );
        match self.socket.send_all(&frame) {
            Ok(()) => Ok(()),
            Err(error @ SendError::Io { .. }) => {
                warn!(
                    target: REPLY_TARGET,
                    connection = %self.connection(),
                    id = %self.id,
                    error = %error,
                    "reply send failed"
                );
                if let Some(stats) = &self.stats {
                    stats.record_error(RequestError::IoFailure);
                }
                if !matches!(reply, Reply::Error { .. }) {
                    self.send_failure_notice();
                }
                Err(error.into())
            }
            Err(error) => Err(error.into()),
        }
    }

    fn send_failure_notice(&self) {
        let notice = Reply::Error {
            id: self.id,
            code: ErrorCode::Send,
        };
        if let Ok(frame) = notice.encode()
            && let Err(error) = self.socket.send_all(&frame)
        {
            trace!(
                target: REPLY_TARGET,
                connection = %self.connection(),
                error = %error,
                "send failure notice not delivered"
            );
        }
    }
}
