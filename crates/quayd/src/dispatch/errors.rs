//! Request failure classes and their wire codes.

use quay_wire::ErrorCode;
use thiserror::Error;

/// Why a request was not handed to a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum RequestError {
    /// Frame or payload could not be decoded.
    #[error("malformed request")]
    Malformed,
    /// Header names an unsupported protocol version.
    #[error("protocol version mismatch")]
    VersionMismatch,
    /// No queue serves the event.
    #[error("unknown request")]
    UnknownRequest,
    /// Target queue is over its admission limit.
    #[error("queue busy")]
    Busy,
    /// An allocation failed while building the queue entry.
    #[error("out of memory")]
    OutOfMemory,
    /// A reply could not be written.
    #[error("send failure")]
    IoFailure,
}

impl RequestError {
    /// Code sent in the error reply.
    #[must_use]
    pub const fn code(self) -> ErrorCode {
        match self {
            Self::Malformed => ErrorCode::Broken,
            Self::VersionMismatch => ErrorCode::Version,
            Self::UnknownRequest => ErrorCode::UnknownRequest,
            Self::Busy => ErrorCode::Busy,
            Self::OutOfMemory => ErrorCode::Memory,
            Self::IoFailure => ErrorCode::Send,
        }
    }
}
