//! Error type shared by the wire decoders and encoders.

use thiserror::Error;

use crate::request::RequestId;

/// Failures raised while decoding or encoding protocol frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Fewer bytes remain than a field requires.
    #[error("needed {needed} bytes but only {available} remain")]
    Truncated {
        /// Bytes the field requires.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },
    /// The total-length prefix lies outside the accepted range.
    #[error("declared frame length {declared} is outside the accepted range")]
    FrameLength {
        /// Length carried by the prefix.
        declared: u32,
    },
    /// The request body cannot hold a header and a payload byte.
    #[error("request body of {len} bytes is too short")]
    ShortRequest {
        /// Body length after the prefix.
        len: usize,
    },
    /// The header carries a protocol version other than the supported one.
    #[error("protocol version {found} is not supported")]
    VersionMismatch {
        /// Version found in the header.
        found: u8,
        /// Request id decoded alongside the version.
        id: RequestId,
    },
    /// The event name length points past the end of the payload.
    #[error("event name of {declared} bytes exceeds the {available} bytes available")]
    EventNameOverrun {
        /// Declared name length.
        declared: u32,
        /// Payload bytes following the length field.
        available: usize,
    },
    /// The event name, its length and the structured payload exceed the
    /// packet bound.
    #[error("event of {len} bytes exceeds the packet limit")]
    EventTooLarge {
        /// Combined event size.
        len: usize,
    },
    /// An encoded frame would exceed the maximum frame size.
    #[error("frame of {len} bytes exceeds the maximum frame size")]
    FrameTooLarge {
        /// Size the frame would have.
        len: usize,
    },
    /// A reply frame's declared sizes disagree with its contents.
    #[error("reply frame is inconsistent: {reason}")]
    MalformedReply {
        /// What did not match.
        reason: &'static str,
    },
    /// An error reply carried a code the protocol does not define.
    #[error("unknown error code {code:#x}")]
    UnknownErrorCode {
        /// Raw code found on the wire.
        code: u32,
    },
}
