//! Reply and push frame encoding.
//!
//! | kind  | layout                                   |
//! |-------|------------------------------------------|
//! | short | `[12] [id] [code]`                       |
//! | error | `[16] [id] [ERROR_MARKER] [error code]`  |
//! | value | `[16 + V] [id] [code] [V] [value]`       |
//!
//! Pushes are value frames with id zero and [`ReplyCode::PUSH`].

use std::fmt;

use crate::MAX_FRAME_LEN;
use crate::cursor::Cursor;
use crate::errors::WireError;
use crate::request::RequestId;

const SHORT_LEN: usize = 12;
const LONG_HEADER_LEN: usize = 16;

/// Reply status code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReplyCode(u32);

impl ReplyCode {
    /// Marks an error reply; the error code follows it.
    pub const ERROR_MARKER: Self = Self(0x0800);
    /// Request handled.
    pub const OK: Self = Self(0x0803);
    /// Server-initiated push.
    pub const PUSH: Self = Self(10_000);

    /// Wraps an application-defined code.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw code.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Error codes carried by error replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// Unsupported protocol version.
    Version = 0x101,
    /// Sending the reply failed.
    Send = 0x102,
    /// Request could not be decoded.
    Broken = 0x103,
    /// No handler for the event.
    UnknownRequest = 0x104,
    /// Allocation failed while queueing the request.
    Memory = 0x105,
    /// Target queue is over its admission limit.
    Busy = 0x107,
}

impl ErrorCode {
    /// Raw code.
    #[must_use]
    pub const fn value(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for ErrorCode {
    type Error = WireError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0x101 => Ok(Self::Version),
            0x102 => Ok(Self::Send),
            0x103 => Ok(Self::Broken),
            0x104 => Ok(Self::UnknownRequest),
            0x105 => Ok(Self::Memory),
            0x107 => Ok(Self::Busy),
            _ => Err(WireError::UnknownErrorCode { code }),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Version => "version",
            Self::Send => "send",
            Self::Broken => "broken",
            Self::UnknownRequest => "unknown_request",
            Self::Memory => "memory",
            Self::Busy => "busy",
        };
        f.write_str(label)
    }
}

/// Reply to encode for a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reply<'a> {
    /// Status only.
    Short {
        /// Id of the request being answered.
        id: RequestId,
        /// Status code.
        code: ReplyCode,
    },
    /// Protocol-level failure.
    Error {
        /// Id of the request being answered.
        id: RequestId,
        /// Failure reason.
        code: ErrorCode,
    },
    /// Status plus an opaque value. An absent value is sent as a short reply.
    Value {
        /// Id of the request being answered.
        id: RequestId,
        /// Status code.
        code: ReplyCode,
        /// Value bytes.
        value: Option<&'a [u8]>,
    },
}

impl Reply<'_> {
    /// Encodes the reply into a complete frame, prefix included.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::FrameTooLarge`] when a value frame would exceed
    /// [`MAX_FRAME_LEN`].
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        match *self {
            Self::Short { id, code } | Self::Value { id, code, value: None } => {
                Ok(assemble(id, code.value(), None, SHORT_LEN))
            }
            Self::Error { id, code } => Ok(assemble(
                id,
                ReplyCode::ERROR_MARKER.value(),
                Some(&code.value().to_be_bytes()),
                LONG_HEADER_LEN,
            )),
            Self::Value {
                id,
                code,
                value: Some(value),
            } => {
                let len = LONG_HEADER_LEN.saturating_add(value.len());
                if len > MAX_FRAME_LEN {
                    return Err(WireError::FrameTooLarge { len });
                }
                let value_len =
                    u32::try_from(value.len()).map_err(|_| WireError::FrameTooLarge { len })?;
                let mut frame = assemble(id, code.value(), Some(&value_len.to_be_bytes()), len);
                frame.extend_from_slice(value);
                Ok(frame)
            }
        }
    }
}

fn assemble(id: RequestId, code: u32, word: Option<&[u8; 4]>, total: usize) -> Vec<u8> {
    let mut frame = Vec::with_capacity(total);
    let declared = u32::try_from(total).unwrap_or(u32::MAX);
    frame.extend_from_slice(&declared.to_be_bytes());
    frame.extend_from_slice(&id.to_wire());
    frame.extend_from_slice(&code.to_be_bytes());
    if let Some(word) = word {
        frame.extend_from_slice(word);
    }
    frame
}

/// Encodes a server push around an already encoded payload.
///
/// # Errors
///
/// Returns [`WireError::FrameTooLarge`] when the frame would exceed
/// [`MAX_FRAME_LEN`].
pub fn encode_push(payload: &[u8]) -> Result<Vec<u8>, WireError> {
    Reply::Value {
        id: RequestId::PUSH,
        code: ReplyCode::PUSH,
        value: Some(payload),
    }
    .encode()
}

/// Owned reply decoded from a complete frame, as a client would see it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyFrame {
    /// Status only.
    Short {
        /// Echoed request id.
        id: RequestId,
        /// Status code.
        code: ReplyCode,
    },
    /// Protocol-level failure.
    Error {
        /// Echoed request id.
        id: RequestId,
        /// Failure reason.
        code: ErrorCode,
    },
    /// Status plus value.
    Value {
        /// Echoed request id, zero for pushes.
        id: RequestId,
        /// Status code.
        code: ReplyCode,
        /// Value bytes.
        value: Vec<u8>,
    },
}

impl ReplyFrame {
    /// Decodes a complete reply frame including its length prefix.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::MalformedReply`] when the declared sizes do not
    /// match the bytes supplied, [`WireError::Truncated`] when a field is cut
    /// short, and [`WireError::UnknownErrorCode`] for undefined error codes.
    pub fn decode(frame: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(frame);
        let declared = cursor.read_u32()?;
        if usize::try_from(declared).ok() != Some(frame.len()) {
            return Err(WireError::MalformedReply {
                reason: "length prefix disagrees with frame size",
            });
        }
        let id = RequestId::from_wire(cursor.take_array()?);
        let code = ReplyCode::new(cursor.read_u32()?);
        if cursor.remaining_len() == 0 {
            return Ok(Self::Short { id, code });
        }
        if code == ReplyCode::ERROR_MARKER && cursor.remaining_len() == 4 {
            let error = ErrorCode::try_from(cursor.read_u32()?)?;
            return Ok(Self::Error { id, code: error });
        }
        let value_len = usize::try_from(cursor.read_u32()?).map_err(|_| {
            WireError::MalformedReply {
                reason: "value length does not fit in memory",
            }
        })?;
        if value_len != cursor.remaining_len() {
            return Err(WireError::MalformedReply {
                reason: "value length disagrees with frame size",
            });
        }
        let value = cursor.take(value_len)?.to_vec();
        Ok(Self::Value { id, code, value })
    }

    /// Echoed request id.
    #[must_use]
    pub const fn id(&self) -> RequestId {
        match self {
            Self::Short { id, .. } | Self::Error { id, .. } | Self::Value { id, .. } => *id,
        }
    }
}
