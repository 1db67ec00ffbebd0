//! Length prefix validation and request header parsing.

use std::fmt;

use crate::cursor::Cursor;
use crate::errors::WireError;
use crate::{
    FRAME_HEADER_LEN, LENGTH_PREFIX_LEN, MAX_FRAME_LEN, MIN_REQUEST_BODY_LEN, PROTOCOL_VERSION,
};

const VERSION_SHIFT: u32 = 28;
const ID_MASK: u32 = 0x0FFF_FFFF;

/// 28-bit request identifier, kept in network byte order.
///
/// The id is echoed unchanged in every reply to the request it came from.
/// Server pushes use [`RequestId::PUSH`].
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RequestId([u8; 4]);

impl RequestId {
    /// Id carried by unsolicited server pushes.
    pub const PUSH: Self = Self([0; 4]);

    /// Builds an id from a host-order value; bits above the low 28 are
    /// dropped.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self((value & ID_MASK).to_be_bytes())
    }

    /// Wraps bytes exactly as they appear on the wire.
    #[must_use]
    pub const fn from_wire(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Bytes to write back on the wire.
    #[must_use]
    pub const fn to_wire(self) -> [u8; 4] {
        self.0
    }

    /// Host-order value.
    #[must_use]
    pub const fn value(self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RequestId").field(&self.value()).finish()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Request flag bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RequestFlags(u16);

impl RequestFlags {
    /// The client waits for a reply.
    pub const SYNC: Self = Self(0x0002);

    /// Wraps raw flag bits.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Raw flag bits.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Whether the sender expects a reply.
    #[must_use]
    pub const fn is_sync(self) -> bool {
        self.0 & Self::SYNC.0 != 0
    }
}

/// Decoded request header with a borrowed view of the event payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFrame<'a> {
    /// Request id to echo in replies.
    pub id: RequestId,
    /// Command code.
    pub command: u16,
    /// Flag bits.
    pub flags: RequestFlags,
    /// Event payload following the header.
    pub payload: &'a [u8],
}

/// Reads the total-length prefix when at least four bytes are present.
#[must_use]
pub fn peek_frame_len(bytes: &[u8]) -> Option<u32> {
    let prefix = bytes.get(..LENGTH_PREFIX_LEN)?;
    let mut word = [0_u8; LENGTH_PREFIX_LEN];
    word.copy_from_slice(prefix);
    Some(u32::from_be_bytes(word))
}

/// Validates a declared total length and returns it as a buffer size.
///
/// # Errors
///
/// Returns [`WireError::FrameLength`] when the length is above
/// [`MAX_FRAME_LEN`] or at or below [`FRAME_HEADER_LEN`].
pub fn check_frame_len(declared: u32) -> Result<usize, WireError> {
    match usize::try_from(declared) {
        Ok(len) if len > FRAME_HEADER_LEN && len <= MAX_FRAME_LEN => Ok(len),
        _ => Err(WireError::FrameLength { declared }),
    }
}

/// Parses a request body, the bytes that follow the length prefix.
///
/// # Errors
///
/// Returns [`WireError::ShortRequest`] for bodies shorter than
/// [`MIN_REQUEST_BODY_LEN`] and [`WireError::VersionMismatch`] when the
/// header names another protocol version.
pub fn parse_request(body: &[u8]) -> Result<RequestFrame<'_>, WireError> {
    if body.len() < MIN_REQUEST_BODY_LEN {
        return Err(WireError::ShortRequest { len: body.len() });
    }
    let mut cursor = Cursor::new(body);
    let word = cursor.read_u32()?;
    let found = u8::try_from(word >> VERSION_SHIFT).unwrap_or(u8::MAX);
    let id = RequestId::new(word);
    if found != PROTOCOL_VERSION {
        return Err(WireError::VersionMismatch { found, id });
    }
    let command = cursor.read_u16()?;
    let flags = RequestFlags::from_bits(cursor.read_u16()?);
    Ok(RequestFrame {
        id,
        command,
        flags,
        payload: cursor.remaining(),
    })
}
