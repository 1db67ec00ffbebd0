//! Wire format for the quay request/reply protocol.
//!
//! Every message on the stream is a frame introduced by a 4-byte big-endian
//! total length (the prefix counts itself). A request body carries an 8-byte
//! header packing the protocol version, a 28-bit request id, a command code
//! and flags; the remainder is an event payload made of a length-prefixed
//! event name followed by a structured payload produced by a
//! [`PayloadCodec`].
//!
//! Replies travel in the opposite direction as short, error or value frames,
//! and server-initiated pushes reuse the value layout with request id zero.
//!
//! The crate performs no I/O. All decoding goes through [`Cursor`], which
//! checks every length against the bytes actually available before moving.
#![expect(
    clippy::big_endian_bytes,
    reason = "the protocol is defined in network byte order"
)]

mod codec;
mod cursor;
mod errors;
mod event;
mod reply;
mod request;

pub use codec::{CodecError, Decoded, JsonCodec, Payload, PayloadCodec};
pub use cursor::Cursor;
pub use errors::WireError;
pub use event::{EventFrame, check_event_size, split_event};
pub use reply::{ErrorCode, Reply, ReplyCode, ReplyFrame, encode_push};
pub use request::{
    RequestFlags, RequestFrame, RequestId, check_frame_len, parse_request, peek_frame_len,
};

/// Protocol version accepted in request headers.
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of the total-length prefix that opens every frame.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Size of the request header that follows the length prefix.
pub const REQUEST_HEADER_LEN: usize = 8;

/// Header-only frame size. Declared totals at or below this are rejected.
pub const FRAME_HEADER_LEN: usize = LENGTH_PREFIX_LEN + REQUEST_HEADER_LEN;

/// Smallest request body (after the prefix) the parser accepts.
pub const MIN_REQUEST_BODY_LEN: usize = REQUEST_HEADER_LEN + 1;

/// Largest frame, prefix included, accepted or produced.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Upper bound on an encoded structured payload.
pub const MAX_PACKET_LEN: usize = MAX_FRAME_LEN;

/// Receive scratch size: the largest frame plus room for a following partial
/// frame header.
pub const SCRATCH_BUFFER_LEN: usize = 68 * 1024;
