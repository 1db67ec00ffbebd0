//! Boundary to the structured payload codec.
//!
//! The server never interprets payload trees; it only needs to turn bytes
//! into a tree and back, and to know how many bytes a decode consumed so the
//! event size can be bounded.

use serde_json::Deserializer;
use thiserror::Error;

use crate::MAX_PACKET_LEN;

/// Structured payload tree exchanged with queue consumers.
pub type Payload = serde_json::Value;

/// Result of a successful decode.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// Decoded tree.
    pub tree: Payload,
    /// Bytes consumed from the input.
    pub consumed: usize,
}

/// Failures raised by a [`PayloadCodec`].
#[derive(Debug, Error)]
pub enum CodecError {
    /// The input held no payload at all.
    #[error("payload is empty")]
    Empty,
    /// The input could not be decoded.
    #[error("failed to decode payload: {source}")]
    Decode {
        /// Underlying parser error.
        #[source]
        source: serde_json::Error,
    },
    /// The tree could not be encoded.
    #[error("failed to encode payload: {source}")]
    Encode {
        /// Underlying serializer error.
        #[source]
        source: serde_json::Error,
    },
    /// The encoding exceeds the configured bound.
    #[error("encoded payload of {len} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// Encoded size.
        len: usize,
        /// Configured limit.
        max: usize,
    },
}

/// Serialises payload trees to bytes and back.
pub trait PayloadCodec: Send + Sync {
    /// Encodes a tree, bounded by the maximum packet size.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] when encoding fails or exceeds the bound.
    fn encode(&self, tree: &Payload) -> Result<Vec<u8>, CodecError>;

    /// Decodes one tree from the front of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] when no tree can be decoded.
    fn decode(&self, bytes: &[u8]) -> Result<Decoded, CodecError>;
}

/// JSON payload codec.
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec {
    max_len: usize,
}

impl JsonCodec {
    /// Builds a codec with a custom encode bound.
    #[must_use]
    pub const fn with_limit(max_len: usize) -> Self {
        Self { max_len }
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::with_limit(MAX_PACKET_LEN)
    }
}

impl PayloadCodec for JsonCodec {
    fn encode(&self, tree: &Payload) -> Result<Vec<u8>, CodecError> {
        let bytes = serde_json::to_vec(tree).map_err(|source| CodecError::Encode { source })?;
        if bytes.len() > self.max_len {
            return Err(CodecError::TooLarge {
                len: bytes.len(),
                max: self.max_len,
            });
        }
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Decoded, CodecError> {
        let mut stream = Deserializer::from_slice(bytes).into_iter::<Payload>();
        match stream.next() {
            Some(Ok(tree)) => Ok(Decoded {
                tree,
                consumed: stream.byte_offset(),
            }),
            Some(Err(source)) => Err(CodecError::Decode { source }),
            None => Err(CodecError::Empty),
        }
    }
}
