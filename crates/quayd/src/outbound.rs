//! Server-initiated push messages.
//!
//! A push carries request id zero and reply code
//! [`quay_wire::ReplyCode::PUSH`]; its
//! value is the encoded tree tagged with the command name under
//! `_Reserve.cmd`, so clients can tell push kinds apart.

use std::sync::Arc;

use quay_wire::{CodecError, Payload, PayloadCodec, WireError, encode_push};
use serde_json::{Map, json};
use thiserror::Error;
use tracing::{debug, trace};

use crate::socket::{SendError, SocketRef};

const OUTBOUND_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::outbound");

/// Key under which the push command is recorded.
pub const RESERVED_KEY: &str = "_Reserve";

/// Errors raised while composing or delivering a push.
#[derive(Debug, Error)]
pub enum OutboundError {
    /// Only maps (or nothing) can be tagged with a command.
    #[error("push payload must be a map, got {kind}")]
    NotAMap {
        /// Kind of value supplied.
        kind: &'static str,
    },
    /// The payload could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The frame could not be built.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// The frame could not be written.
    #[error(transparent)]
    Send(#[from] SendError),
    /// No session is registered for the user.
    #[error("no session for user {user_id}")]
    UnknownUser {
        /// User addressed.
        user_id: String,
    },
}

/// Composes and sends push frames.
#[derive(Clone)]
pub struct Outbound {
    codec: Arc<dyn PayloadCodec>,
}

impl Outbound {
    /// Uses `codec` for push payloads.
    #[must_use]
    pub fn new(codec: Arc<dyn PayloadCodec>) -> Self {
        Self { codec }
    }

    /// Builds a complete push frame named `command` carrying `tree`.
    ///
    /// A null tree is treated as an empty map.
    ///
    /// # Errors
    ///
    /// Returns [`OutboundError::NotAMap`] for scalar or list payloads and
    /// codec or framing errors otherwise.
    pub fn compose_push(&self, command: &str, tree: Payload) -> Result<Vec<u8>, OutboundError> {
        let mut fields = match tree {
            Payload::Null => Map::new(),
            Payload::Object(fields) => fields,
            other => {
                return Err(OutboundError::NotAMap {
                    kind: kind_of(&other),
                });
            }
        };
        fields.insert(RESERVED_KEY.to_owned(), json!({ "cmd": command }));
        let value = self.codec.encode(&Payload::Object(fields))?;
        Ok(encode_push(&value)?)
    }

    /// Writes a pre-built frame to `socket`.
    ///
    /// # Errors
    ///
    /// Returns [`OutboundError::Send`] when the connection is gone or the
    /// write fails.
    pub fn send_frame(&self, socket: &SocketRef, frame: &[u8]) -> Result<(), OutboundError> {
        trace!(
            target: OUTBOUND_TARGET,
            connection = %socket.id(),
            frame = ?frame,
            "sending push"
        );
        socket.send_all(frame).map_err(|error| {
            debug!(
                target: OUTBOUND_TARGET,
                connection = %socket.id(),
                error = %error,
                "push not delivered"
            );
            OutboundError::from(error)
        })
    }

    /// Composes and sends a push in one step.
    ///
    /// # Errors
    ///
    /// As [`Outbound::compose_push`] and [`Outbound::send_frame`].
    pub fn push(
        &self,
        socket: &SocketRef,
        command: &str,
        tree: Payload,
    ) -> Result<(), OutboundError> {
        let frame = self.compose_push(command, tree)?;
        self.send_frame(socket, &frame)
    }
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound").finish_non_exhaustive()
    }
}

const fn kind_of(value: &Payload) -> &'static str {
    match value {
        Payload::Null => "null",
        Payload::Bool(_) => "bool",
        Payload::Number(_) => "number",
        Payload::String(_) => "string",
        Payload::Array(_) => "list",
        Payload::Object(_) => "map",
    }
}
