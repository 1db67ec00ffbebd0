//! Turns complete frames into dispatched requests.

use std::sync::Arc;

use quay_wire::{ErrorCode, RequestFlags, RequestId, WireError, parse_request};
use tracing::{debug, trace};

use super::REACTOR_TARGET;
use super::reassembly::Verdict;
use crate::dispatch::{Dispatcher, RequestError};
use crate::request::{RequestContext, TransportKind};
use crate::socket::SocketHandle;
use crate::stats::Stats;

/// Parses frame bodies and hands them to the dispatcher.
pub struct RequestPipeline {
    dispatcher: Arc<Dispatcher>,
}

impl RequestPipeline {
    /// Feeds `dispatcher`.
    #[must_use]
    pub const fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Handles the body of one complete frame from `socket`.
    ///
    /// A header naming another protocol version is answered and the
    /// connection kept; a body too short to hold a header closes it.
    pub(crate) fn handle_frame(&self, socket: &SocketHandle, body: &[u8]) -> Verdict {
        let stats = self.dispatcher.stats();
        stats.record_message(TransportKind::Tcp);
        trace!(
            target: REACTOR_TARGET,
            connection = %socket.id(),
            body = ?body,
            "frame received"
        );
        match parse_request(body) {
            Ok(frame) => {
                let ctx = RequestContext::from_frame(socket, &frame).with_stats(Arc::clone(stats));
                self.dispatcher.handle_event(&ctx, frame.payload);
                Verdict::Continue
            }
            Err(WireError::VersionMismatch { found, id }) => {
                stats.record_error(RequestError::VersionMismatch);
                debug!(
                    target: REACTOR_TARGET,
                    connection = %socket.id(),
                    version = found,
                    "protocol version mismatch"
                );
                reply_error(socket, stats, id, ErrorCode::Version);
                Verdict::Continue
            }
            Err(error) => {
                stats.record_error(RequestError::Malformed);
                debug!(
                    target: REACTOR_TARGET,
                    connection = %socket.id(),
                    error = %error,
                    "broken request"
                );
                reply_error(socket, stats, RequestId::PUSH, ErrorCode::Broken);
                Verdict::Close
            }
        }
    }
}

fn reply_error(socket: &SocketHandle, stats: &Arc<Stats>, id: RequestId, code: ErrorCode) {
    let ctx = RequestContext::new(socket.downgrade(), socket.peer(), id, 0, RequestFlags::SYNC)
        .with_stats(Arc::clone(stats));
    if let Err(error) = ctx.reply_error(code) {
        debug!(
            target: REACTOR_TARGET,
            connection = %socket.id(),
            error = %error,
            "error reply not delivered"
        );
    }
}
