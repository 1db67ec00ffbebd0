//! Reserved events answered on the reactor thread without queueing.

use quay_wire::{Payload, PayloadCodec, ReplyCode};
use serde_json::json;
use tracing::warn;

use super::{DISPATCH_TARGET, RequestError};
use crate::request::RequestContext;
use crate::stats::Stats;

/// Returns the server counters; `{"reset": true}` zeroes them after reading.
pub const STATUS_EVENT: &str = "_Reserve.Status";

/// Returns the configured client module list.
pub const CLIENT_MODULES_EVENT: &str = "_Reserve.Clientmod";

/// Whether `event` names one of the inline system queries.
///
/// Only the two query names are reserved; any other `_Reserve.` name is
/// routed like an ordinary event.
#[must_use]
pub fn is_reserved(event: &[u8]) -> bool {
    event == STATUS_EVENT.as_bytes() || event == CLIENT_MODULES_EVENT.as_bytes()
}

/// Handlers for reserved events.
#[derive(Debug, Clone, Default)]
pub struct SystemCommands {
    client_modules: Vec<String>,
}

impl SystemCommands {
    /// Serves `client_modules` through the client-module query.
    #[must_use]
    pub const fn new(client_modules: Vec<String>) -> Self {
        Self { client_modules }
    }

    pub(super) fn handle(
        &self,
        ctx: &RequestContext,
        event: &[u8],
        tree: &Payload,
        stats: &Stats,
        codec: &dyn PayloadCodec,
    ) -> Result<(), RequestError> {
        let reply = match event {
            e if e == STATUS_EVENT.as_bytes() => {
                let reset = tree.get("reset").and_then(Payload::as_bool) == Some(true);
                let snapshot = if reset { stats.reset() } else { stats.snapshot() };
                serde_json::to_value(snapshot).map_err(|_| RequestError::OutOfMemory)?
            }
            e if e == CLIENT_MODULES_EVENT.as_bytes() => {
                if self.client_modules.is_empty() {
                    return Err(RequestError::UnknownRequest);
                }
                json!({ "modules": self.client_modules })
            }
            _ => return Err(RequestError::UnknownRequest),
        };
        if ctx.is_sync()
            && let Err(error) = ctx.reply_payload(ReplyCode::OK, &reply, codec)
        {
            warn!(
                target: DISPATCH_TARGET,
                event = %String::from_utf8_lossy(event),
                error = %error,
                "system reply failed"
            );
        }
        Ok(())
    }
}
