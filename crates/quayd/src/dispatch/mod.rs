//! Request dispatch onto named queues.
//!
//! The reactor hands every well-formed request body to [`Dispatcher::handle_event`],
//! which splits out the event name, decodes the structured payload and routes
//! the request. Reserved events are answered inline. Everything else goes to
//! the queue registered for the event name, subject to admission control:
//!
//! - above the warning threshold the dispatcher logs every Nth observation;
//! - strictly above the busy threshold the request is refused with a busy
//!   error, and the refusal is logged every Nth time.
//!
//! Synchronous requests replace a still-queued equivalent from the same
//! connection rather than queueing twice.

mod entry;
mod errors;
mod system;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use quay_config::Config;
use quay_queue::{DispatchTable, NamedQueue, QueueFull};
use quay_wire::{Payload, PayloadCodec, check_event_size, split_event};
use tracing::{debug, warn};

use crate::request::RequestContext;
use crate::stats::Stats;

pub use self::entry::QueueEntry;
pub use self::errors::RequestError;
pub use self::system::{CLIENT_MODULES_EVENT, STATUS_EVENT, SystemCommands, is_reserved};

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Queue table seen by the dispatcher.
pub type QueueTable = dyn DispatchTable<QueueEntry>;

/// Outcome of routing one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Appended to its queue.
    Queued,
    /// Replaced an equivalent queued request.
    Replaced,
    /// Answered inline as a reserved event.
    System,
    /// Refused; an error reply was sent when the request was synchronous.
    Rejected(RequestError),
}

/// Queue-size thresholds applied before inserting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionPolicy {
    warning: usize,
    busy: usize,
    report_interval: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Accept,
    Warn,
    Busy,
}

impl AdmissionPolicy {
    /// Builds a policy. A zero interval is treated as one.
    #[must_use]
    pub const fn new(warning: usize, busy: usize, report_interval: usize) -> Self {
        Self {
            warning,
            busy,
            report_interval: if report_interval == 0 { 1 } else { report_interval },
        }
    }

    /// Reads the thresholds from configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self::new(
            config.queue_warning_threshold(),
            config.queue_busy_threshold(),
            config.queue_report_interval(),
        )
    }

    fn assess(&self, size: usize) -> Admission {
        if size > self.busy {
            Admission::Busy
        } else if size > self.warning && size % self.report_interval == 0 {
            Admission::Warn
        } else {
            Admission::Accept
        }
    }

    const fn reports(&self, occurrence: u64) -> bool {
        occurrence % (self.report_interval as u64) == 0
    }
}

/// Routes decoded requests to queues or reserved handlers.
pub struct Dispatcher {
    table: Arc<QueueTable>,
    codec: Arc<dyn PayloadCodec>,
    stats: Arc<Stats>,
    policy: AdmissionPolicy,
    system: SystemCommands,
}

impl Dispatcher {
    /// Wires a dispatcher.
    #[must_use]
    pub fn new(
        table: Arc<QueueTable>,
        codec: Arc<dyn PayloadCodec>,
        stats: Arc<Stats>,
        policy: AdmissionPolicy,
        system: SystemCommands,
    ) -> Self {
        Self {
            table,
            codec,
            stats,
            policy,
            system,
        }
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Decodes an event payload and routes it.
    ///
    /// A payload that cannot be decoded counts as a broken request; the
    /// connection stays open.
    pub fn handle_event(&self, ctx: &RequestContext, payload: &[u8]) -> Dispatched {
        let event = match split_event(payload) {
            Ok(event) => event,
            Err(error) => {
                debug!(
                    target: DISPATCH_TARGET,
                    connection = %ctx.connection(),
                    id = %ctx.id(),
                    error = %error,
                    "event header rejected"
                );
                return self.reject(ctx, RequestError::Malformed);
            }
        };
        let decoded = match self.codec.decode(event.body) {
            Ok(decoded) => decoded,
            Err(error) => {
                debug!(
                    target: DISPATCH_TARGET,
                    connection = %ctx.connection(),
                    id = %ctx.id(),
                    error = %error,
                    "event payload rejected"
                );
                return self.reject(ctx, RequestError::Malformed);
            }
        };
        if let Err(error) = check_event_size(event.name.len(), decoded.consumed) {
            debug!(
                target: DISPATCH_TARGET,
                connection = %ctx.connection(),
                error = %error,
                "event exceeds packet limit"
            );
            return self.reject(ctx, RequestError::Malformed);
        }
        self.dispatch(ctx, event.name, decoded.tree)
    }

    /// Routes a decoded request; ownership of `tree` moves to the queue entry
    /// on success and is dropped otherwise.
    pub fn dispatch(&self, ctx: &RequestContext, event: &[u8], tree: Payload) -> Dispatched {
        if is_reserved(event) {
            return match self
                .system
                .handle(ctx, event, &tree, &self.stats, self.codec.as_ref())
            {
                Ok(()) => Dispatched::System,
                Err(error) => self.reject(ctx, error),
            };
        }

        let Some(queue) = self.table.lookup(event) else {
            return self.reject(ctx, RequestError::UnknownRequest);
        };

        let size = queue.len();
        match self.policy.assess(size) {
            Admission::Busy => return self.reject_busy(ctx, &queue, size),
            Admission::Warn => warn!(
                target: DISPATCH_TARGET,
                queue = queue.name(),
                size,
                threshold = self.policy.warning,
                "queue is backing up"
            ),
            Admission::Accept => {}
        }

        let entry = match QueueEntry::new(ctx, event, tree) {
            Ok(entry) => entry,
            Err(error) => {
                warn!(
                    target: DISPATCH_TARGET,
                    queue = queue.name(),
                    error = %error,
                    "failed to allocate queue entry"
                );
                return self.reject(ctx, RequestError::OutOfMemory);
            }
        };

        let inserted = {
            let mut guard = queue.lock();
            if ctx.is_sync() {
                guard.push_replace(entry).map(|displaced| match displaced {
                    Some(_) => Dispatched::Replaced,
                    None => Dispatched::Queued,
                })
            } else {
                guard.push(entry).map(|()| Dispatched::Queued)
            }
        };
        queue.signal();

        match inserted {
            Ok(outcome) => outcome,
            Err(QueueFull { capacity, .. }) => {
                debug!(
                    target: DISPATCH_TARGET,
                    queue = queue.name(),
                    capacity,
                    "queue at capacity"
                );
                self.reject_busy(ctx, &queue, capacity)
            }
        }
    }

    fn reject_busy(
        &self,
        ctx: &RequestContext,
        queue: &NamedQueue<QueueEntry>,
        size: usize,
    ) -> Dispatched {
        let previous = self.stats.record_error(RequestError::Busy);
        if self.policy.reports(previous) {
            warn!(
                target: DISPATCH_TARGET,
                queue = queue.name(),
                size,
                threshold = self.policy.busy,
                refused = previous + 1,
                "queue busy, refusing requests"
            );
        }
        self.reply_error(ctx, RequestError::Busy);
        Dispatched::Rejected(RequestError::Busy)
    }

    pub(crate) fn reject(&self, ctx: &RequestContext, error: RequestError) -> Dispatched {
        self.stats.record_error(error);
        self.reply_error(ctx, error);
        Dispatched::Rejected(error)
    }

    fn reply_error(&self, ctx: &RequestContext, error: RequestError) {
        if !ctx.is_sync() {
            return;
        }
        if let Err(reply_error) = ctx.reply_error(error.code()) {
            debug!(
                target: DISPATCH_TARGET,
                connection = %ctx.connection(),
                id = %ctx.id(),
                error = %reply_error,
                "error reply not delivered"
            );
        }
    }
}
