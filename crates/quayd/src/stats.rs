//! Server-wide counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::dispatch::RequestError;
use crate::request::TransportKind;

/// Monotonic counters shared by the reactor and the dispatcher.
#[derive(Debug, Default)]
pub struct Stats {
    msg_tcp: AtomicU64,
    msg_udp: AtomicU64,
    msg_sctp: AtomicU64,
    msg_tipc: AtomicU64,
    version_mismatch: AtomicU64,
    broken_request: AtomicU64,
    unknown_request: AtomicU64,
    busy: AtomicU64,
    alloc_failure: AtomicU64,
    send_failure: AtomicU64,
}

/// Point-in-time copy of [`Stats`], serialised for the status query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Frames received over TCP.
    pub msg_tcp: u64,
    /// Frames received over UDP.
    pub msg_udp: u64,
    /// Frames received over SCTP.
    pub msg_sctp: u64,
    /// Frames received over TIPC.
    pub msg_tipc: u64,
    /// Requests with an unsupported protocol version.
    pub net_version_mismatch: u64,
    /// Requests that could not be decoded.
    pub net_broken_req: u64,
    /// Requests for events nobody serves.
    pub net_unknown_req: u64,
    /// Requests refused because a queue was over its limit.
    pub proc_busy: u64,
    /// Requests dropped because an allocation failed.
    pub proc_alloc_failure: u64,
    /// Replies that could not be written.
    pub net_send_failure: u64,
}

impl Stats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one complete frame on `transport`.
    pub fn record_message(&self, transport: TransportKind) {
        let counter = match transport {
            TransportKind::Tcp => &self.msg_tcp,
            TransportKind::Udp => &self.msg_udp,
            TransportKind::Sctp => &self.msg_sctp,
            TransportKind::Tipc => &self.msg_tipc,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one rejected request and returns the previous count for that
    /// kind.
    pub fn record_error(&self, error: RequestError) -> u64 {
        let counter = match error {
            RequestError::Malformed => &self.broken_request,
            RequestError::VersionMismatch => &self.version_mismatch,
            RequestError::UnknownRequest => &self.unknown_request,
            RequestError::Busy => &self.busy,
            RequestError::OutOfMemory => &self.alloc_failure,
            RequestError::IoFailure => &self.send_failure,
        };
        counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Reads every counter.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        self.collect(|counter| counter.load(Ordering::Relaxed))
    }

    /// Reads and zeroes every counter.
    pub fn reset(&self) -> StatsSnapshot {
        self.collect(|counter| counter.swap(0, Ordering::Relaxed))
    }

    fn collect(&self, read: impl Fn(&AtomicU64) -> u64) -> StatsSnapshot {
        StatsSnapshot {
            msg_tcp: read(&self.msg_tcp),
            msg_udp: read(&self.msg_udp),
            msg_sctp: read(&self.msg_sctp),
            msg_tipc: read(&self.msg_tipc),
            net_version_mismatch: read(&self.version_mismatch),
            net_broken_req: read(&self.broken_request),
            net_unknown_req: read(&self.unknown_request),
            proc_busy: read(&self.busy),
            proc_alloc_failure: read(&self.alloc_failure),
            net_send_failure: read(&self.send_failure),
        }
    }
}
