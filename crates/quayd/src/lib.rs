//! The quay server.
//!
//! Clients speak a length-prefixed big-endian binary protocol over TCP. A
//! single reactor thread accepts connections, reassembles frames that arrive
//! split or pipelined, parses them and hands each request to the dispatcher.
//! The dispatcher routes a request by event name onto a named queue, refusing
//! it as busy when the queue is over its admission limit; the
//! `_Reserve.Status` and `_Reserve.Clientmod` queries are answered inline.
//! Embedders register the queues and
//! drain them on worker threads of their own, replying through the
//! [`RequestContext`] carried by every [`QueueEntry`].
//!
//! Connections are reference counted. The reactor holds one reference per
//! connection and the [`SessionRegistry`] holds another for every logged-in
//! user, so a connection stays open for server pushes until both let go.
//!
//! ```no_run
//! use quay_config::Config;
//! use quay_queue::NamedQueue;
//! use quayd::Server;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Server::new(Config::default());
//! let orders = server.register_queue(NamedQueue::new("orders"))?;
//! let running = server.start()?;
//! while let Some(entry) = orders.pop_timeout(std::time::Duration::from_secs(1)) {
//!     let (request, payload) = entry.into_parts();
//!     let _ = request.reply_payload(quay_wire::ReplyCode::OK, &payload, server.codec().as_ref());
//! }
//! running.shutdown()?;
//! # Ok(())
//! # }
//! ```

mod bootstrap;
mod dispatch;
mod health;
mod outbound;
mod process;
mod reactor;
mod request;
mod server;
mod session;
mod socket;
mod stats;
mod telemetry;

pub use bootstrap::{
    BootstrapError, ConfigLoader, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use dispatch::{
    AdmissionPolicy, CLIENT_MODULES_EVENT, Dispatched, Dispatcher, QueueEntry, QueueTable,
    RequestError, STATUS_EVENT, SystemCommands, is_reserved,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use outbound::{Outbound, OutboundError, RESERVED_KEY};
pub use process::{
    LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_server, run_server_with,
};
pub use reactor::{ListenerError, Reactor, ReactorHandle, ReactorOptions, RequestPipeline};
pub use request::{ReplyError, RequestContext, TransportKind};
pub use server::{RunningServer, Server};
pub use session::{JoinError, JoinOptions, SessionRecord, SessionRegistry};
pub use socket::{CloseHook, ConnectionId, SendError, SocketHandle, SocketRef};
pub use stats::{Stats, StatsSnapshot};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
