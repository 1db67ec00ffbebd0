//! Embedding surface: one server instance and its shared collaborators.

use std::net::SocketAddr;
use std::sync::Arc;

use quay_config::Config;
use quay_queue::{NamedQueue, QueueError, QueueRegistry};
use quay_wire::{JsonCodec, Payload, PayloadCodec};
use tracing::{debug, info};

use crate::dispatch::{AdmissionPolicy, Dispatcher, QueueEntry, QueueTable, SystemCommands};
use crate::outbound::{Outbound, OutboundError};
use crate::reactor::{ListenerError, Reactor, ReactorHandle, ReactorOptions, RequestPipeline};
use crate::session::SessionRegistry;
use crate::stats::Stats;

const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");

/// A configured server. Register queues, then [`Server::start`] it.
///
/// Embedders consume [`QueueEntry`] values from the queues they register, on
/// threads of their own, and use the session registry and outbound messenger
/// to track users and push to them.
pub struct Server {
    config: Config,
    queues: Arc<QueueRegistry<QueueEntry>>,
    sessions: SessionRegistry,
    stats: Arc<Stats>,
    codec: Arc<dyn PayloadCodec>,
    outbound: Outbound,
}

impl Server {
    /// Builds a server that speaks JSON payloads.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_codec(config, Arc::new(JsonCodec::default()))
    }

    /// Builds a server with a custom payload codec.
    #[must_use]
    pub fn with_codec(config: Config, codec: Arc<dyn PayloadCodec>) -> Self {
        Self {
            config,
            queues: Arc::new(QueueRegistry::new()),
            sessions: SessionRegistry::new(),
            stats: Arc::new(Stats::new()),
            outbound: Outbound::new(Arc::clone(&codec)),
            codec,
        }
    }

    /// Resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Registers a queue serving the event of the same name.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] when the name is empty or already taken.
    pub fn register_queue(
        &self,
        queue: NamedQueue<QueueEntry>,
    ) -> Result<Arc<NamedQueue<QueueEntry>>, QueueError> {
        let queue = self.queues.register(queue)?;
        debug!(
            target: SERVER_TARGET,
            queue = queue.name(),
            "queue registered"
        );
        Ok(queue)
    }

    /// Registered queues.
    #[must_use]
    pub const fn queues(&self) -> &Arc<QueueRegistry<QueueEntry>> {
        &self.queues
    }

    /// Logged-in users.
    #[must_use]
    pub const fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Server counters.
    #[must_use]
    pub const fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Payload codec shared by replies and pushes.
    #[must_use]
    pub const fn codec(&self) -> &Arc<dyn PayloadCodec> {
        &self.codec
    }

    /// Push messenger.
    #[must_use]
    pub const fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    /// Builds a dispatcher over the registered queues.
    #[must_use]
    pub fn dispatcher(&self) -> Dispatcher {
        let table: Arc<QueueTable> = self.queues.clone();
        Dispatcher::new(
            table,
            Arc::clone(&self.codec),
            Arc::clone(&self.stats),
            AdmissionPolicy::from_config(&self.config),
            SystemCommands::new(self.config.client_modules().to_vec()),
        )
    }

    /// Binds the configured listen address.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the address cannot be bound.
    pub fn bind(&self) -> Result<Reactor, ListenerError> {
        Reactor::bind(
            self.config.listen_host(),
            self.config.listen_port(),
            RequestPipeline::new(Arc::new(self.dispatcher())),
            ReactorOptions::from_config(&self.config),
        )
    }

    /// Binds and starts the reactor thread.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when binding or spawning fails.
    pub fn start(&self) -> Result<RunningServer, ListenerError> {
        let reactor = self.bind()?.start()?;
        info!(
            target: SERVER_TARGET,
            address = %reactor.local_addr(),
            queues = ?self.queues.names(),
            "server started"
        );
        Ok(RunningServer {
            reactor,
            sessions: self.sessions.clone(),
        })
    }

    /// Pushes `tree` to the connection `user_id` is logged in on.
    ///
    /// # Errors
    ///
    /// Returns [`OutboundError::UnknownUser`] when nobody is logged in under
    /// that id, otherwise as [`Outbound::push`].
    pub fn push_to_user(
        &self,
        user_id: &str,
        command: &str,
        tree: Payload,
    ) -> Result<(), OutboundError> {
        let record = self
            .sessions
            .find(user_id)
            .ok_or_else(|| OutboundError::UnknownUser {
                user_id: user_id.to_owned(),
            })?;
        self.outbound.push(record.socket(), command, tree)
    }

    /// Shuts down the connection `user_id` is logged in on. The reactor then
    /// sees end-of-stream and the session is evicted. Returns whether a live
    /// connection was found.
    pub fn disconnect_user(&self, user_id: &str) -> bool {
        let Some(socket) = self
            .sessions
            .find(user_id)
            .and_then(|record| record.socket().acquire())
        else {
            return false;
        };
        if let Err(error) = socket.shutdown() {
            debug!(
                target: SERVER_TARGET,
                user = user_id,
                connection = %socket.id(),
                error = %error,
                "forced disconnect failed"
            );
            return false;
        }
        true
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("queues", &self.queues)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

/// A server whose reactor is running.
#[derive(Debug)]
pub struct RunningServer {
    reactor: ReactorHandle,
    sessions: SessionRegistry,
}

impl RunningServer {
    /// Address the reactor listens on.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.reactor.local_addr()
    }

    /// Retires every session while its connection is still open, then stops
    /// the reactor and waits for it. Returns the number of sessions retired.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ThreadPanic`] when the reactor thread
    /// panicked.
    pub fn shutdown(self) -> Result<usize, ListenerError> {
        let Self { reactor, sessions } = self;
        let retired = sessions.teardown();
        reactor.shutdown();
        let joined = reactor.join();
        info!(
            target: SERVER_TARGET,
            sessions = retired,
            "server stopped"
        );
        joined.map(|()| retired)
    }
}
