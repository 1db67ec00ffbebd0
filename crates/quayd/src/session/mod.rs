//! Registry of logged-in users and the connections they hold.
//!
//! A session keeps one counted reference to its connection, so the
//! connection outlives the request that created the session. When the
//! transport dies the registry evicts the session and gives the reference
//! back, letting the connection reach zero and close.
//!
//! Each record is retired at most once, whichever of quit, destroy,
//! disconnect or teardown gets there first; its destructor runs then.


use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use thiserror::Error;
use tracing::debug;

use crate::request::RequestContext;
use crate::socket::{CloseHook, ConnectionId, SendError, SocketHandle, SocketRef};

const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

type DestructorFn = Box<dyn FnOnce(&SessionRecord) + Send>;
type Attachment = Box<dyn Any + Send + Sync>;

/// Errors raised by [`SessionRegistry::join`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    /// The user id was empty.
    #[error("user id must not be empty")]
    MissingUserId,
    /// The requesting connection has already gone.
    #[error("connection {connection} is closed")]
    SocketClosed {
        /// Connection the join came from.
        connection: ConnectionId,
    },
}

/// Optional extras for a new session.
#[derive(Default)]
pub struct JoinOptions {
    attachment: Option<Attachment>,
    destructor: Option<DestructorFn>,
}

impl JoinOptions {
    /// Adopts caller data, retrievable through [`SessionRecord::attachment`].
    #[must_use]
    pub fn with_attachment<T>(mut self, attachment: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.attachment = Some(Box::new(attachment));
        self
    }

    /// Runs `destructor` when the session is retired instead of the default
    /// log line.
    #[must_use]
    pub fn with_destructor<F>(mut self, destructor: F) -> Self
    where
        F: FnOnce(&SessionRecord) + Send + 'static,
    {
        self.destructor = Some(Box::new(destructor));
        self
    }
}

impl fmt::Debug for JoinOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinOptions")
            .field("attachment", &self.attachment.is_some())
            .field("destructor", &self.destructor.is_some())
            .finish()
    }
}

enum Destructor {
    Default,
    Custom(DestructorFn),
}

/// One logged-in user.
pub struct SessionRecord {
    user_id: String,
    ip: IpAddr,
    port: u16,
    connection: ConnectionId,
    link: SocketRef,
    socket: Mutex<Option<SocketHandle>>,
    attachment: Option<Attachment>,
    destructor: Mutex<Option<Destructor>>,
}

impl SessionRecord {
    /// User id the session was registered under.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Peer address at join time.
    #[must_use]
    pub const fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Peer port at join time.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Connection holding the session.
    #[must_use]
    pub const fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Link to the session's connection.
    #[must_use]
    pub const fn socket(&self) -> &SocketRef {
        &self.link
    }

    /// Caller data adopted at join time, if it has type `T`.
    #[must_use]
    pub fn attachment<T: Any>(&self) -> Option<&T> {
        self.attachment.as_deref()?.downcast_ref()
    }

    /// Whether the session still holds its connection reference.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.socket_slot().is_some()
    }

    /// Writes a frame to the session's connection.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] when the connection is gone or the write fails.
    pub fn send(&self, frame: &[u8]) -> Result<(), SendError> {
        self.link.send_all(frame)
    }

    fn socket_slot(&self) -> MutexGuard<'_, Option<SocketHandle>> {
        self.socket
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    /// Runs the destructor once, then gives the connection reference back.
    fn finish(&self) {
        let destructor = self
            .destructor
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
        match destructor {
            Some(Destructor::Custom(callback)) => callback(self),
            Some(Destructor::Default) => debug!(
                target: SESSION_TARGET,
                user = %self.user_id,
                connection = %self.connection,
                "session ended"
            ),
            None => {}
        }
        let socket = self.socket_slot().take();
        drop(socket);
    }
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("user_id", &self.user_id)
            .field("ip", &self.ip)
            .field("port", &self.port)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryState {
    records: HashMap<String, Arc<SessionRecord>>,
    members: usize,
}

impl RegistryState {
    fn remove_if_current(&mut self, record: &Arc<SessionRecord>) -> bool {
        let current = self
            .records
            .get(&record.user_id)
            .is_some_and(|registered| Arc::ptr_eq(registered, record));
        if current {
            self.records.remove(&record.user_id);
            self.members = self.members.saturating_sub(1);
        }
        current
    }
}

#[derive(Default)]
struct RegistryInner {
    state: Mutex<RegistryState>,
}

impl RegistryInner {
    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Users currently logged in, keyed by user id. Clones share the registry.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks a user up.
    #[must_use]
    pub fn find(&self, user_id: &str) -> Option<Arc<SessionRecord>> {
        self.inner.state().records.get(user_id).cloned()
    }

    /// Number of registered users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state().members
    }

    /// Whether nobody is logged in.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers `user_id` on the connection `ctx` arrived on.
    ///
    /// Joining a user who is already registered returns the existing record
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::MissingUserId`] for an empty id and
    /// [`JoinError::SocketClosed`] when the connection has gone.
    pub fn join(
        &self,
        user_id: &str,
        ctx: &RequestContext,
        options: JoinOptions,
    ) -> Result<Arc<SessionRecord>, JoinError> {
        if user_id.is_empty() {
            return Err(JoinError::MissingUserId);
        }
        let closed = || JoinError::SocketClosed {
            connection: ctx.connection(),
        };
        let socket = ctx.socket().acquire().ok_or_else(closed)?;
        if socket.is_closed() {
            return Err(closed());
        }

        let mut spare = Some(socket);
        let (record, created) = {
            let mut state = self.inner.state();
            match state.records.get(user_id) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let record = Arc::new(SessionRecord {
                        user_id: user_id.to_owned(),
                        ip: ctx.peer().ip(),
                        port: ctx.peer().port(),
                        connection: ctx.connection(),
                        link: ctx.socket().clone(),
                        socket: Mutex::new(spare.take()),
                        attachment: options.attachment,
                        destructor: Mutex::new(Some(
                            options
                                .destructor
                                .map_or(Destructor::Default, Destructor::Custom),
                        )),
                    });
                    state
                        .records
                        .insert(user_id.to_owned(), Arc::clone(&record));
                    state.members += 1;
                    (record, true)
                }
            }
        };
        drop(spare);

        if created {
            debug!(
                target: SESSION_TARGET,
                user = user_id,
                connection = %record.connection,
                peer = %ctx.peer(),
                "session joined"
            );
            self.watch(&record);
        }
        Ok(record)
    }

    fn watch(&self, record: &SessionRecord) {
        record
            .link
            .set_close_hook(CloseHook::custom(self.evictor(&record.user_id)));
        record.link.watch_disconnect(self.evictor(&record.user_id));
    }

    fn evictor(&self, user_id: &str) -> impl FnOnce(ConnectionId) + Send + 'static {
        let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let user_id = user_id.to_owned();
        move |connection| {
            if let Some(inner) = registry.upgrade() {
                Self { inner }.evict(&user_id, connection);
            }
        }
    }

    /// Logs `user_id` out.
    ///
    /// When `ctx` is given, only a request from the session's own connection
    /// may end it. Returns whether a session was retired.
    pub fn quit(&self, user_id: &str, ctx: Option<&RequestContext>) -> bool {
        let record = {
            let mut state = self.inner.state();
            let Some(record) = state.records.get(user_id).cloned() else {
                return false;
            };
            if let Some(ctx) = ctx
                && ctx.connection() != record.connection
            {
                debug!(
                    target: SESSION_TARGET,
                    user = user_id,
                    owner = %record.connection,
                    requester = %ctx.connection(),
                    "quit refused from foreign connection"
                );
                return false;
            }
            state.remove_if_current(&record);
            record
        };
        record.finish();
        true
    }

    /// Retires `record`: unregisters it if it is still the current session
    /// for its user, then runs its destructor and releases its connection.
    /// Repeated calls do nothing.
    pub fn destroy(&self, record: &Arc<SessionRecord>) {
        self.inner.state().remove_if_current(record);
        record.finish();
    }

    /// Retires the session of `user_id` if it lives on `connection`.
    pub fn evict(&self, user_id: &str, connection: ConnectionId) -> bool {
        let record = {
            let mut state = self.inner.state();
            let Some(record) = state
                .records
                .get(user_id)
                .filter(|record| record.connection == connection)
                .cloned()
            else {
                return false;
            };
            state.remove_if_current(&record);
            record
        };
        debug!(
            target: SESSION_TARGET,
            user = user_id,
            connection = %connection,
            "session evicted after disconnect"
        );
        record.finish();
        true
    }

    /// Retires every session and returns how many there were.
    pub fn teardown(&self) -> usize {
        let records: Vec<_> = {
            let mut state = self.inner.state();
            state.members = 0;
            state.records.drain().map(|(_, record)| record).collect()
        };
        for record in &records {
            record.finish();
        }
        records.len()
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("members", &self.len())
            .finish()
    }
}
