//! Event-name to queue lookup.
//!
//! The dispatcher only sees the [`DispatchTable`] trait; [`QueueRegistry`]
//! keeps queues in memory and may gain queues while the reactor is running.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::error::QueueError;
use crate::queue::NamedQueue;

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// Maps an event name to the queue that serves it.
pub trait DispatchTable<E>: Send + Sync {
    /// Looks up the queue for `event`. Names that are not valid UTF-8 have
    /// no queue.
    fn lookup(&self, event: &[u8]) -> Option<Arc<NamedQueue<E>>>;
}

/// In-memory [`DispatchTable`].
pub struct QueueRegistry<E> {
    queues: RwLock<HashMap<String, Arc<NamedQueue<E>>>>,
}

impl<E> QueueRegistry<E> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a queue under its own name.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::EmptyName`] for an unnamed queue and
    /// [`QueueError::Duplicate`] when the name is taken.
    pub fn register(&self, queue: NamedQueue<E>) -> Result<Arc<NamedQueue<E>>, QueueError> {
        let name = queue.name().to_owned();
        if name.is_empty() {
            return Err(QueueError::EmptyName);
        }
        let mut queues = self.write();
        if queues.contains_key(&name) {
            return Err(QueueError::Duplicate { name });
        }
        let queue = Arc::new(queue);
        queues.insert(name, Arc::clone(&queue));
        debug!(
            target: REGISTRY_TARGET,
            queue = queue.name(),
            capacity = ?queue.capacity(),
            "queue registered"
        );
        Ok(queue)
    }

    /// Removes a queue. Entries already queued stay with the returned queue.
    pub fn unregister(&self, name: &str) -> Option<Arc<NamedQueue<E>>> {
        let removed = self.write().remove(name);
        if removed.is_some() {
            debug!(target: REGISTRY_TARGET, queue = name, "queue unregistered");
        }
        removed
    }

    /// Looks up a queue by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<NamedQueue<E>>> {
        self.read().get(name).cloned()
    }

    /// Registered queue names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered queues.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` when no queues are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<NamedQueue<E>>>> {
        self.queues
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<NamedQueue<E>>>> {
        self.queues
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl<E> Default for QueueRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for QueueRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueRegistry")
            .field("queues", &self.names())
            .finish()
    }
}

impl<E> DispatchTable<E> for QueueRegistry<E>
where
    E: Send,
{
    fn lookup(&self, event: &[u8]) -> Option<Arc<NamedQueue<E>>> {
        let name = std::str::from_utf8(event).ok()?;
        self.get(name)
    }
}
