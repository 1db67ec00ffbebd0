//! Errors raised by queue and registry operations.

use std::fmt;

use thiserror::Error;

/// Errors arising from queue registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// A queue with the same name is already registered.
    #[error("queue '{name}' is already registered")]
    Duplicate {
        /// Name that was registered twice.
        name: String,
    },
    /// Queue names must not be empty.
    #[error("queue names must not be empty")]
    EmptyName,
}

/// Returned when an append would exceed a queue's hard capacity.
///
/// The rejected entry is handed back so the caller decides how to drop it.
#[derive(Error)]
#[error("queue '{queue}' is full at {capacity} entries")]
pub struct QueueFull<E> {
    /// Queue that refused the entry.
    pub queue: String,
    /// Configured capacity.
    pub capacity: usize,
    /// Entry that was not inserted.
    pub entry: E,
}

impl<E> fmt::Debug for QueueFull<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueFull")
            .field("queue", &self.queue)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
