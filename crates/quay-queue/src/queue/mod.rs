//! Lockable FIFO with consumer signalling.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::QueueFull;

/// Decides whether a new entry takes the place of one still queued.
///
/// Used by [`QueueGuard::push_replace`] for synchronous requests: a client
/// waiting on a reply only needs the newest of its equivalent requests.
pub trait Supersedes {
    /// Returns `true` when `self` should replace `queued`.
    fn supersedes(&self, queued: &Self) -> bool;
}

/// Named FIFO shared by one producer side and any number of consumers.
pub struct NamedQueue<E> {
    name: String,
    capacity: Option<usize>,
    entries: Mutex<VecDeque<E>>,
    ready: Condvar,
}

impl<E> NamedQueue<E> {
    /// Creates an unbounded queue.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: None,
            entries: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    /// Creates a queue that refuses appends beyond `capacity` entries.
    #[must_use]
    pub fn bounded(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new(name)
        }
    }

    /// Queue name, which is also the event name it serves.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hard capacity, if any.
    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Current number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Returns `true` when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Takes the queue lock for inserting.
    ///
    /// Callers drop the guard and then call [`Self::signal`].
    #[must_use]
    pub fn lock(&self) -> QueueGuard<'_, E> {
        QueueGuard {
            queue: self,
            entries: self.entries(),
        }
    }

    /// Wakes one waiting consumer.
    pub fn signal(&self) {
        self.ready.notify_one();
    }

    /// Wakes every waiting consumer, typically during shutdown.
    pub fn signal_all(&self) {
        self.ready.notify_all();
    }

    /// Pops the oldest entry without waiting.
    #[must_use]
    pub fn try_pop(&self) -> Option<E> {
        self.entries().pop_front()
    }

    /// Pops the oldest entry, waiting up to `timeout` for one to arrive.
    #[must_use]
    pub fn pop_timeout(&self, timeout: Duration) -> Option<E> {
        let deadline = Instant::now() + timeout;
        let mut entries = self.entries();
        loop {
            if let Some(entry) = entries.pop_front() {
                return Some(entry);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            entries = match self.ready.wait_timeout(entries, remaining) {
                Ok((guard, _)) => guard,
                Err(poison) => poison.into_inner().0,
            };
        }
    }

    /// Removes and returns every queued entry.
    #[must_use]
    pub fn drain(&self) -> Vec<E> {
        self.entries().drain(..).collect()
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<E>> {
        self.entries
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl<E> fmt::Debug for NamedQueue<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedQueue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// Exclusive access to a queue's entries.
pub struct QueueGuard<'a, E> {
    queue: &'a NamedQueue<E>,
    entries: MutexGuard<'a, VecDeque<E>>,
}

impl<E> QueueGuard<'_, E> {
    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends an entry.
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] carrying the entry when the queue is at capacity.
    pub fn push(&mut self, entry: E) -> Result<(), QueueFull<E>> {
        if let Some(capacity) = self.queue.capacity
            && self.entries.len() >= capacity
        {
            return Err(QueueFull {
                queue: self.queue.name.clone(),
                capacity,
                entry,
            });
        }
        self.entries.push_back(entry);
        Ok(())
    }

    /// Replaces the first queued entry that `entry` supersedes, keeping its
    /// position, or appends when there is none.
    ///
    /// Returns the displaced entry.
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] when an append is needed and the queue is at
    /// capacity.
    pub fn push_replace(&mut self, entry: E) -> Result<Option<E>, QueueFull<E>>
    where
        E: Supersedes,
    {
        match self
            .entries
            .iter_mut()
            .find(|queued| entry.supersedes(queued))
        {
            Some(slot) => Ok(Some(std::mem::replace(slot, entry))),
            None => self.push(entry).map(|()| None),
        }
    }
}
