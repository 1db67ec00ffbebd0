//! Named, lockable FIFO queues shared between the request reactor and the
//! workers that consume events.
//!
//! A [`NamedQueue`] is the only structure the reactor shares with workers.
//! Producers take the queue lock through [`NamedQueue::lock`], insert, drop the
//! guard, and then call [`NamedQueue::signal`] so that the insert is visible
//! before a consumer wakes. Consumers own every entry they pop.
//!
//! The [`DispatchTable`] trait is the lookup seam the dispatcher uses to map an
//! event name to its queue; [`QueueRegistry`] is the in-process
//! implementation.

mod error;
mod queue;
mod registry;

pub use error::{QueueError, QueueFull};
pub use queue::{NamedQueue, QueueGuard, Supersedes};
pub use registry::{DispatchTable, QueueRegistry};
