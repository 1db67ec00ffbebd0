use std::collections::TryReserveError;

use quay_queue::Supersedes;
use quay_wire::Payload;

use crate::request::RequestContext;

/// Unit of work handed to a queue consumer.
///
/// The entry owns its payload and a copy of the request context; it keeps
/// no counted reference to the connection, so a reply to a connection that
/// closed in the meantime fails cleanly instead of keeping it open.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    operation: u16,
    event: Option<String>,
    payload: Payload,
    request: RequestContext,
}

impl QueueEntry {
    /// Builds an entry, copying the event name with a fallible allocation.
    ///
    /// # Errors
    ///
    /// Returns the allocator error when the name cannot be copied.
    pub fn new(
        request: &RequestContext,
        event: &[u8],
        payload: Payload,
    ) -> Result<Self, TryReserveError> {
        Ok(Self {
            operation: request.command(),
            event: copy_event_name(event)?,
            payload,
            request: request.clone(),
        })
    }

    /// Command code of the request.
    #[must_use]
    pub const fn operation(&self) -> u16 {
        self.operation
    }

    /// Event name, absent when the request carried an empty one.
    #[must_use]
    pub fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }

    /// Decoded payload.
    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Request the entry answers.
    #[must_use]
    pub const fn request(&self) -> &RequestContext {
        &self.request
    }

    /// Splits the entry into its request context and payload.
    #[must_use]
    pub fn into_parts(self) -> (RequestContext, Payload) {
        (self.request, self.payload)
    }
}

impl Supersedes for QueueEntry {
    fn supersedes(&self, queued: &Self) -> bool {
        self.request.is_sync()
            && queued.request.connection() == self.request.connection()
            && queued.operation == self.operation
            && queued.event == self.event
    }
}

fn copy_event_name(event: &[u8]) -> Result<Option<String>, TryReserveError> {
    if event.is_empty() {
        return Ok(None);
    }
    let text = String::from_utf8_lossy(event);
    let mut name = String::new();
    name.try_reserve_exact(text.len())?;
    name.push_str(&text);
    Ok(Some(name))
}
