//! Per-connection frame reassembly.
//!
//! Fresh reads land in the reactor's scratch buffer and are split into
//! frames in place. When a read ends mid-frame the leftover is copied into an
//! accumulation buffer owned by the connection, and later reads go straight
//! into that buffer, never past the end of the frame being assembled.

use std::time::{Duration, Instant};

use quay_wire::{LENGTH_PREFIX_LEN, MAX_FRAME_LEN, WireError, check_frame_len, peek_frame_len};

/// What the reactor should do with the connection after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Keep reading.
    Continue,
    /// Close the connection.
    Close,
}

#[derive(Debug, Default)]
pub(crate) struct Reassembly {
    partial: Option<Box<[u8]>>,
    received: usize,
    expected: usize,
    last_progress: Option<Instant>,
}

impl Reassembly {
    pub(crate) const fn is_partial(&self) -> bool {
        self.partial.is_some()
    }

    /// Bytes of the current frame still missing.
    pub(crate) const fn missing(&self) -> usize {
        self.expected.saturating_sub(self.received)
    }

    /// Region of the accumulation buffer the next read should fill.
    pub(crate) fn pending_buffer(&mut self) -> Option<&mut [u8]> {
        let (received, expected) = (self.received, self.expected);
        self.partial.as_deref_mut()?.get_mut(received..expected)
    }

    /// Whether a partial frame has made no progress for `timeout`.
    pub(crate) fn stalled(&self, now: Instant, timeout: Duration) -> bool {
        self.last_progress
            .is_some_and(|since| self.is_partial() && now.saturating_duration_since(since) >= timeout)
    }

    /// Processes `len` bytes just read into [`Reassembly::pending_buffer`].
    pub(crate) fn feed_pending<F>(&mut self, len: usize, sink: F) -> Result<Verdict, WireError>
    where
        F: FnMut(&[u8]) -> Verdict,
    {
        let Some(buffer) = self.partial.take() else {
            return Ok(Verdict::Continue);
        };
        self.received = self.received.saturating_add(len).min(self.expected);
        let available = buffer.get(..self.received).unwrap_or_default();
        let expected = frame_len(available)?;
        if available.len() < expected {
            self.expected = expected;
            self.last_progress = Some(Instant::now());
            self.partial = Some(buffer);
            return Ok(Verdict::Continue);
        }
        self.clear();
        Ok(deliver(available, sink))
    }

    /// Processes `bytes` freshly read into the scratch buffer. Any number of
    /// back-to-back frames is handled; a trailing fragment is kept.
    pub(crate) fn feed_scratch<F>(&mut self, bytes: &[u8], mut sink: F) -> Result<Verdict, WireError>
    where
        F: FnMut(&[u8]) -> Verdict,
    {
        let mut rest = bytes;
        while !rest.is_empty() {
            let expected = frame_len(rest)?;
            if rest.len() < expected {
                self.stash(rest, expected);
                break;
            }
            let (frame, tail) = rest.split_at(expected);
            if deliver(frame, &mut sink) == Verdict::Close {
                return Ok(Verdict::Close);
            }
            rest = tail;
        }
        Ok(Verdict::Continue)
    }

    fn stash(&mut self, bytes: &[u8], expected: usize) {
        let mut buffer = vec![0_u8; MAX_FRAME_LEN].into_boxed_slice();
        if let Some(head) = buffer.get_mut(..bytes.len()) {
            head.copy_from_slice(bytes);
        }
        self.partial = Some(buffer);
        self.received = bytes.len();
        self.expected = expected;
        self.last_progress = Some(Instant::now());
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Total size of the frame at the front of `bytes`; the prefix size while the
/// prefix itself is incomplete.
fn frame_len(bytes: &[u8]) -> Result<usize, WireError> {
    peek_frame_len(bytes).map_or(Ok(LENGTH_PREFIX_LEN), check_frame_len)
}

fn deliver<F>(frame: &[u8], mut sink: F) -> Verdict
where
    F: FnMut(&[u8]) -> Verdict,
{
    sink(frame.get(LENGTH_PREFIX_LEN..).unwrap_or_default())
}
