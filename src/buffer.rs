//! Append-only byte buffer shared between one producer and many consumers.

use std::sync::{Condvar, Mutex};

use thiserror::Error;

/// State of a [`MessageBuffer`] as observed by a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// The producer may still append more bytes.
    Producing,
    /// The producer finished normally; the buffer is immutable.
    Complete,
    /// The producer aborted; the buffer is immutable and carries a reason.
    Error(FailReason),
}

/// Why a [`MessageBuffer`] was failed instead of finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// The upstream connection or parse failed.
    UpstreamFailure,
    /// The client disconnected before the producer finished.
    ClientDisconnect,
}

/// Errors returned by [`MessageBuffer`] mutators.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    /// `append` was called after `finalize`/`fail` already ran.
    #[error("message buffer already finalized")]
    AlreadyFinalized,
}

struct Inner {
    bytes: Vec<u8>,
    complete: bool,
    error: Option<FailReason>,
}

impl Inner {
    fn state(&self) -> BufferState {
        if let Some(reason) = self.error {
            BufferState::Error(reason)
        } else if self.complete {
            BufferState::Complete
        } else {
            BufferState::Producing
        }
    }

    fn finalized(&self) -> bool {
        self.complete || self.error.is_some()
    }
}

/// A growable byte buffer representing one pending-or-complete HTTP message.
///
/// Exactly one producer drives `append`/`finalize`/`fail`. Any number of
/// consumers call `read_from` to follow along, waiting on the internal
/// condition variable whenever they have caught up to the producer.
pub struct MessageBuffer {
    inner: Mutex<Inner>,
    ready: Condvar,
}

impl MessageBuffer {
    /// Creates a new, empty buffer in the `Producing` state.
    pub fn new() -> Self {
        MessageBuffer {
            inner: Mutex::new(Inner {
                bytes: Vec::new(),
                complete: false,
                error: None,
            }),
            ready: Condvar::new(),
        }
    }

    /// Appends `bytes` to the buffer and wakes every waiting consumer.
    ///
    /// Producer-only. Fails with [`BufferError::AlreadyFinalized`] if the
    /// buffer has already been completed or failed.
    pub fn append(&self, bytes: &[u8]) -> Result<(), BufferError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.finalized() {
            return Err(BufferError::AlreadyFinalized);
        }
        inner.bytes.extend_from_slice(bytes);
        self.ready.notify_all();
        Ok(())
    }

    /// Marks the buffer complete. Idempotent; a second call is a no-op.
    pub fn finalize(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.finalized() {
            return;
        }
        inner.complete = true;
        self.ready.notify_all();
    }

    /// Marks the buffer failed with `reason`. Idempotent; a second call
    /// (whether `fail` or `finalize`) is a no-op.
    pub fn fail(&self, reason: FailReason) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.finalized() {
            return;
        }
        inner.error = Some(reason);
        self.ready.notify_all();
    }

    /// Returns the bytes available from `offset` onward together with the
    /// current state.
    ///
    /// If `offset` has already caught up to the current length and the
    /// buffer is still `Producing`, this call blocks on the internal
    /// condition variable until more bytes arrive or the producer finishes.
    pub fn read_from(&self, offset: usize) -> (Vec<u8>, BufferState) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if offset < inner.bytes.len() || inner.finalized() {
                let chunk = inner.bytes[offset.min(inner.bytes.len())..].to_vec();
                return (chunk, inner.state());
            }
            inner = self.ready.wait(inner).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Current number of bytes appended so far, regardless of state.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).bytes.len()
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}
