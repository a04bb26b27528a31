//! A single keyed slot in the [`crate::cache::Cache`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::buffer::MessageBuffer;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A fingerprint-keyed cache slot owning one [`MessageBuffer`].
///
/// `last_access` is an atomic millisecond timestamp rather than a field
/// behind the entry's read/write lock, per the spec's explicit allowance to
/// collapse it so a cache hit can refresh it under a read lock. `deleted` is
/// likewise atomic: the cache's delete path sets it before unlinking the
/// node so any consumer already holding a reference can detect the race.
pub struct CacheEntry {
    fingerprint: Vec<u8>,
    buffer: MessageBuffer,
    deleted: AtomicBool,
    last_access_ms: AtomicU64,
}

impl CacheEntry {
    /// Creates a new entry for `fingerprint`, copying the bytes, wrapping a
    /// freshly created empty [`MessageBuffer`].
    pub fn new(fingerprint: &[u8]) -> Self {
        CacheEntry {
            fingerprint: fingerprint.to_vec(),
            buffer: MessageBuffer::new(),
            deleted: AtomicBool::new(false),
            last_access_ms: AtomicU64::new(now_ms()),
        }
    }

    /// The fingerprint this entry was created for.
    pub fn fingerprint(&self) -> &[u8] {
        &self.fingerprint
    }

    /// The entry's message buffer.
    pub fn buffer(&self) -> &MessageBuffer {
        &self.buffer
    }

    /// Whether a consumer should treat this entry as logically absent.
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Marks the entry deleted. Called by the cache's delete path under the
    /// entry's write lock, before unlinking it from its bucket.
    pub fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    /// Milliseconds since the epoch at last `touch`/construction.
    pub fn last_access_ms(&self) -> u64 {
        self.last_access_ms.load(Ordering::Acquire)
    }

    /// Refreshes `last_access` to the current time. Called on every cache
    /// hit; safe to call under a read lock since it is a single atomic
    /// store.
    pub fn touch(&self) {
        self.last_access_ms.store(now_ms(), Ordering::Release);
    }

    /// Whether `now_ms - last_access_ms >= ttl_ms`.
    pub fn is_expired(&self, now_ms: u64, ttl_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_access_ms()) >= ttl_ms
    }
}
