//! Fixed-bucket hash table of [`CacheEntry`] values with lock-coupled
//! traversal and a background TTL evictor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::entry::CacheEntry;
use crate::signals::block_all_signals;

/// Errors raised by [`Cache`] construction and mutation.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Bucket-array allocation did not fit in available memory.
    #[error("failed to allocate {0} cache buckets")]
    AllocFailure(usize),
    /// A required argument was invalid (e.g. zero bucket capacity).
    #[error("invalid cache argument: {0}")]
    InvalidArgument(&'static str),
    /// The OS refused to spawn the evictor thread.
    #[error("failed to spawn evictor thread: {0}")]
    EvictorSpawnFailure(std::io::Error),
}

/// Result of a [`Cache::delete`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The fingerprint was present and has been unlinked.
    Deleted,
    /// The fingerprint was not present.
    NotFound,
}

type Link = Option<Arc<Node>>;

struct Node {
    entry: Arc<CacheEntry>,
    next: RwLock<Link>,
}

struct Bucket {
    head: RwLock<Link>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A fixed-capacity, chained hash table of cache entries with a dedicated
/// background thread evicting entries idle past the configured TTL.
pub struct Cache {
    buckets: Vec<Bucket>,
    capacity: usize,
    ttl_ms: u64,
    shutdown: Arc<AtomicBool>,
    evictor: Mutex<Option<JoinHandle<()>>>,
}

impl Cache {
    /// Creates a cache with `capacity` buckets and the given TTL, and spawns
    /// its background evictor thread.
    pub fn new(capacity: usize, ttl_ms: u64) -> Result<Arc<Cache>, CacheError> {
        if capacity == 0 {
            return Err(CacheError::InvalidArgument("capacity must be non-zero"));
        }

        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(capacity)
            .map_err(|_| CacheError::AllocFailure(capacity))?;
        for _ in 0..capacity {
            buckets.push(Bucket {
                head: RwLock::new(None),
            });
        }

        let cache = Arc::new(Cache {
            buckets,
            capacity,
            ttl_ms,
            shutdown: Arc::new(AtomicBool::new(false)),
            evictor: Mutex::new(None),
        });

        let handle = {
            let cache = Arc::clone(&cache);
            thread::Builder::new()
                .name("evictor".to_string())
                .spawn(move || cache.evictor_loop())
                .map_err(CacheError::EvictorSpawnFailure)?
        };
        *cache.evictor.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        Ok(cache)
    }

    /// Number of buckets in the table.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn bucket_index(&self, fingerprint: &[u8]) -> usize {
        let mut h: usize = 0;
        for &byte in fingerprint {
            h = h.wrapping_mul(31).wrapping_add(byte as usize);
        }
        h % self.capacity
    }

    /// Looks up `fingerprint`. On a match, refreshes `last_access` and
    /// returns the entry; on exhaustion (or a match found mid-unlink),
    /// returns `None`.
    pub fn get(&self, fingerprint: &[u8]) -> Option<Arc<CacheEntry>> {
        let idx = self.bucket_index(fingerprint);
        let mut current: Link = {
            let guard = self.buckets[idx].head.read().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        while let Some(node) = current {
            if node.entry.fingerprint() == fingerprint {
                if node.entry.is_deleted() {
                    // Raced with a concurrent delete; keep scanning past it
                    // in case a duplicate fingerprint exists further down.
                } else {
                    node.entry.touch();
                    return Some(Arc::clone(&node.entry));
                }
            }
            current = {
                let guard = node.next.read().unwrap_or_else(|e| e.into_inner());
                guard.clone()
            };
        }
        None
    }

    /// Installs `entry` at the head of its bucket.
    ///
    /// The new node's `next` is written before the bucket head is swung, and
    /// both happen under the bucket's single write lock, so the publish is
    /// atomic with respect to concurrent `get`/`add`/`delete` calls on that
    /// bucket. Callers are responsible for ensuring fingerprint uniqueness
    /// via a prior `get` in the same critical section (the data structure
    /// itself tolerates duplicates).
    pub fn add(&self, entry: Arc<CacheEntry>) -> Result<(), CacheError> {
        let idx = self.bucket_index(entry.fingerprint());
        let node = Arc::new(Node {
            entry,
            next: RwLock::new(None),
        });
        let mut head = self.buckets[idx].head.write().unwrap_or_else(|e| e.into_inner());
        *node.next.write().unwrap_or_else(|e| e.into_inner()) = head.clone();
        *head = Some(node);
        Ok(())
    }

    /// Atomically looks up `fingerprint`, inserting `make()`'s result if
    /// absent, all under one bucket-level critical section.
    ///
    /// This is the "prior `get` under the same critical section" the
    /// data-model contract for `add` calls for: `get`/`add` used separately
    /// cannot make that guarantee on their own, since another thread can
    /// insert between the two calls. Returns `(entry, true)` when this call
    /// was the one that inserted (caller becomes the producer), or
    /// `(entry, false)` on a hit (caller becomes a consumer). Satisfies the
    /// uniqueness-under-contention invariant: at most one caller ever sees
    /// `true` for a given fingerprint before it is deleted.
    pub fn get_or_insert<F>(&self, fingerprint: &[u8], make: F) -> (Arc<CacheEntry>, bool)
    where
        F: FnOnce() -> Arc<CacheEntry>,
    {
        let idx = self.bucket_index(fingerprint);
        let mut head = self.buckets[idx].head.write().unwrap_or_else(|e| e.into_inner());

        let mut current = head.clone();
        while let Some(node) = current {
            if node.entry.fingerprint() == fingerprint && !node.entry.is_deleted() {
                node.entry.touch();
                return (Arc::clone(&node.entry), false);
            }
            current = node.next.read().unwrap_or_else(|e| e.into_inner()).clone();
        }

        let entry = make();
        let node = Arc::new(Node {
            entry: Arc::clone(&entry),
            next: RwLock::new(head.clone()),
        });
        *head = Some(node);
        (entry, true)
    }

    /// Removes the entry matching `fingerprint`, if any.
    ///
    /// Unlinking acquires both the predecessor's and the victim's write
    /// locks (the predecessor's link slot write lock, and the victim's own
    /// `next` write lock), and marks the victim deleted before the link is
    /// swung, per the corrected locking discipline. The phase-1 walk is
    /// lock-free (read-lock-and-clone, as in `get`); phase 2 re-validates
    /// under write locks and retries on a concurrent mutation.
    pub fn delete(&self, fingerprint: &[u8]) -> DeleteOutcome {
        let idx = self.bucket_index(fingerprint);
        loop {
            let mut pred: Link = None;
            let mut current: Link = {
                let guard = self.buckets[idx].head.read().unwrap_or_else(|e| e.into_inner());
                guard.clone()
            };
            let mut victim = None;
            while let Some(node) = current.clone() {
                if node.entry.fingerprint() == fingerprint && !node.entry.is_deleted() {
                    victim = Some(node);
                    break;
                }
                pred = Some(node.clone());
                current = {
                    let guard = node.next.read().unwrap_or_else(|e| e.into_inner());
                    guard.clone()
                };
            }
            let victim = match victim {
                Some(v) => v,
                None => return DeleteOutcome::NotFound,
            };

            let retry = match &pred {
                None => {
                    let mut head = self.buckets[idx].head.write().unwrap_or_else(|e| e.into_inner());
                    if !same_node(head.as_ref(), &victim) {
                        true
                    } else {
                        let victim_next = victim.next.write().unwrap_or_else(|e| e.into_inner());
                        victim.entry.mark_deleted();
                        *head = victim_next.clone();
                        return DeleteOutcome::Deleted;
                    }
                }
                Some(pred_node) => {
                    let mut pred_next = pred_node.next.write().unwrap_or_else(|e| e.into_inner());
                    if !same_node(pred_next.as_ref(), &victim) {
                        true
                    } else {
                        let victim_next = victim.next.write().unwrap_or_else(|e| e.into_inner());
                        victim.entry.mark_deleted();
                        *pred_next = victim_next.clone();
                        return DeleteOutcome::Deleted;
                    }
                }
            };
            if retry {
                continue;
            }
        }
    }

    fn evictor_loop(&self) {
        block_all_signals();
        let sweep_interval = Duration::from_millis(self.ttl_ms / 2).min(Duration::from_secs(1));
        let sweep_interval = sweep_interval.max(Duration::from_millis(1));
        log::info!("evictor started: ttl_ms={} sweep_interval={:?}", self.ttl_ms, sweep_interval);
        while !self.shutdown.load(Ordering::Acquire) {
            thread::sleep(sweep_interval);
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            self.sweep();
        }
        log::info!("evictor exiting");
    }

    fn sweep(&self) {
        let now = now_ms();
        for idx in 0..self.capacity {
            let expired: Vec<Vec<u8>> = {
                let mut fingerprints = Vec::new();
                let mut current: Link = {
                    let guard = self.buckets[idx].head.read().unwrap_or_else(|e| e.into_inner());
                    guard.clone()
                };
                while let Some(node) = current {
                    if !node.entry.is_deleted() && node.entry.is_expired(now, self.ttl_ms) {
                        fingerprints.push(node.entry.fingerprint().to_vec());
                    }
                    current = {
                        let guard = node.next.read().unwrap_or_else(|e| e.into_inner());
                        guard.clone()
                    };
                }
                fingerprints
            };
            for fp in expired {
                if self.delete(&fp) == DeleteOutcome::Deleted {
                    log::info!("evictor: removed expired entry in bucket {idx} ({} byte fingerprint)", fp.len());
                }
            }
        }
    }

    /// Signals the evictor to stop and joins it. Subsequent calls are a
    /// no-op. Does not clear the buckets themselves; `Drop` handles final
    /// teardown of the chains via ordinary `Arc` refcounting.
    pub fn destroy(&self) {
        self.shutdown.store(true, Ordering::Release);
        let handle = self.evictor.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn same_node(link: Option<&Arc<Node>>, target: &Arc<Node>) -> bool {
    matches!(link, Some(n) if Arc::ptr_eq(n, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn add_then_get_returns_entry() {
        let cache = Cache::new(16, 60_000).unwrap();
        let entry = Arc::new(CacheEntry::new(b"fp-a"));
        cache.add(Arc::clone(&entry)).unwrap();
        let found = cache.get(b"fp-a").expect("entry should be present");
        assert_eq!(found.fingerprint(), b"fp-a");
    }

    #[test]
    fn get_on_empty_cache_is_none() {
        let cache = Cache::new(4, 60_000).unwrap();
        assert!(cache.get(b"missing").is_none());
    }

    #[test]
    fn delete_removes_entry_and_reports_not_found_after() {
        let cache = Cache::new(4, 60_000).unwrap();
        cache.add(Arc::new(CacheEntry::new(b"x"))).unwrap();
        assert_eq!(cache.delete(b"x"), DeleteOutcome::Deleted);
        assert_eq!(cache.delete(b"x"), DeleteOutcome::NotFound);
        assert!(cache.get(b"x").is_none());
    }

    #[test]
    fn delete_unlinks_head_setting_head_to_successor() {
        let cache = Cache::new(1, 60_000).unwrap(); // force one bucket: collisions
        cache.add(Arc::new(CacheEntry::new(b"first"))).unwrap();
        cache.add(Arc::new(CacheEntry::new(b"second"))).unwrap(); // becomes new head
        assert_eq!(cache.delete(b"second"), DeleteOutcome::Deleted);
        // "first" must still be reachable: head must become "first", not null.
        assert!(cache.get(b"first").is_some());
    }

    #[test]
    fn chained_entries_in_same_bucket_are_all_reachable() {
        let cache = Cache::new(1, 60_000).unwrap();
        for i in 0..5u8 {
            cache.add(Arc::new(CacheEntry::new(&[i]))).unwrap();
        }
        for i in 0..5u8 {
            assert!(cache.get(&[i]).is_some(), "entry {i} should be reachable");
        }
    }

    #[test]
    fn concurrent_get_and_delete_do_not_panic_or_deadlock() {
        let cache = Arc::new(Cache::new(8, 60_000).unwrap());
        for i in 0..32u8 {
            cache.add(Arc::new(CacheEntry::new(&[i]))).unwrap();
        }
        let barrier = Arc::new(Barrier::new(4));
        let mut handles = Vec::new();
        for t in 0..4 {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                for i in 0..32u8 {
                    if t % 2 == 0 {
                        let _ = cache.get(&[i]);
                    } else {
                        let _ = cache.delete(&[i]);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn entry_accessed_within_ttl_survives_a_sweep() {
        let cache = Cache::new(4, 10_000).unwrap();
        cache.add(Arc::new(CacheEntry::new(b"fresh"))).unwrap();
        cache.sweep();
        assert!(cache.get(b"fresh").is_some());
    }

    #[test]
    fn entry_past_ttl_is_removed_by_sweep() {
        let cache = Cache::new(4, 0).unwrap();
        cache.add(Arc::new(CacheEntry::new(b"stale"))).unwrap();
        thread::sleep(Duration::from_millis(5));
        cache.sweep();
        assert!(cache.get(b"stale").is_none());
    }

    #[test]
    fn get_or_insert_reports_true_only_for_the_first_caller() {
        let cache = Arc::new(Cache::new(8, 60_000).unwrap());
        let barrier = Arc::new(Barrier::new(8));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                let (_entry, inserted) = cache.get_or_insert(b"shared-fp", || Arc::new(CacheEntry::new(b"shared-fp")));
                inserted
            }));
        }
        let inserted_count = handles.into_iter().map(|h| h.join().unwrap()).filter(|&b| b).count();
        assert_eq!(inserted_count, 1, "exactly one caller should become the producer");
    }

    #[test]
    fn get_or_insert_returns_existing_entry_on_hit() {
        let cache = Cache::new(8, 60_000).unwrap();
        let (first, first_inserted) = cache.get_or_insert(b"fp", || Arc::new(CacheEntry::new(b"fp")));
        assert!(first_inserted);
        let (second, second_inserted) = cache.get_or_insert(b"fp", || Arc::new(CacheEntry::new(b"fp")));
        assert!(!second_inserted);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(Cache::new(0, 1000), Err(CacheError::InvalidArgument(_))));
    }

    #[test]
    fn destroy_is_idempotent_and_stops_the_evictor() {
        let cache = Cache::new(4, 50).unwrap();
        cache.destroy();
        cache.destroy();
    }
}
