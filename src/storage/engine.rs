//! Thread-Safe Key-Value Store with Expiry Support
//!
//! This module implements the in-memory store behind the command engine:
//! a concurrent map from byte-string keys to value records, where each
//! record carries an optional absolute expiration instant.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Instead of one big lock, keys hash to one of
//!    several shards, each behind its own `RwLock`.
//! 2. **Lazy Expiry**: A record whose expiration has elapsed is treated
//!    as absent on access; physical removal happens on that access or
//!    via the background sweeper.
//! 3. **Full Replacement**: A write to an existing key replaces the
//!    whole record, including clearing any prior expiration.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        KvStore                              │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Operations are individually atomic per key; no cross-key ordering is
//! promised.

use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Number of shards for the store.
/// More shards = less lock contention, but more memory overhead.
const NUM_SHARDS: usize = 16;

/// A stored value record with optional expiry time.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The payload bytes
    pub value: Bytes,
    /// Absolute instant at which this entry expires (None = never)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Creates a new entry without expiry.
    pub fn new(value: Bytes) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Creates a new entry expiring after `ttl`.
    pub fn with_ttl(value: Bytes, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Some(Instant::now() + ttl),
        }
    }

    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() >= exp)
            .unwrap_or(false)
    }
}

/// A single shard containing a portion of the key space.
#[derive(Debug)]
struct Shard {
    data: RwLock<HashMap<Bytes, Entry>>,
}

impl Shard {
    fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }
}

/// The in-memory store shared by every connection.
///
/// Wrap it in an `Arc` and hand a clone to each session task; all
/// operations are thread-safe.
///
/// # Example
///
/// ```
/// use emberkv::storage::KvStore;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let store = KvStore::new();
///
/// store.set(Bytes::from("name"), Bytes::from("ember"));
/// assert_eq!(store.get(&Bytes::from("name")), Some(Bytes::from("ember")));
///
/// // Set with expiry
/// store.set_with_ttl(Bytes::from("session"), Bytes::from("abc123"), Duration::from_secs(60));
/// ```
pub struct KvStore {
    /// Sharded storage for reduced lock contention
    shards: Vec<Shard>,

    /// Approximate number of live keys
    key_count: AtomicU64,

    /// Number of expired keys physically removed
    expired_count: AtomicU64,
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .field("expired_count", &self.expired_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for KvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::new()).collect();

        Self {
            shards,
            key_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    /// Determines which shard a key belongs to.
    #[inline]
    fn shard_of(&self, key: &[u8]) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    /// Sets a key-value pair without expiry.
    ///
    /// Replaces any prior record for the key, including one that carried
    /// an expiration.
    pub fn set(&self, key: Bytes, value: Bytes) {
        let shard = self.shard_of(&key);
        let mut data = shard.data.write().unwrap();

        if data.insert(key, Entry::new(value)).is_none() {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Sets a key-value pair that expires after `ttl`.
    ///
    /// The expiration is stored as an absolute instant computed now.
    pub fn set_with_ttl(&self, key: Bytes, value: Bytes, ttl: Duration) {
        let shard = self.shard_of(&key);
        let mut data = shard.data.write().unwrap();

        if data.insert(key, Entry::with_ttl(value, ttl)).is_none() {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired. An
    /// expired record found on the read path is removed under the write
    /// lock (lazy expiry).
    pub fn get(&self, key: &Bytes) -> Option<Bytes> {
        let shard = self.shard_of(key);

        // Fast path: read lock for live keys.
        {
            let data = shard.data.read().unwrap();
            match data.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Key exists but looked expired; re-check under the write lock.
        let mut data = shard.data.write().unwrap();
        match data.get(key) {
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                None
            }
            // Another task replaced the record in between.
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Deletes a key.
    ///
    /// Returns `true` if a record was present, whether or not it had
    /// already expired.
    pub fn delete(&self, key: &Bytes) -> bool {
        let shard = self.shard_of(key);
        let mut data = shard.data.write().unwrap();

        if data.remove(key).is_some() {
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Deletes each key in order and returns how many were present.
    ///
    /// Duplicates count only while they still exist: `[k, k]` yields 1.
    pub fn delete_many(&self, keys: &[Bytes]) -> u64 {
        let mut deleted = 0;
        for key in keys {
            if self.delete(key) {
                deleted += 1;
            }
        }
        deleted
    }

    /// Approximate number of keys (expired-but-unswept keys included).
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Returns true if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of expired keys physically removed so far.
    pub fn expired_count(&self) -> u64 {
        self.expired_count.load(Ordering::Relaxed)
    }

    /// Scans every shard and removes expired entries.
    ///
    /// Returns the number of entries removed. Called periodically by the
    /// background sweeper.
    pub fn cleanup_expired(&self) -> u64 {
        let mut removed = 0;

        for shard in &self.shards {
            let mut data = shard.data.write().unwrap();
            let before = data.len();
            data.retain(|_, entry| !entry.is_expired());
            removed += (before - data.len()) as u64;
        }

        if removed > 0 {
            self.key_count.fetch_sub(removed, Ordering::Relaxed);
            self.expired_count.fetch_add(removed, Ordering::Relaxed);
        }

        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_set_and_get() {
        let store = KvStore::new();
        store.set(Bytes::from("key"), Bytes::from("value"));
        assert_eq!(store.get(&Bytes::from("key")), Some(Bytes::from("value")));
    }

    #[test]
    fn test_get_missing_key() {
        let store = KvStore::new();
        assert_eq!(store.get(&Bytes::from("nope")), None);
    }

    #[test]
    fn test_set_replaces_value() {
        let store = KvStore::new();
        store.set(Bytes::from("key"), Bytes::from("v1"));
        store.set(Bytes::from("key"), Bytes::from("v2"));
        assert_eq!(store.get(&Bytes::from("key")), Some(Bytes::from("v2")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_set_clears_prior_ttl() {
        let store = KvStore::new();
        store.set_with_ttl(
            Bytes::from("key"),
            Bytes::from("v1"),
            Duration::from_millis(20),
        );
        // Plain SET replaces the record, dropping the expiration.
        store.set(Bytes::from("key"), Bytes::from("v2"));

        thread::sleep(Duration::from_millis(40));
        assert_eq!(store.get(&Bytes::from("key")), Some(Bytes::from("v2")));
    }

    #[test]
    fn test_expired_key_reads_as_absent() {
        let store = KvStore::new();
        store.set_with_ttl(
            Bytes::from("key"),
            Bytes::from("value"),
            Duration::from_millis(10),
        );
        assert_eq!(store.get(&Bytes::from("key")), Some(Bytes::from("value")));

        thread::sleep(Duration::from_millis(25));
        assert_eq!(store.get(&Bytes::from("key")), None);
        assert_eq!(store.expired_count(), 1);
    }

    #[test]
    fn test_delete_existing_and_missing() {
        let store = KvStore::new();
        store.set(Bytes::from("key"), Bytes::from("value"));
        assert!(store.delete(&Bytes::from("key")));
        assert!(!store.delete(&Bytes::from("key")));
        assert_eq!(store.get(&Bytes::from("key")), None);
    }

    #[test]
    fn test_delete_counts_expired_record_as_present() {
        let store = KvStore::new();
        store.set_with_ttl(
            Bytes::from("key"),
            Bytes::from("value"),
            Duration::from_millis(5),
        );
        thread::sleep(Duration::from_millis(15));
        // Physically still present, so delete reports it.
        assert!(store.delete(&Bytes::from("key")));
    }

    #[test]
    fn test_delete_many_counts_duplicates_sequentially() {
        let store = KvStore::new();
        store.set(Bytes::from("key"), Bytes::from("value"));

        let keys = vec![Bytes::from("key"), Bytes::from("key"), Bytes::from("other")];
        assert_eq!(store.delete_many(&keys), 1);
    }

    #[test]
    fn test_cleanup_expired_removes_only_expired() {
        let store = KvStore::new();
        store.set(Bytes::from("live"), Bytes::from("v"));
        for i in 0..10 {
            store.set_with_ttl(
                Bytes::from(format!("dead{}", i)),
                Bytes::from("v"),
                Duration::from_millis(5),
            );
        }
        thread::sleep(Duration::from_millis(20));

        assert_eq!(store.cleanup_expired(), 10);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&Bytes::from("live")), Some(Bytes::from("v")));
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let store = std::sync::Arc::new(KvStore::new());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = std::sync::Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..1000 {
                        let key = Bytes::from(format!("key:{}:{}", t, i));
                        store.set(key.clone(), Bytes::from("value"));
                        assert_eq!(store.get(&key), Some(Bytes::from("value")));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 4000);
    }
}
