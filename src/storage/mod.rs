//! Storage Module
//!
//! The in-memory store behind the command engine: a thread-safe, sharded
//! key-value map with per-key TTL support, plus a background sweeper for
//! active expiry.
//!
//! ## Expiry
//!
//! Keys with a TTL are expired two ways:
//! 1. **Lazy**: a record whose expiration elapsed reads as absent and is
//!    removed on access
//! 2. **Active**: the [`ExpirySweeper`] task periodically scans for
//!    expired keys that nobody reads
//!
//! ## Example
//!
//! ```
//! use emberkv::storage::KvStore;
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let store = KvStore::new();
//!
//! store.set(Bytes::from("name"), Bytes::from("ember"));
//! assert_eq!(store.get(&Bytes::from("name")), Some(Bytes::from("ember")));
//!
//! store.set_with_ttl(
//!     Bytes::from("session"),
//!     Bytes::from("token123"),
//!     Duration::from_secs(3600),
//! );
//! ```

pub mod engine;
pub mod expiry;

// Re-export commonly used types
pub use engine::{Entry, KvStore};
pub use expiry::{start_expiry_sweeper, ExpirySweeper, DEFAULT_SWEEP_INTERVAL};
