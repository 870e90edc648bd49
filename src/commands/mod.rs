//! Command Engine Module
//!
//! Executes decoded commands against the store and tells the session
//! what to do with the outcome.
//!
//! ## Architecture
//!
//! ```text
//! Client / Primary bytes
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  FrameDecoder   │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Validate     │
//! │  - Execute      │
//! │  - Decide reply │
//! │    suppression, │
//! │    propagation, │
//! │    attachment   │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    KvStore      │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`, `ECHO`
//! - `SET key value [PX ms]`, `GET key`, `DEL key [key ...]`
//! - `INFO [replication]`
//! - `REPLCONF`, `PSYNC`, `FULLRESYNC` (replication handshake)

pub mod handler;

// Re-export the main command handler
pub use handler::{CommandHandler, Execution, SessionKind, EMPTY_SNAPSHOT};
