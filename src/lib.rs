//! # emberkv - A Replicating In-Memory Key-Value Store
//!
//! emberkv is a minimal Redis-compatible, in-memory key-value store
//! written in Rust. It speaks a subset of the RESP wire protocol and
//! supports asynchronous primary→replica replication with a
//! full-resync handshake.
//!
//! ## Features
//!
//! - **RESP subset**: command arrays, pipelining, and the replication
//!   framing extras (inline replies, snapshot bulks)
//! - **TTL Support**: per-key expiry via `SET key value PX <ms>` with
//!   lazy expiry plus a background sweeper
//! - **Replication**: a primary answers PSYNC with a full resync and
//!   fans every write out to its attached replicas
//! - **Async I/O**: built on Tokio, one task per connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            emberkv                              │
//! │                                                                 │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐          │
//! │  │ TCP Server  │───▶│ Connection  │───▶│  Command    │          │
//! │  │ (Listener)  │    │  Session    │    │  Engine     │          │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘          │
//! │                            │                  │                 │
//! │                     PSYNC  │                  ▼                 │
//! │                  promotion │          ┌──────────────┐          │
//! │                            ▼          │   KvStore    │          │
//! │                  ┌──────────────────┐ │  (sharded,   │          │
//! │                  │ ReplicaRegistry  │ │  TTL-aware)  │          │
//! │                  │  write fan-out   │ └──────────────┘          │
//! │                  └──────────────────┘        ▲                  │
//! │                                              │                  │
//! │                  ┌───────────────────────────┴───────────────┐  │
//! │                  │            ExpirySweeper                  │  │
//! │                  │        (Background Tokio Task)            │  │
//! │                  └───────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! On a replica, one extra task holds the outbound connection to the
//! primary: it performs the PING → REPLCONF → PSYNC handshake, consumes
//! the snapshot, then applies every replicated write silently.
//!
//! ## Supported Commands
//!
//! - `PING`, `ECHO message`
//! - `SET key value [PX milliseconds]`, `GET key`, `DEL key [key ...]`
//! - `INFO [replication]`
//! - `REPLCONF ...`, `PSYNC ? -1` (replication handshake)
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP frame codec (types, incremental decoder)
//! - [`storage`]: thread-safe store with TTL support
//! - [`commands`]: the command engine
//! - [`connection`]: per-connection session driver
//! - [`replication`]: replica registry, fan-out, and handshake client
//! - [`config`]: role and CLI-level configuration

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod replication;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandHandler, Execution, SessionKind};
pub use config::{PrimaryAddr, Role, ServerConfig, DEFAULT_PORT};
pub use connection::{handle_connection, handle_primary_link, ConnectionStats};
pub use protocol::{Command, Frame, FrameDecoder, ParseError, RespValue};
pub use replication::{PrimaryLinkState, ReplicaRegistry, ReplicaSink};
pub use storage::{start_expiry_sweeper, ExpirySweeper, KvStore};

/// Version of emberkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Length of the replication identifier a primary generates at startup
pub const REPL_ID_LEN: usize = 40;
