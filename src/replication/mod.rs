//! Replication Module
//!
//! Asynchronous primary→replica replication with a full-resync
//! handshake.
//!
//! ## How a replica attaches
//!
//! ```text
//! replica                                 primary
//!    │  PING                                 │
//!    │ ───────────────────────────────────▶  │
//!    │                        +PONG          │
//!    │  REPLCONF listening-port <port>       │
//!    │ ───────────────────────────────────▶  │
//!    │                        +OK            │
//!    │  REPLCONF capa psync2                 │
//!    │ ───────────────────────────────────▶  │
//!    │                        +OK            │
//!    │  PSYNC ? -1                           │
//!    │ ───────────────────────────────────▶  │
//!    │    +FULLRESYNC <id> 0, snapshot       │
//!    │ ◀───────────────────────────────────  │
//!    │                                       │ connection becomes a
//!    │   propagated writes (SET/DEL ...)     │ write-only sink in the
//!    │ ◀───────────────────────────────────  │ replica registry
//! ```
//!
//! There is no acknowledgment protocol: after a write commits on the
//! primary, the re-encoded command is written to every attached sink in
//! the primary's local commit order, fire-and-forget.
//!
//! ## Modules
//!
//! - `registry`: the set of attached replica sinks and write fan-out
//! - `client`: the replica-side handshake and primary-link bookkeeping

pub mod client;
pub mod registry;

// Re-export commonly used types
pub use client::{
    establish, parse_fullresync, HandshakeError, PrimaryLinkState, PrimarySync, ReplicaLink,
};
pub use registry::{ReplicaRegistry, ReplicaSink};
