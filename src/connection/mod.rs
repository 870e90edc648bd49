//! Connection Session Module
//!
//! Manages individual TCP connections. Each accepted connection runs in
//! its own async task; a replica additionally runs one session over its
//! outbound connection to the primary.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                      (main.rs)                              │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ accept()
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │
//!           └────────────┬───────────┘
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌────────────┐   ┌──────────────┐   ┌─────────────┐        │
//! │  │ Read bytes │──▶│ Decode frame │──▶│ Execute cmd │        │
//! │  └────────────┘   └──────────────┘   └──────┬──────┘        │
//! │                                             │               │
//! │              reply / propagate / attach  ◀──┘               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A client session that completes PSYNC hands its socket to the replica
//! registry and stops serving commands. The inbound-from-primary session
//! on a replica runs the same loop with replies suppressed.

pub mod handler;

// Re-export commonly used types
pub use handler::{
    handle_connection, handle_primary_link, ConnectionError, ConnectionHandler, ConnectionStats,
};
