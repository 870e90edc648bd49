//! Attached-Replica Registry and Write Fan-Out
//!
//! When a replica completes PSYNC on a primary, the connection that
//! carried the handshake stops being a client and becomes a write-only
//! sink held here. After the engine applies a write, the session takes a
//! snapshot of the current membership and writes the propagation frame
//! to each sink.
//!
//! Fan-out is fire-and-forget: a sink that fails to accept a write is
//! logged and detached, and the originating client's command is
//! unaffected (it already succeeded locally).

use crate::protocol::RespValue;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tracing::{debug, info, warn};

/// A write-only handle to an attached replica, identified by its remote
/// endpoint.
#[derive(Debug, Clone)]
pub struct ReplicaSink {
    endpoint: String,
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
}

impl ReplicaSink {
    /// Wraps the write half of an attached replica's connection.
    pub fn new(endpoint: String, writer: OwnedWriteHalf) -> Self {
        Self {
            endpoint,
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
        }
    }

    /// The replica's remote endpoint string.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Writes raw bytes to the replica.
    pub async fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }
}

/// The set of currently-attached replica sinks.
///
/// Shared process-wide behind an `Arc`; sessions attach and detach
/// sinks, and write paths iterate a membership snapshot.
#[derive(Debug, Default)]
pub struct ReplicaRegistry {
    sinks: Mutex<HashMap<String, ReplicaSink>>,
}

impl ReplicaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a sink, replacing any prior sink for the same endpoint.
    pub fn attach(&self, sink: ReplicaSink) {
        let endpoint = sink.endpoint().to_string();
        let replaced = self
            .sinks
            .lock()
            .unwrap()
            .insert(endpoint.clone(), sink)
            .is_some();
        info!(replica = %endpoint, replaced = replaced, "Replica attached");
    }

    /// Removes the sink for `endpoint` if present.
    pub fn detach(&self, endpoint: &str) -> bool {
        let removed = self.sinks.lock().unwrap().remove(endpoint).is_some();
        if removed {
            info!(replica = %endpoint, "Replica detached");
        }
        removed
    }

    /// Best-effort snapshot of the current membership.
    ///
    /// The list may omit sinks attached after the call began and may
    /// include sinks that close concurrently. Fan-out iterates this copy
    /// so no socket write ever happens under the registry lock.
    pub fn snapshot(&self) -> Vec<ReplicaSink> {
        self.sinks.lock().unwrap().values().cloned().collect()
    }

    /// Number of attached replicas.
    pub fn len(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }

    /// Returns true when no replica is attached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes a propagation frame to every attached replica.
    ///
    /// Sinks that fail the write are detached; errors never surface to
    /// the caller.
    pub async fn broadcast(&self, frame: &RespValue) {
        let sinks = self.snapshot();
        if sinks.is_empty() {
            return;
        }

        let bytes = frame.serialize();
        debug!(replicas = sinks.len(), bytes = bytes.len(), "Propagating write");

        for sink in sinks {
            if let Err(e) = sink.send(&bytes).await {
                warn!(
                    replica = %sink.endpoint(),
                    error = %e,
                    "Failed to propagate to replica, detaching"
                );
                self.detach(sink.endpoint());
            }
        }
    }
}
