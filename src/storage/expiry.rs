//! Background Expiry Sweeper
//!
//! Lazy expiry (checking on access) alone has a gap: a key that expires
//! and is never read again would stay in memory forever. The sweeper
//! closes it by periodically scanning the store and removing expired
//! entries.
//!
//! The sweeper runs as a Tokio task:
//! 1. Sleeps for the configured interval
//! 2. Wakes up and runs `cleanup_expired` over the store
//! 3. Logs how much was reclaimed

use crate::storage::KvStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task is stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Starts the sweeper as a background task scanning `store` every
    /// `interval`.
    ///
    /// Returns a handle that stops the sweeper when dropped.
    pub fn start(store: Arc<KvStore>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(store, interval, shutdown_rx));

        info!(interval_ms = interval.as_millis() as u64, "Expiry sweeper started");

        Self { shutdown_tx }
    }

    /// Stops the sweeper.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(store: Arc<KvStore>, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper shutting down");
                    return;
                }
            }
        }

        let removed = store.cleanup_expired();
        if removed > 0 {
            debug!(
                removed = removed,
                keys_remaining = store.len(),
                "Expired keys cleaned up"
            );
        }
    }
}

/// Starts the expiry sweeper with the default interval.
pub fn start_expiry_sweeper(store: Arc<KvStore>) -> ExpirySweeper {
    ExpirySweeper::start(store, DEFAULT_SWEEP_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_sweeper_cleans_expired_keys() {
        let store = Arc::new(KvStore::new());

        for i in 0..10 {
            store.set_with_ttl(
                Bytes::from(format!("key{}", i)),
                Bytes::from("value"),
                Duration::from_millis(30),
            );
        }
        store.set(Bytes::from("persistent"), Bytes::from("value"));
        assert_eq!(store.len(), 11);

        let _sweeper = ExpirySweeper::start(Arc::clone(&store), Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get(&Bytes::from("persistent")),
            Some(Bytes::from("value"))
        );
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_drop() {
        let store = Arc::new(KvStore::new());

        {
            let _sweeper = ExpirySweeper::start(Arc::clone(&store), Duration::from_millis(10));
            tokio::time::sleep(Duration::from_millis(30)).await;
            // Sweeper is dropped here
        }

        store.set_with_ttl(
            Bytes::from("key"),
            Bytes::from("value"),
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(60)).await;

        // No active sweeping any more, but lazy expiry still applies.
        assert!(store.get(&Bytes::from("key")).is_none());
    }
}
