use crate::metrics_defs::{
    SNAPSHOT_PERSIST_BYTES, SNAPSHOT_PERSIST_DURATION, SNAPSHOT_PERSIST_FAILED,
};
use crate::persistence::{PersistenceError, SnapshotStore};
use crate::storage::ProxyStorage;
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(thiserror::Error, Debug)]
pub enum SnapshotterError {
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("the snapshotter is not running")]
    Stopped,
}

#[derive(Debug)]
pub enum Command {
    // Persist outside of the normal interval. The worker replies once the
    // snapshot is stored.
    Persist(oneshot::Sender<Result<usize, PersistenceError>>),
    // Store a final snapshot and stop the worker
    Shutdown,
}

/// Handle to the background task that periodically writes the proxy state to
/// the snapshot store.
pub struct Snapshotter {
    tx: mpsc::Sender<Command>,
    handle: JoinHandle<()>,
}

impl Snapshotter {
    pub fn spawn(
        storage: Arc<ProxyStorage>,
        store: Arc<dyn SnapshotStore>,
        interval: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<Command>(16);
        let worker = Worker { storage, store };
        let handle = tokio::spawn(async move {
            worker.run(interval, rx).await;
        });

        Snapshotter { tx, handle }
    }

    pub async fn persist_now(&self) -> Result<usize, SnapshotterError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Persist(reply_tx))
            .await
            .map_err(|_| SnapshotterError::Stopped)?;
        let size = reply_rx.await.map_err(|_| SnapshotterError::Stopped)??;
        Ok(size)
    }

    /// Stops the worker after it stores a final snapshot.
    pub async fn shutdown(self) {
        if self.tx.send(Command::Shutdown).await.is_err() {
            tracing::warn!("Snapshotter already stopped");
        }
        if let Err(err) = self.handle.await {
            tracing::error!(error = %err, "Snapshotter task failed");
        }
    }
}

struct Worker {
    storage: Arc<ProxyStorage>,
    store: Arc<dyn SnapshotStore>,
}

impl Worker {
    async fn run(&self, interval: Duration, mut rx: mpsc::Receiver<Command>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Failures are logged and counted in persist
                    let _ = self.persist().await;
                }
                cmd = rx.recv() => match cmd {
                    Some(Command::Persist(reply)) => {
                        let _ = reply.send(self.persist().await);
                    }
                    Some(Command::Shutdown) | None => {
                        let _ = self.persist().await;
                        tracing::info!("Snapshotter stopped");
                        break;
                    }
                }
            }
        }
    }

    async fn persist(&self) -> Result<usize, PersistenceError> {
        let start = Instant::now();
        let storage = self.storage.clone();
        let store = self.store.clone();

        // Serialization, compression and file I/O all block
        let result = match tokio::task::spawn_blocking(move || {
            let snapshot = storage.capture_snapshot()?;
            store.store(&snapshot)
        })
        .await
        {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        };

        match &result {
            Ok(size) => {
                histogram!(SNAPSHOT_PERSIST_DURATION).record(start.elapsed().as_secs_f64());
                histogram!(SNAPSHOT_PERSIST_BYTES).record(*size as f64);
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to persist snapshot");
                counter!(SNAPSHOT_PERSIST_FAILED).increment(1);
            }
        }
        result
    }
}
