//! Snapshot stores let the proxy state be written out periodically and read
//! back on startup, so SDKs can be served before the first origin sync.

use crate::config::SnapshotStoreType;
use crate::snapshot::{Snapshot, SnapshotError, StorageKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Version of the payload layout written by this build.
pub const SNAPSHOT_VERSION: u64 = 1;

/// Flag definition spec version the cached definitions conform to.
pub const SPEC_VERSION: &str = "1.1";

#[derive(thiserror::Error, Debug)]
pub enum PersistenceError {
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("unsupported snapshot version {version} with storage {storage:?}")]
    UnsupportedSnapshot { version: u64, storage: StorageKind },

    #[error("persistence task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub trait SnapshotStore: Send + Sync {
    /// Returns `None` when there is nothing stored yet.
    fn load(&self) -> Result<Option<Snapshot>, PersistenceError>;
    /// Returns the number of bytes written.
    fn store(&self, snapshot: &Snapshot) -> Result<usize, PersistenceError>;
}

pub fn get_store(store_type: &SnapshotStoreType) -> Arc<dyn SnapshotStore> {
    match store_type {
        SnapshotStoreType::Filesystem { path } => Arc::new(FilesystemSnapshotStore::new(path)),
        SnapshotStoreType::None => Arc::new(NoopSnapshotStore {}),
    }
}

// Never stores anything. Used when snapshots are disabled.
pub struct NoopSnapshotStore {}

impl SnapshotStore for NoopSnapshotStore {
    fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        Ok(None)
    }

    fn store(&self, _snapshot: &Snapshot) -> Result<usize, PersistenceError> {
        Ok(0)
    }
}

pub struct FilesystemSnapshotStore {
    path: PathBuf,
}

impl FilesystemSnapshotStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FilesystemSnapshotStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FilesystemSnapshotStore {
    fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        match Snapshot::decode_from_file(&self.path) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(SnapshotError::NonexistentFile(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn store(&self, snapshot: &Snapshot) -> Result<usize, PersistenceError> {
        let size = snapshot.encode_to_file(&self.path)?;
        tracing::info!(path = ?self.path, bytes = size, "Stored snapshot");
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Metadata;

    fn get_snapshot() -> Snapshot {
        Snapshot::new(
            Metadata {
                version: SNAPSHOT_VERSION,
                storage: StorageKind::Memory,
                spec_version: SPEC_VERSION.into(),
            },
            b"{}",
        )
        .unwrap()
    }

    #[test]
    fn test_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemSnapshotStore::new(dir.path().join("proxy.snapshot"));

        assert!(store.load().unwrap().is_none());

        let snapshot = get_snapshot();
        let size = store.store(&snapshot).unwrap();
        assert!(size > 0);
        assert_eq!(store.load().unwrap(), Some(snapshot));
    }

    #[test]
    fn test_filesystem_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.snapshot");
        std::fs::write(&path, b"short").unwrap();

        let store = FilesystemSnapshotStore::new(&path);
        assert!(matches!(
            store.load(),
            Err(PersistenceError::Snapshot(SnapshotError::Size))
        ));
    }

    #[test]
    fn test_noop() {
        let store = get_store(&SnapshotStoreType::None);
        assert_eq!(store.store(&get_snapshot()).unwrap(), 0);
        assert!(store.load().unwrap().is_none());
    }
}
