use crate::config::Config;
use crate::metrics_defs::SNAPSHOT_RESTORE_FAILED;
use crate::my_segments::MySegmentsCache;
use crate::persistence::{PersistenceError, SNAPSHOT_VERSION, SPEC_VERSION, SnapshotStore};
use crate::snapshot::{Metadata, Snapshot, StorageKind};
use crate::splits::{ProxySplitStorage, SplitStorageState};
use serde::{Deserialize, Serialize};
use shared::counter;
use std::collections::HashMap;

/// Everything the proxy persists between restarts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyState {
    pub splits: SplitStorageState,
    pub my_segments: HashMap<String, Vec<String>>,
}

/// In-memory caches shared by the origin sync and the request handlers.
pub struct ProxyStorage {
    splits: ProxySplitStorage,
    my_segments: MySegmentsCache,
}

impl ProxyStorage {
    pub fn new(config: &Config) -> Self {
        ProxyStorage {
            splits: ProxySplitStorage::new(config.max_checkpoints),
            my_segments: MySegmentsCache::new(),
        }
    }

    pub fn from_state(state: ProxyState, config: &Config) -> Self {
        ProxyStorage {
            splits: ProxySplitStorage::from_state(state.splits, config.max_checkpoints),
            my_segments: MySegmentsCache::from_state(state.my_segments),
        }
    }

    pub fn splits(&self) -> &ProxySplitStorage {
        &self.splits
    }

    pub fn my_segments(&self) -> &MySegmentsCache {
        &self.my_segments
    }

    pub fn state(&self) -> ProxyState {
        ProxyState {
            splits: self.splits.state(),
            my_segments: self.my_segments.state(),
        }
    }

    pub fn capture_snapshot(&self) -> Result<Snapshot, PersistenceError> {
        let payload = serde_json::to_vec(&self.state())?;
        let snapshot = Snapshot::new(
            Metadata {
                version: SNAPSHOT_VERSION,
                storage: StorageKind::Memory,
                spec_version: SPEC_VERSION.into(),
            },
            &payload,
        )?;
        Ok(snapshot)
    }

    /// Rebuilds the caches from a snapshot. Snapshots written by a newer
    /// build or for another storage kind are rejected.
    pub fn restore(snapshot: &Snapshot, config: &Config) -> Result<Self, PersistenceError> {
        let meta = snapshot.meta();
        if meta.storage != StorageKind::Memory || meta.version > SNAPSHOT_VERSION {
            return Err(PersistenceError::UnsupportedSnapshot {
                version: meta.version,
                storage: meta.storage,
            });
        }

        let state: ProxyState = serde_json::from_slice(&snapshot.data()?)?;
        Ok(Self::from_state(state, config))
    }

    /// Restores from the store when possible. Any failure results in empty
    /// caches; the origin sync repopulates them.
    pub fn load_or_cold_start(store: &dyn SnapshotStore, config: &Config) -> Self {
        let loaded = store
            .load()
            .and_then(|maybe| maybe.map(|s| Self::restore(&s, config)).transpose());

        match loaded {
            Ok(Some(storage)) => {
                tracing::info!(
                    change_number = storage.splits.change_number(),
                    checkpoints = storage.splits.summaries().checkpoint_count(),
                    segment_keys = storage.my_segments.key_count(),
                    "Restored proxy storage from snapshot"
                );
                storage
            }
            Ok(None) => {
                tracing::info!("No snapshot available, starting with empty storage");
                Self::new(config)
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "Could not restore snapshot, starting with empty storage"
                );
                counter!(SNAPSHOT_RESTORE_FAILED).increment(1);
                Self::new(config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{FilesystemSnapshotStore, NoopSnapshotStore};
    use crate::types::{Split, SplitStatus};

    fn split(name: &str, cn: i64) -> Split {
        Split {
            name: name.into(),
            traffic_type_name: "user".into(),
            status: SplitStatus::Active,
            change_number: cn,
            killed: false,
            default_treatment: "off".into(),
            extra: serde_json::Map::from_iter([(
                "conditions".to_string(),
                serde_json::json!([{"conditionType": "ROLLOUT"}]),
            )]),
        }
    }

    fn populated() -> ProxyStorage {
        let storage = ProxyStorage::new(&Config::default());
        storage
            .splits()
            .update(vec![split("s1", 1), split("s2", 1)], vec![], 1);
        storage.splits().update(vec![split("s3", 2)], vec![], 2);
        storage.my_segments().add_segment_to_user("k1", "employees");
        storage
    }

    #[test]
    fn test_capture_and_restore() {
        let storage = populated();
        let snapshot = storage.capture_snapshot().unwrap();
        assert_eq!(snapshot.meta().version, SNAPSHOT_VERSION);

        let decoded = Snapshot::decode(&snapshot.encode().unwrap()).unwrap();
        let restored = ProxyStorage::restore(&decoded, &Config::default()).unwrap();

        assert_eq!(restored.state(), storage.state());
        assert_eq!(restored.splits().split("s1"), Some(split("s1", 1)));
        assert_eq!(
            restored.my_segments().segments_for_user("k1"),
            vec!["employees"]
        );
        let changes = restored.splits().changes_since(1).unwrap();
        assert_eq!(changes.till, 2);
        assert_eq!(changes.splits.len(), 1);
    }

    #[test]
    fn test_restore_rejects_unknown_storage() {
        let snapshot = Snapshot::new(
            Metadata {
                version: SNAPSHOT_VERSION,
                storage: StorageKind::Unknown(7),
                spec_version: SPEC_VERSION.into(),
            },
            b"{}",
        )
        .unwrap();

        let result = ProxyStorage::restore(&snapshot, &Config::default());
        assert!(matches!(
            result,
            Err(PersistenceError::UnsupportedSnapshot {
                version: 1,
                storage: StorageKind::Unknown(7)
            })
        ));
    }

    #[test]
    fn test_restore_rejects_newer_version() {
        let snapshot = Snapshot::new(
            Metadata {
                version: SNAPSHOT_VERSION + 1,
                storage: StorageKind::Memory,
                spec_version: SPEC_VERSION.into(),
            },
            b"{}",
        )
        .unwrap();

        assert!(matches!(
            ProxyStorage::restore(&snapshot, &Config::default()),
            Err(PersistenceError::UnsupportedSnapshot { .. })
        ));
    }

    #[test]
    fn test_cold_start_on_corrupt_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemSnapshotStore::new(dir.path().join("proxy.snapshot"));
        let snapshot = Snapshot::new(
            Metadata {
                version: SNAPSHOT_VERSION,
                storage: StorageKind::Memory,
                spec_version: SPEC_VERSION.into(),
            },
            b"not json",
        )
        .unwrap();
        store.store(&snapshot).unwrap();

        let storage = ProxyStorage::load_or_cold_start(&store, &Config::default());
        assert_eq!(storage.state(), ProxyState::default());
    }

    #[test]
    fn test_warm_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemSnapshotStore::new(dir.path().join("proxy.snapshot"));
        let original = populated();
        store.store(&original.capture_snapshot().unwrap()).unwrap();

        let storage = ProxyStorage::load_or_cold_start(&store, &Config::default());
        assert_eq!(storage.splits().change_number(), 2);
        assert_eq!(storage.state(), original.state());

        let storage = ProxyStorage::load_or_cold_start(&NoopSnapshotStore {}, &Config::default());
        assert_eq!(storage.splits().change_number(), -1);
    }
}
