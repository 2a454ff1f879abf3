use crate::change_summaries::{FetchError, SplitChangesSummaries, SummariesState};
use crate::types::{
    ChangeNumber, INITIAL_CHANGE_NUMBER, Split, SplitChanges, SplitStatus, to_minimal_views,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum StorageError {
    #[error("summary for change number {since} not cached")]
    SummaryNotCached { since: ChangeNumber },
}

impl From<FetchError> for StorageError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::UnknownChangeNumber { since, .. } => {
                StorageError::SummaryNotCached { since }
            }
        }
    }
}

/// Last known flag definitions keyed by name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitSnapshot {
    pub change_number: ChangeNumber,
    pub splits: HashMap<String, Split>,
}

impl Default for SplitSnapshot {
    fn default() -> Self {
        SplitSnapshot {
            change_number: INITIAL_CHANGE_NUMBER,
            splits: HashMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitStorageState {
    pub snapshot: SplitSnapshot,
    pub summaries: SummariesState,
}

/// Serves SDK "changes since" requests from memory: current definitions come
/// from the snapshot and the set of flags to include from the summaries.
pub struct ProxySplitStorage {
    snapshot: RwLock<SplitSnapshot>,
    summaries: SplitChangesSummaries,
    // Keeps the snapshot and the summaries moving together
    update_lock: Mutex<()>,
}

impl ProxySplitStorage {
    pub fn new(max_checkpoints: Option<usize>) -> Self {
        ProxySplitStorage {
            snapshot: RwLock::new(SplitSnapshot::default()),
            summaries: SplitChangesSummaries::new(max_checkpoints),
            update_lock: Mutex::new(()),
        }
    }

    pub fn from_state(state: SplitStorageState, max_checkpoints: Option<usize>) -> Self {
        ProxySplitStorage {
            snapshot: RwLock::new(state.snapshot),
            summaries: SplitChangesSummaries::from_state(state.summaries, max_checkpoints),
            update_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> SplitStorageState {
        let _guard = self.update_lock.lock();
        SplitStorageState {
            snapshot: self.snapshot.read().clone(),
            summaries: self.summaries.state(),
        }
    }

    pub fn summaries(&self) -> &SplitChangesSummaries {
        &self.summaries
    }

    /// Applies an origin update to the definitions and the summaries.
    pub fn update(&self, to_add: Vec<Split>, to_remove: Vec<Split>, cn: ChangeNumber) {
        if to_add.is_empty() && to_remove.is_empty() {
            return;
        }

        let _guard = self.update_lock.lock();
        let added = to_minimal_views(&to_add);
        let removed = to_minimal_views(&to_remove);

        {
            let mut write_guard = self.snapshot.write();
            for split in &to_remove {
                write_guard.splits.remove(&split.name);
            }
            for split in to_add {
                write_guard.splits.insert(split.name.clone(), split);
            }
            if cn > write_guard.change_number {
                write_guard.change_number = cn;
            }
        }

        self.summaries.add_changes(cn, &added, &removed);
        tracing::debug!(
            cn,
            added = added.len(),
            removed = removed.len(),
            "Applied split changes"
        );
    }

    /// Builds the payload that moves an SDK on `since` to the latest state.
    pub fn changes_since(&self, since: ChangeNumber) -> Result<SplitChanges, StorageError> {
        if since == INITIAL_CHANGE_NUMBER {
            let read_guard = self.snapshot.read();
            return Ok(SplitChanges {
                since,
                till: read_guard.change_number,
                splits: read_guard.splits.values().cloned().collect(),
            });
        }

        let (summary, till) = self.summaries.fetch_since(since)?;

        let mut splits = Vec::with_capacity(summary.updated.len() + summary.removed.len());
        {
            let read_guard = self.snapshot.read();
            splits.extend(
                summary
                    .updated
                    .keys()
                    .filter_map(|name| read_guard.splits.get(name).cloned()),
            );
        }
        splits.extend(build_archived_splits_for(&summary.removed));

        Ok(SplitChanges {
            since,
            till,
            splits,
        })
    }

    /// Registers an origin response for a `since` the summaries do not know,
    /// so later requests for it can be served locally.
    pub fn register_older_cn(&self, payload: &SplitChanges) {
        let (active, archived): (Vec<&Split>, Vec<&Split>) =
            payload.splits.iter().partition(|split| split.is_active());

        let added: Vec<_> = active.iter().map(|split| split.minimal_view()).collect();
        let removed: Vec<_> = archived.iter().map(|split| split.minimal_view()).collect();
        self.summaries
            .add_older_change(payload.till, &added, &removed);
    }

    /// Marks a flag as killed without waiting for the origin.
    pub fn kill_locally(&self, name: &str, default_treatment: &str, cn: ChangeNumber) {
        let mut write_guard = self.snapshot.write();
        if let Some(split) = write_guard.splits.get_mut(name)
            && split.change_number < cn
        {
            split.killed = true;
            split.default_treatment = default_treatment.to_string();
            split.change_number = cn;
        }
    }

    pub fn change_number(&self) -> ChangeNumber {
        self.snapshot.read().change_number
    }

    pub fn split(&self, name: &str) -> Option<Split> {
        self.snapshot.read().splits.get(name).cloned()
    }

    pub fn all(&self) -> Vec<Split> {
        self.snapshot.read().splits.values().cloned().collect()
    }

    pub fn split_names(&self) -> Vec<String> {
        self.snapshot.read().splits.keys().cloned().collect()
    }
}

/// SDKs only need the name and traffic type to drop a flag, so removed flags
/// are served as archived stubs.
pub fn build_archived_splits_for(removed: &HashMap<String, String>) -> Vec<Split> {
    removed
        .iter()
        .map(|(name, traffic_type)| Split {
            name: name.clone(),
            traffic_type_name: traffic_type.clone(),
            status: SplitStatus::Archived,
            change_number: 1,
            killed: false,
            default_treatment: "off".into(),
            extra: serde_json::Map::from_iter([
                ("trafficAllocation".to_string(), serde_json::Value::from(100)),
                ("trafficAllocationSeed".to_string(), serde_json::Value::from(0)),
                ("seed".to_string(), serde_json::Value::from(0)),
                ("algo".to_string(), serde_json::Value::from(1)),
                ("conditions".to_string(), serde_json::Value::Array(vec![])),
            ]),
        })
        .collect()
}
