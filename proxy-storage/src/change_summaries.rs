use crate::metrics_defs::{CHECKPOINT_COUNT, CHECKPOINT_EVICTED, FETCH_SINCE_HIT, FETCH_SINCE_MISS};
use crate::types::{ChangeNumber, ChangeSummary, INITIAL_CHANGE_NUMBER, SplitMinimalView};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shared::{counter, gauge};
use std::collections::HashMap;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum FetchError {
    #[error("unknown change number {since}, current is {current}")]
    UnknownChangeNumber {
        since: ChangeNumber,
        current: ChangeNumber,
    },
}

/// Persistable form of the summaries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummariesState {
    pub current_cn: ChangeNumber,
    pub changes: HashMap<ChangeNumber, ChangeSummary>,
}

impl Default for SummariesState {
    fn default() -> Self {
        SummariesState {
            current_cn: INITIAL_CHANGE_NUMBER,
            changes: HashMap::from([(INITIAL_CHANGE_NUMBER, ChangeSummary::default())]),
        }
    }
}

/// Keeps one net diff per known change number so that an SDK on any of them
/// can be brought up to the latest state without hitting the origin.
///
/// The entry for the current change number is always present and empty.
pub struct SplitChangesSummaries {
    // Bound on retained checkpoints, not counting -1. None keeps every checkpoint.
    max_checkpoints: Option<usize>,
    data: RwLock<SummariesState>,
}

impl Default for SplitChangesSummaries {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SplitChangesSummaries {
    pub fn new(max_checkpoints: Option<usize>) -> Self {
        SplitChangesSummaries {
            max_checkpoints,
            data: RwLock::new(SummariesState::default()),
        }
    }

    /// Rebuilds the summaries from a persisted state. The head checkpoint is
    /// reset to empty and the -1 checkpoint is restored if missing.
    pub fn from_state(mut state: SummariesState, max_checkpoints: Option<usize>) -> Self {
        state.changes.insert(state.current_cn, ChangeSummary::default());
        state
            .changes
            .entry(INITIAL_CHANGE_NUMBER)
            .or_default();

        let summaries = SplitChangesSummaries {
            max_checkpoints,
            data: RwLock::new(state),
        };
        summaries.enforce_bound();
        summaries
    }

    pub fn state(&self) -> SummariesState {
        self.data.read().clone()
    }

    /// Registers a new head and folds the changes into every known checkpoint.
    /// Stale or duplicate change numbers are ignored.
    pub fn add_changes(
        &self,
        cn: ChangeNumber,
        added: &[SplitMinimalView],
        removed: &[SplitMinimalView],
    ) {
        let mut write_guard = self.data.write();

        if cn <= write_guard.current_cn {
            tracing::debug!(
                cn,
                current = write_guard.current_cn,
                "Ignoring stale split changes"
            );
            return;
        }

        for summary in write_guard.changes.values_mut() {
            summary.apply_change(added, removed);
        }

        write_guard.current_cn = cn;
        self.make_room(&mut write_guard, cn);
        write_guard.changes.insert(cn, ChangeSummary::default());

        gauge!(CHECKPOINT_COUNT).set(write_guard.changes.len() as f64);
    }

    /// Seeds a checkpoint older than the current head with a diff computed by
    /// the origin. The existing entry for `cn`, if any, is replaced.
    pub fn add_older_change(
        &self,
        cn: ChangeNumber,
        added: &[SplitMinimalView],
        removed: &[SplitMinimalView],
    ) {
        let mut write_guard = self.data.write();

        if cn >= write_guard.current_cn {
            // Would overwrite data at least as fresh as ours
            return;
        }

        if !write_guard.changes.contains_key(&cn) && !self.make_room(&mut write_guard, cn) {
            return;
        }

        write_guard
            .changes
            .insert(cn, ChangeSummary::from_views(added, removed));

        gauge!(CHECKPOINT_COUNT).set(write_guard.changes.len() as f64);
    }

    /// Returns the changes needed to move from `since` to the current head,
    /// along with the current change number.
    pub fn fetch_since(
        &self,
        since: ChangeNumber,
    ) -> Result<(ChangeSummary, ChangeNumber), FetchError> {
        let read_guard = self.data.read();
        match read_guard.changes.get(&since) {
            Some(summary) => {
                counter!(FETCH_SINCE_HIT).increment(1);
                Ok((summary.clone(), read_guard.current_cn))
            }
            None => {
                counter!(FETCH_SINCE_MISS).increment(1);
                Err(FetchError::UnknownChangeNumber {
                    since,
                    current: read_guard.current_cn,
                })
            }
        }
    }

    pub fn current_change_number(&self) -> ChangeNumber {
        self.data.read().current_cn
    }

    pub fn checkpoint_count(&self) -> usize {
        self.data.read().changes.len()
    }

    /// Evicts the oldest checkpoints until there is room for `incoming`.
    /// Returns false when an older `incoming` would itself be the oldest
    /// candidate and should not be stored. -1 and the head are never evicted.
    fn make_room(&self, state: &mut SummariesState, incoming: ChangeNumber) -> bool {
        let Some(max) = self.max_checkpoints else {
            return true;
        };

        while state.changes.len() > max {
            let oldest = state
                .changes
                .keys()
                .copied()
                .filter(|cn| *cn != INITIAL_CHANGE_NUMBER && *cn != state.current_cn)
                .min();

            match oldest {
                Some(oldest) if oldest < incoming => {
                    state.changes.remove(&oldest);
                    counter!(CHECKPOINT_EVICTED).increment(1);
                }
                _ => return incoming >= state.current_cn,
            }
        }
        true
    }

    fn enforce_bound(&self) {
        let Some(max) = self.max_checkpoints else {
            return;
        };
        let mut write_guard = self.data.write();
        let current = write_guard.current_cn;
        let mut candidates: Vec<ChangeNumber> = write_guard
            .changes
            .keys()
            .copied()
            .filter(|cn| *cn != INITIAL_CHANGE_NUMBER && *cn != current)
            .collect();
        candidates.sort_unstable();

        let excess = (write_guard.changes.len() - 1).saturating_sub(max);
        for cn in candidates.into_iter().take(excess) {
            write_guard.changes.remove(&cn);
        }
    }
}
