use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 3600;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("max_checkpoints must be greater than 0")]
    InvalidMaxCheckpoints,

    #[error("snapshot interval_secs must be greater than 0")]
    InvalidSnapshotInterval,

    #[error("filesystem snapshot path cannot be empty")]
    EmptySnapshotPath,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum SnapshotStoreType {
    Filesystem { path: PathBuf },
    None,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct SnapshotConfig {
    #[serde(flatten)]
    pub store: SnapshotStoreType,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Pre-populate the caches from the stored snapshot at startup.
    #[serde(default = "default_true")]
    pub restore_on_start: bool,
}

fn default_interval_secs() -> u64 {
    DEFAULT_SNAPSHOT_INTERVAL_SECS
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Default, Deserialize, Debug, PartialEq)]
pub struct Config {
    /// Upper bound on retained checkpoints. Unbounded when not set.
    pub max_checkpoints: Option<usize>,
    pub snapshot: Option<SnapshotConfig>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_checkpoints == Some(0) {
            return Err(ValidationError::InvalidMaxCheckpoints);
        }

        if let Some(snapshot) = &self.snapshot {
            if snapshot.interval_secs == 0 {
                return Err(ValidationError::InvalidSnapshotInterval);
            }
            if let SnapshotStoreType::Filesystem { path } = &snapshot.store
                && path.as_os_str().is_empty()
            {
                return Err(ValidationError::EmptySnapshotPath);
            }
        }

        Ok(())
    }
}
