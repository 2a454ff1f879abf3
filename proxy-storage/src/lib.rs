//! Local state cache for the feature flag proxy.
//!
//! Answers SDK "what changed since change number X" requests from memory and
//! persists the cache to disk so a restarted proxy can serve immediately.

pub mod change_summaries;
pub mod config;
pub mod metrics_defs;
pub mod my_segments;
pub mod persistence;
pub mod snapshot;
pub mod snapshotter;
pub mod splits;
pub mod storage;
pub mod types;

pub use change_summaries::{FetchError, SplitChangesSummaries};
pub use my_segments::MySegmentsCache;
pub use snapshot::{Metadata, Snapshot, SnapshotError, StorageKind};
pub use storage::ProxyStorage;
pub use types::{ChangeNumber, ChangeSummary, Split, SplitChanges, SplitMinimalView};
