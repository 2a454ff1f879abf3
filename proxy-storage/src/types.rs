use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Version identifier for the origin's flag configuration.
pub type ChangeNumber = i64;

/// Sentinel meaning no updates have been seen yet.
pub const INITIAL_CHANGE_NUMBER: ChangeNumber = -1;

pub type SplitName = String;
pub type TrafficType = String;

/// The subset of a flag definition needed to compute set-membership diffs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SplitMinimalView {
    pub name: SplitName,
    pub traffic_type: TrafficType,
}

impl SplitMinimalView {
    pub fn new<N, T>(name: N, traffic_type: T) -> Self
    where
        N: Into<String>,
        T: Into<String>,
    {
        SplitMinimalView {
            name: name.into(),
            traffic_type: traffic_type.into(),
        }
    }
}

/// Net diff between a checkpoint's baseline and the current head.
/// A name is never present in both `updated` and `removed`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub updated: HashMap<SplitName, TrafficType>,
    pub removed: HashMap<SplitName, TrafficType>,
}

impl ChangeSummary {
    /// Builds a summary directly from lists of added and removed flags, without merging.
    pub fn from_views(added: &[SplitMinimalView], removed: &[SplitMinimalView]) -> Self {
        let mut summary = ChangeSummary::default();
        for view in added {
            summary
                .updated
                .insert(view.name.clone(), view.traffic_type.clone());
        }
        for view in removed {
            summary.updated.remove(&view.name);
            summary
                .removed
                .insert(view.name.clone(), view.traffic_type.clone());
        }
        summary
    }

    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty()
    }

    /// Folds a new update into this summary.
    ///
    /// Anything added since the checkpoint and then removed cancels out, so a
    /// name only lands in `removed` when it was not recorded as updated.
    pub(crate) fn apply_change(
        &mut self,
        added: &[SplitMinimalView],
        removed: &[SplitMinimalView],
    ) {
        for view in added {
            self.removed.remove(&view.name);
            self.updated
                .insert(view.name.clone(), view.traffic_type.clone());
        }

        for view in removed {
            if self.updated.remove(&view.name).is_none() {
                self.removed
                    .insert(view.name.clone(), view.traffic_type.clone());
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SplitStatus {
    Active,
    Archived,
}

/// Full flag definition as served to SDKs. Targeting rules and any other
/// fields the proxy does not interpret are kept verbatim in `extra`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    pub name: SplitName,
    pub traffic_type_name: TrafficType,
    pub status: SplitStatus,
    pub change_number: ChangeNumber,
    #[serde(default)]
    pub killed: bool,
    #[serde(default)]
    pub default_treatment: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Split {
    pub fn minimal_view(&self) -> SplitMinimalView {
        SplitMinimalView::new(&self.name, &self.traffic_type_name)
    }

    pub fn is_active(&self) -> bool {
        self.status == SplitStatus::Active
    }
}

/// Response to an SDK "changes since" request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitChanges {
    pub since: ChangeNumber,
    pub till: ChangeNumber,
    pub splits: Vec<Split>,
}

pub fn to_minimal_views(splits: &[Split]) -> Vec<SplitMinimalView> {
    splits.iter().map(Split::minimal_view).collect()
}
