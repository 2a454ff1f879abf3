use parking_lot::RwLock;
use std::collections::HashMap;

/// Per-user segment membership. Keys that belong to no segment are not tracked.
#[derive(Default)]
pub struct MySegmentsCache {
    by_key: RwLock<HashMap<String, Vec<String>>>,
}

impl MySegmentsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: HashMap<String, Vec<String>>) -> Self {
        let by_key = state
            .into_iter()
            .filter(|(_, segments)| !segments.is_empty())
            .collect();
        MySegmentsCache {
            by_key: RwLock::new(by_key),
        }
    }

    pub fn state(&self) -> HashMap<String, Vec<String>> {
        self.by_key.read().clone()
    }

    pub fn add_segment_to_user(&self, key: &str, segment: &str) {
        let mut write_guard = self.by_key.write();
        add_segment(&mut write_guard, key, segment);
    }

    pub fn remove_segment_for_user(&self, key: &str, segment: &str) {
        let mut write_guard = self.by_key.write();
        remove_segment(&mut write_guard, key, segment);
    }

    /// Applies a membership notification for one segment in a single critical section.
    pub fn update<A, R>(&self, segment: &str, added: A, removed: R)
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        R: IntoIterator,
        R::Item: AsRef<str>,
    {
        let mut write_guard = self.by_key.write();
        for key in added {
            add_segment(&mut write_guard, key.as_ref(), segment);
        }
        for key in removed {
            remove_segment(&mut write_guard, key.as_ref(), segment);
        }
    }

    /// Returns the segments `key` belongs to. Empty for unknown keys.
    pub fn segments_for_user(&self, key: &str) -> Vec<String> {
        self.by_key.read().get(key).cloned().unwrap_or_default()
    }

    /// Number of keys that belong to at least one segment.
    pub fn key_count(&self) -> usize {
        self.by_key.read().len()
    }
}

fn add_segment(by_key: &mut HashMap<String, Vec<String>>, key: &str, segment: &str) {
    let segments = by_key.entry(key.to_string()).or_default();
    if !segments.iter().any(|s| s == segment) {
        segments.push(segment.to_string());
    }
}

fn remove_segment(by_key: &mut HashMap<String, Vec<String>>, key: &str, segment: &str) {
    let Some(segments) = by_key.get_mut(key) else {
        return;
    };
    segments.retain(|s| s != segment);
    if segments.is_empty() {
        by_key.remove(key);
    }
}
