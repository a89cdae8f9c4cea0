//! Label registry for objects produced by earlier invocations.

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::value::HostValue;

/// Process-wide mapping from caller-chosen labels to host values.
///
/// Entries keep write order; writing an existing label moves it to the end.
/// Nothing is evicted implicitly: a label may outlive the host object it
/// points at, and detecting that is the caller's job.
#[derive(Default)]
pub struct ContextStore {
    entries: RwLock<IndexMap<String, HostValue>>,
}

impl ContextStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `label`, returning the previous value.
    pub fn insert(&self, label: impl Into<String>, value: HostValue) -> Option<HostValue> {
        let label = label.into();
        let mut entries = self.entries.write();
        let previous = entries.shift_remove(&label);
        entries.insert(label, value);
        previous
    }

    /// Look up a label.
    #[must_use]
    pub fn get(&self, label: &str) -> Option<HostValue> {
        self.entries.read().get(label).cloned()
    }

    /// Whether a label is present.
    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.entries.read().contains_key(label)
    }

    /// Remove one label.
    pub fn remove(&self, label: &str) -> Option<HostValue> {
        self.entries.write().shift_remove(label)
    }

    /// Labels in write order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every entry, returning how many there were.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let count = entries.len();
        entries.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins_and_moves_to_end() {
        let store = ContextStore::new();
        store.insert("a", HostValue::Int(1));
        store.insert("b", HostValue::Int(2));
        let previous = store.insert("a", HostValue::Int(3));

        assert_eq!(previous.and_then(|v| v.as_i64()), Some(1));
        assert_eq!(store.labels(), vec!["b".to_string(), "a".to_string()]);
        assert_eq!(store.get("a").and_then(|v| v.as_i64()), Some(3));
    }

    #[test]
    fn test_clear_reports_count() {
        let store = ContextStore::new();
        store.insert("x", HostValue::Null);
        store.insert("y", HostValue::Null);
        assert_eq!(store.clear(), 2);
        assert!(store.is_empty());
        assert!(store.get("x").is_none());
    }
}
