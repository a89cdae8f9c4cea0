//! In-memory binding storage.

use std::{
    collections::HashMap,
    sync::RwLock,
    time::{SystemTime, UNIX_EPOCH},
};

use hostlink_core::{BindingStorage, Bindings, SessionSummary, StorageError};

struct StoredSession {
    bindings: Bindings,
    runs: u64,
    created_at: i64,
    updated_at: i64,
}

/// In-memory storage implementation.
///
/// Sessions live as long as the process; a host-session restart starts
/// from nothing.
pub struct MemoryBindingStorage {
    sessions: RwLock<HashMap<String, StoredSession>>,
}

impl MemoryBindingStorage {
    /// Create a new in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBindingStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl BindingStorage for MemoryBindingStorage {
    fn load(&self, session: &str) -> Result<Option<Bindings>, StorageError> {
        Ok(self
            .sessions
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(session)
            .map(|s| s.bindings.clone()))
    }

    fn save(&self, session: &str, bindings: Bindings) -> Result<(), StorageError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        let timestamp = now();
        let stored = sessions
            .entry(session.to_string())
            .or_insert_with(|| StoredSession {
                bindings: Bindings::new(),
                runs: 0,
                created_at: timestamp,
                updated_at: timestamp,
            });

        stored.bindings = bindings;
        stored.runs += 1;
        stored.updated_at = timestamp;

        Ok(())
    }

    fn reset(&self, session: &str) -> Result<bool, StorageError> {
        Ok(self
            .sessions
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .remove(session)
            .is_some())
    }

    fn reset_all(&self) -> Result<usize, StorageError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let count = sessions.len();
        sessions.clear();
        Ok(count)
    }

    fn list(&self) -> Result<Vec<SessionSummary>, StorageError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        let mut result: Vec<SessionSummary> = sessions
            .iter()
            .map(|(id, s)| SessionSummary {
                id: id.clone(),
                bindings: s.bindings.keys().cloned().collect(),
                runs: s.runs,
                created_at: s.created_at,
                updated_at: s.updated_at,
            })
            .collect();

        // Most recently used first, ties by id
        result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_save_load_reset() {
        let storage = MemoryBindingStorage::new();
        assert!(storage.load("s1").unwrap().is_none());

        let mut bindings = Bindings::new();
        bindings.insert("x".into(), json!(1));
        storage.save("s1", bindings).unwrap();

        let loaded = storage.load("s1").unwrap().unwrap();
        assert_eq!(loaded["x"], json!(1));
        assert!(storage.load("s2").unwrap().is_none());

        assert!(storage.reset("s1").unwrap());
        assert!(!storage.reset("s1").unwrap());
    }

    #[test]
    fn test_list_counts_runs() {
        let storage = MemoryBindingStorage::new();
        storage.save("a", Bindings::new()).unwrap();
        storage.save("a", Bindings::new()).unwrap();
        storage.save("b", Bindings::new()).unwrap();

        let list = storage.list().unwrap();
        assert_eq!(list.len(), 2);
        let a = list.iter().find(|s| s.id == "a").unwrap();
        assert_eq!(a.runs, 2);
        assert_eq!(storage.reset_all().unwrap(), 2);
        assert!(storage.list().unwrap().is_empty());
    }
}
