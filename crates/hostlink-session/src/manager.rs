//! Session manager deciding which bindings a scripted run owns.

use std::collections::HashSet;

use hostlink_core::{BindingStorage, Bindings, SessionSummary, StorageError};
use serde_json::Value;

use crate::storage::MemoryBindingStorage;

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// A global binding as observed after a run.
#[derive(Debug, Clone)]
pub enum Captured {
    /// Plain data, recorded as JSON.
    Data(Value),
    /// A function. Functions stay in the shared environment and are never
    /// owned by a session.
    Callable,
    /// A value with no JSON form (`undefined`, `BigInt`, non-finite numbers,
    /// cyclic graphs). Owned like data; recorded by its description.
    Opaque(String),
}

/// Orchestrates execution sessions on top of a [`BindingStorage`].
///
/// Session ownership rule: after a persistent run under `S`, a global
/// belongs to `S` when it is not excluded, not callable, and either did not
/// exist before the run or was already owned by `S`.
///
/// The storage holds the JSON record of each session's bindings. The live
/// values stay with the engine that produced them.
pub struct SessionManager<S = MemoryBindingStorage>
where
    S: BindingStorage,
{
    storage: S,
    excluded: HashSet<String>,
}

impl<S> SessionManager<S>
where
    S: BindingStorage,
{
    /// Create a new session manager.
    #[must_use]
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            excluded: HashSet::new(),
        }
    }

    /// Add names that are never captured (host handles, infrastructure).
    #[must_use]
    pub fn with_exclusions<I>(mut self, names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.excluded.extend(names.into_iter().map(Into::into));
        self
    }

    /// Exclude one more name.
    pub fn exclude(&mut self, name: impl Into<String>) {
        self.excluded.insert(name.into());
    }

    /// Whether `name` is never captured. Double-underscore names are
    /// reserved for infrastructure.
    #[must_use]
    pub fn is_excluded(&self, name: &str) -> bool {
        name.starts_with("__") || self.excluded.contains(name)
    }

    /// Whether the session owns the non-callable global `name` after a run.
    ///
    /// `baseline` holds the global names that existed before the session's
    /// bindings were re-installed; `previous` the names it owned before.
    #[must_use]
    pub fn owns(&self, name: &str, baseline: &HashSet<String>, previous: &HashSet<String>) -> bool {
        !self.is_excluded(name) && (!baseline.contains(name) || previous.contains(name))
    }

    /// Recorded bindings of `session_id`; empty for an unknown session.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub fn snapshot(&self, session_id: &str) -> Result<Bindings, ManagerError> {
        Ok(self.storage.load(session_id)?.unwrap_or_default())
    }

    /// Record the bindings owned by `session_id` after a successful run and
    /// return them.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub fn capture<I>(
        &self,
        session_id: &str,
        baseline: &HashSet<String>,
        previous: &HashSet<String>,
        globals: I,
    ) -> Result<Bindings, ManagerError>
    where
        I: IntoIterator<Item = (String, Captured)>,
    {
        let mut saved = Bindings::new();
        for (name, value) in globals {
            if !self.owns(&name, baseline, previous) {
                continue;
            }
            match value {
                Captured::Data(data) => {
                    saved.insert(name, data);
                }
                Captured::Callable => {}
                Captured::Opaque(kind) => {
                    tracing::debug!(session_id, %name, %kind, "Binding has no JSON form");
                    saved.insert(name, Value::String(format!("<{kind}>")));
                }
            }
        }

        tracing::debug!(
            session_id,
            bindings = ?saved.keys().collect::<Vec<_>>(),
            "Saving session bindings"
        );
        self.storage.save(session_id, saved.clone())?;
        Ok(saved)
    }

    /// Names currently saved under `session_id`.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub fn binding_names(&self, session_id: &str) -> Result<Vec<String>, ManagerError> {
        Ok(self
            .storage
            .load(session_id)?
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default())
    }

    /// Reset one session, or all of them when `session_id` is `None`.
    /// Returns how many sessions were dropped.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub fn reset(&self, session_id: Option<&str>) -> Result<usize, ManagerError> {
        let dropped = match session_id {
            Some(id) => usize::from(self.storage.reset(id)?),
            None => self.storage.reset_all()?,
        };
        tracing::info!(?session_id, dropped, "Reset execution sessions");
        Ok(dropped)
    }

    /// List stored sessions.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub fn list(&self) -> Result<Vec<SessionSummary>, ManagerError> {
        Ok(self.storage.list()?)
    }
}

impl Default for SessionManager<MemoryBindingStorage> {
    fn default() -> Self {
        Self::new(MemoryBindingStorage::new())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn globals(pairs: &[(&str, Captured)]) -> Vec<(String, Captured)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_capture_skips_baseline_excluded_and_callables() {
        let manager = SessionManager::default().with_exclusions(["host"]);
        let baseline: HashSet<String> = ["shared".to_string(), "host".to_string()].into();

        let saved = manager
            .capture(
                "s1",
                &baseline,
                &HashSet::new(),
                globals(&[
                    ("shared", Captured::Data(json!(1))),
                    ("host", Captured::Data(json!({}))),
                    ("__return__", Captured::Data(json!(2))),
                    ("helper", Captured::Callable),
                    ("x", Captured::Data(json!(3))),
                ]),
            )
            .unwrap();

        assert_eq!(saved.keys().collect::<Vec<_>>(), vec!["x"]);
        assert_eq!(manager.snapshot("s1").unwrap()["x"], json!(3));
    }

    #[test]
    fn test_previous_bindings_stay_owned() {
        let manager = SessionManager::default();
        let previous: HashSet<String> = ["count".to_string()].into();
        // Leaked into the baseline; still owned because it was saved before.
        let baseline = previous.clone();

        assert!(manager.owns("count", &baseline, &previous));
        assert!(!manager.owns("count", &baseline, &HashSet::new()));
        let saved = manager
            .capture(
                "s1",
                &baseline,
                &previous,
                globals(&[("count", Captured::Data(json!(2)))]),
            )
            .unwrap();
        assert_eq!(saved["count"], json!(2));
    }

    #[test]
    fn test_opaque_values_are_recorded_by_description() {
        let manager = SessionManager::default();
        let saved = manager
            .capture(
                "s1",
                &HashSet::new(),
                &HashSet::new(),
                globals(&[
                    ("big", Captured::Opaque("bigint".into())),
                    ("n", Captured::Data(json!(3))),
                ]),
            )
            .unwrap();
        assert_eq!(saved.keys().collect::<Vec<_>>(), vec!["big", "n"]);
        assert_eq!(saved["big"], json!("<bigint>"));
    }

    #[test]
    fn test_sessions_are_independent() {
        let manager = SessionManager::default();
        manager
            .capture("s1", &HashSet::new(), &HashSet::new(), globals(&[("a", Captured::Data(json!(1)))]))
            .unwrap();
        assert!(manager.snapshot("s2").unwrap().is_empty());
        assert_eq!(manager.binding_names("s1").unwrap(), vec!["a".to_string()]);
        assert_eq!(manager.reset(None).unwrap(), 1);
        assert!(manager.snapshot("s1").unwrap().is_empty());
    }
}
