//! Core traits for the host application and session storage.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::value::{HostValue, Kwargs};

/// Error raised by the host while reading an attribute or running a method.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("'{type_name}' object has no attribute '{name}'")]
    NoAttribute { type_name: String, name: String },
    #[error("{method}() takes {expected} positional argument(s) but {got} were given")]
    Arity {
        method: String,
        expected: usize,
        got: usize,
    },
    #[error("{method}(): argument '{argument}' must be {expected}, got {got}")]
    ArgumentType {
        method: String,
        argument: String,
        expected: String,
        got: String,
    },
    #[error("{0}")]
    Invalid(String),
    #[error("{message}")]
    Failed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl HostError {
    /// Shorthand for a missing attribute on `type_name`.
    pub fn no_attribute(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NoAttribute {
            type_name: type_name.into(),
            name: name.into(),
        }
    }
}

/// Capability interface over one live host object.
///
/// Implementations are only ever called on the host thread; the
/// `Send + Sync` bound exists so handles can be parked in shared
/// registries and handed back to it.
pub trait HostObject: Send + Sync {
    /// Type name as the host API knows it (e.g. `Sketch`).
    fn type_name(&self) -> &str;

    /// Read a property. `Ok(None)` means the object has no such property;
    /// callers then try [`HostObject::has_method`].
    ///
    /// # Errors
    /// Returns error if the property exists but cannot be read.
    fn get_attribute(&self, name: &str) -> Result<Option<HostValue>, HostError>;

    /// Whether `name` is a callable method on this object.
    fn has_method(&self, name: &str) -> bool;

    /// Invoke a method.
    ///
    /// # Errors
    /// Returns error if the method is unknown or the arguments are rejected.
    fn call_method(
        &self,
        name: &str,
        args: Vec<HostValue>,
        kwargs: Kwargs,
    ) -> Result<HostValue, HostError>;

    /// Whether this object is a type exposing a `create` factory.
    fn has_factory(&self) -> bool {
        false
    }

    /// Property names, used for diagnostics.
    fn attribute_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// JSON summary used when the object is reported to a caller.
    fn summary(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("$type".into(), Value::String(self.type_name().into()));
        for key in ["name", "count", "objectType"] {
            if let Ok(Some(value)) = self.get_attribute(key) {
                map.insert(key.into(), value.to_json());
                break;
            }
        }
        Value::Object(map)
    }
}

/// The host application as seen by the invocation engine.
pub trait Host: Send + Sync {
    /// Display name of the host.
    fn name(&self) -> &str;

    /// Well-known root aliases (`app`, `ui`, ...).
    fn root_aliases(&self) -> Vec<String>;

    /// Resolve a root alias against live application state.
    ///
    /// # Errors
    /// Returns error if the host cannot produce the root right now.
    fn root(&self, alias: &str) -> Result<Option<HostValue>, HostError>;

    /// Root used when a path names neither an alias nor a module.
    ///
    /// # Errors
    /// Returns error if the host cannot produce its application object.
    fn default_root(&self) -> Result<HostValue, HostError>;

    /// Fully-qualified module names the host exposes (e.g. `geom`).
    fn module_names(&self) -> Vec<String>;

    /// Locate a module by its fully-qualified name.
    fn module(&self, name: &str) -> Option<HostValue>;
}

/// Saved bindings of one execution session, in capture order.
pub type Bindings = IndexMap<String, Value>;

/// Summary of a stored session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Caller-chosen session identifier.
    pub id: String,
    /// Names of the saved bindings.
    pub bindings: Vec<String>,
    /// Number of executions that saved into this session.
    pub runs: u64,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Trait for execution-session storage backends.
///
/// Called from the host thread during script execution and from any thread
/// for listing, so implementations must be internally synchronised.
pub trait BindingStorage: Send + Sync {
    /// Load the bindings saved under `session`, if the session exists.
    ///
    /// # Errors
    /// Returns error if the backend fails.
    fn load(&self, session: &str) -> Result<Option<Bindings>, StorageError>;

    /// Replace the bindings saved under `session`, creating it lazily.
    ///
    /// # Errors
    /// Returns error if the backend fails.
    fn save(&self, session: &str, bindings: Bindings) -> Result<(), StorageError>;

    /// Drop one session. Returns whether it existed.
    ///
    /// # Errors
    /// Returns error if the backend fails.
    fn reset(&self, session: &str) -> Result<bool, StorageError>;

    /// Drop every session. Returns how many were dropped.
    ///
    /// # Errors
    /// Returns error if the backend fails.
    fn reset_all(&self) -> Result<usize, StorageError>;

    /// List stored sessions.
    ///
    /// # Errors
    /// Returns error if the backend fails.
    fn list(&self) -> Result<Vec<SessionSummary>, StorageError>;
}
