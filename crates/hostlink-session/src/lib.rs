//! Execution-session storage for hostlink scripted runs.
//!
//! Provides:
//! - `SessionManager` - decides which bindings a run owns and records them
//! - Storage implementations (memory)

pub mod manager;
pub mod storage;

pub use manager::{Captured, ManagerError, SessionManager};
pub use storage::MemoryBindingStorage;
