//! Host capability model and shared registries for hostlink.
//!
//! This crate provides the fundamental building blocks:
//! - `HostValue` / `HostObject` / `Host` - the capability interface the
//!   invocation engine walks
//! - `ContextStore` - process-wide label registry for invocation results
//! - `BindingStorage` - storage trait for execution-session bindings
//! - `demo::DemoHost` - in-process host for the binary and tests

pub mod context;
#[cfg(feature = "demo")]
pub mod demo;
pub mod traits;
pub mod value;

pub use context::ContextStore;
pub use traits::{BindingStorage, Bindings, Host, HostError, HostObject, SessionSummary, StorageError};
pub use value::{BoundMethod, HostValue, Kwargs, ObjectRef};
