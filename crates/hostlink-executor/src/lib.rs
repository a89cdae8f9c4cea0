//! Host-side execution for hostlink.
//!
//! Provides:
//! - `Marshaler` / `HostThread` - FIFO work queue onto the host thread
//! - `Invoker` - reflective path resolution, argument construction, calls
//! - `ScriptEngine` - persistent scripted sessions on embedded JavaScript
//! - `HostTool` - the reverse-call router registered with the server

pub mod invoke;
pub mod marshal;
pub mod script;
pub mod tool;

pub use invoke::{
    ConstructorRegistry, ConstructorStrategy, InvokeError, InvokeFailure, InvokeOutcome, InvokeRequest, Invoker,
};
pub use marshal::{HostLoop, HostThread, MarshalError, Marshaler, WorkItem, channel};
pub use script::{EngineError, ScriptConfig, ScriptEngine, ScriptError, ScriptOutcome, ToolBridge};
pub use tool::{ClientBridge, HostState, HostTool};
