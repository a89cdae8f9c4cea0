//! Duplex transport for hostlink.
//!
//! Provides:
//! - Wire protocol (JSON-RPC requests, reverse calls, tool replies)
//! - SSE parser and the [`SseConnector`] transport
//! - [`Correlator`] matching responses to waiting requests
//! - Reconnect [`supervisor`] with bounded exponential backoff
//! - [`Client`] facade with a FIFO reverse-call dispatcher
//! - In-memory [`ChannelConnector`] for tests

pub mod client;
pub mod config;
pub mod correlation;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod memory;
pub mod protocol;
pub mod sse;
pub mod stats;
pub mod supervisor;
pub mod transport;

pub use client::Client;
pub use config::{ClientConfig, ToolRegistration};
pub use correlation::{Correlator, PendingRequest};
pub use discovery::{Discovery, Endpoint, StaticDiscovery};
pub use dispatch::{CallContext, ToolHandler};
pub use error::{ClientError, FrameError, RpcError, TransportError};
pub use memory::{ChannelConnector, ServerEnd};
pub use protocol::{Inbound, ReverseCall, ToolContent, ToolReply};
pub use stats::{ClientStats, StatsSnapshot};
pub use supervisor::{Backoff, Connection, SupervisorState};
pub use transport::{Connector, Opened, SseConnector, Transport};
