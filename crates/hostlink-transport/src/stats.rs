//! Counters for frames the client drops instead of failing on.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-lifetime counters, shared by the transport reader, the
/// correlator, the dispatcher and the supervisor.
#[derive(Debug, Default)]
pub struct ClientStats {
    late_responses: AtomicU64,
    unknown_tool_calls: AtomicU64,
    malformed_frames: AtomicU64,
    reconnects: AtomicU64,
}

/// Point-in-time copy of [`ClientStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub late_responses: u64,
    pub unknown_tool_calls: u64,
    pub malformed_frames: u64,
    pub reconnects: u64,
}

impl ClientStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Response for an id with no waiting caller (late, duplicate or unknown).
    pub fn record_late_response(&self) {
        self.late_responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Reverse call addressed to a tool name we did not register.
    pub fn record_unknown_tool_call(&self) {
        self.unknown_tool_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// A `Connected` entry after the first one.
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            late_responses: self.late_responses.load(Ordering::Relaxed),
            unknown_tool_calls: self.unknown_tool_calls.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}
