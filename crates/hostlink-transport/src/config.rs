//! Client tuning and tool registration settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeouts, backoff and liveness settings for the [`crate::Client`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeout for ordinary correlated requests.
    pub request_timeout_secs: u64,
    /// Timeout for cross-tool calls, which may run long.
    pub tool_call_timeout_secs: u64,
    /// Timeout for the registration request.
    pub registration_timeout_secs: u64,
    /// First reconnect delay.
    pub backoff_min_secs: u64,
    /// Reconnect delay ceiling.
    pub backoff_max_secs: u64,
    /// How often a connected supervisor polls the reader.
    pub liveness_interval_ms: u64,
    /// How long to wait for the server's endpoint announcement.
    pub session_endpoint_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            tool_call_timeout_secs: 120,
            registration_timeout_secs: 10,
            backoff_min_secs: 2,
            backoff_max_secs: 60,
            liveness_interval_ms: 1000,
            session_endpoint_timeout_secs: 10,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub const fn tool_call_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_call_timeout_secs)
    }

    #[must_use]
    pub const fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_secs)
    }

    #[must_use]
    pub const fn backoff_min(&self) -> Duration {
        Duration::from_secs(self.backoff_min_secs)
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs.max(self.backoff_min_secs))
    }

    #[must_use]
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms.max(1))
    }

    #[must_use]
    pub const fn session_endpoint_timeout(&self) -> Duration {
        Duration::from_secs(self.session_endpoint_timeout_secs)
    }
}

/// How this client announces itself to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolRegistration {
    /// Tool name reverse calls will be addressed to.
    pub name: String,
    pub description: String,
    /// Documentation shown to the agent.
    pub readme: String,
}

impl Default for ToolRegistration {
    fn default() -> Self {
        Self {
            name: "hostlink".into(),
            description: "Invoke the host application's API and run persistent scripts".into(),
            readme: String::new(),
        }
    }
}
