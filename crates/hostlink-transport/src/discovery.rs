//! Endpoint discovery seam.
//!
//! Finding the server (and its bearer token) is a collaborator concern; the
//! supervisor only needs something that yields an [`Endpoint`] before each
//! connection attempt.

use async_trait::async_trait;

use crate::error::ClientError;

/// Where to connect and how to authenticate.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Base URL; the event stream lives at `{base_url}/sse`.
    pub base_url: String,
    /// Bearer token, sent on every request.
    pub token: Option<String>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Yields the endpoint to use for the next connection attempt.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// # Errors
    /// Returns error if no endpoint is currently available.
    async fn discover(&self) -> Result<Endpoint, ClientError>;
}

/// Discovery returning a fixed endpoint.
#[derive(Debug, Clone)]
pub struct StaticDiscovery {
    endpoint: Endpoint,
}

impl StaticDiscovery {
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            endpoint: Endpoint {
                base_url: base_url.into(),
                token,
            },
        }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn discover(&self) -> Result<Endpoint, ClientError> {
        if self.endpoint.base_url.is_empty() {
            return Err(ClientError::Discovery("no server URL configured".into()));
        }
        Ok(self.endpoint.clone())
    }
}
