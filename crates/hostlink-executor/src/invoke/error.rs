//! Invocation errors and their diagnostic views.

use hostlink_core::HostError;
use thiserror::Error;

/// Why an invocation failed.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("api_path is required")]
    EmptyPath,
    #[error("Stored object '{label}' not found. Available: {available:?}")]
    StoredObjectMissing { label: String, available: Vec<String> },
    #[error("Path '{path}' not resolved at '{segment}': {reason}")]
    PathNotFound {
        path: String,
        segment: String,
        reason: String,
        #[source]
        source: Option<Box<HostError>>,
    },
    #[error("Cannot construct '{type_name}': {reason}")]
    UnsupportedConstructor { type_name: String, reason: String },
    #[error("{target}() raised: {source}")]
    InvocationFailed {
        target: String,
        #[source]
        source: Box<HostError>,
    },
    #[error("Argument '{position}' could not be resolved")]
    Argument {
        position: String,
        #[source]
        source: Box<InvokeError>,
    },
}

impl InvokeError {
    pub(crate) fn path_not_found(path: &str, segment: &str, reason: impl Into<String>) -> Self {
        Self::PathNotFound {
            path: path.to_string(),
            segment: segment.to_string(),
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn failed(target: impl Into<String>, source: HostError) -> Self {
        Self::InvocationFailed {
            target: target.into(),
            source: Box::new(source),
        }
    }

    /// Stable category name reported to callers.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyPath => "InvalidRequest",
            Self::StoredObjectMissing { .. } => "StoredObjectMissing",
            Self::PathNotFound { .. } => "PathNotFound",
            Self::UnsupportedConstructor { .. } => "UnsupportedConstructor",
            Self::InvocationFailed { .. } => "InvocationFailed",
            Self::Argument { source, .. } => source.kind(),
        }
    }

    /// The path segment, label or call target where resolution stopped.
    #[must_use]
    pub fn failing_segment(&self) -> Option<String> {
        match self {
            Self::EmptyPath => None,
            Self::StoredObjectMissing { label, .. } => Some(format!("${label}")),
            Self::PathNotFound { segment, .. } => Some(segment.clone()),
            Self::UnsupportedConstructor { type_name, .. } => Some(type_name.clone()),
            Self::InvocationFailed { target, .. } => Some(target.clone()),
            Self::Argument { source, .. } => source.failing_segment(),
        }
    }

    /// This error followed by every source below it.
    #[must_use]
    pub fn causes(&self) -> Vec<String> {
        let mut causes = vec![self.to_string()];
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            causes.push(err.to_string());
            source = err.source();
        }
        causes
    }

    /// Suggestions for the caller, keyed off the failure text.
    #[must_use]
    pub fn hints(&self) -> Vec<String> {
        let text = self.causes().join("\n");
        let mut hints = Vec::new();
        if text.contains("has no attribute") || text.contains("has no method") {
            hints.push("The object doesn't have the requested attribute or method".into());
            hints.push("Check the host API documentation for the correct member names".into());
        }
        if text.contains("positional argument") {
            hints.push("Wrong number of arguments provided".into());
            hints.push("Check the API signature for required parameters".into());
        }
        if text.contains("resolved to null") {
            hints.push("An intermediate object in the path was null".into());
            hints.push("Check that the document or design is active and valid".into());
        }
        if matches!(self, Self::StoredObjectMissing { .. }) {
            hints.push("Store the object first with store_as, or list labels with list_context".into());
        }
        hints
    }
}
