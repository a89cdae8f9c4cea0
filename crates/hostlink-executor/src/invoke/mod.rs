//! Reflective invocation engine.
//!
//! Resolves a dotted `api_path` against the host, resolves and constructs
//! arguments, performs the call and optionally stores the result in the
//! [`ContextStore`] under a label.
//!
//! Path origins, tried in order:
//! - `$label.rest` - a value stored by an earlier invocation
//! - `module.rest` - the longest host module name prefixing the path
//! - `alias.rest` - a well-known root alias (`app`, `ui`, ...)
//! - anything else starts from the host's default root
//!
//! A segment written `name()` is called with no arguments mid-path. The
//! final segment is called with the request's arguments when it names a
//! method; a property is returned as is.

mod constructors;
mod error;
pub mod report;

use std::sync::Arc;

use hostlink_core::{BoundMethod, ContextStore, Host, HostValue, Kwargs};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use constructors::{ConstructorRegistry, ConstructorStrategy};
pub use error::InvokeError;

/// A generic invocation as received from the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokeRequest {
    pub api_path: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub store_as: Option<String>,
    pub return_properties: Vec<String>,
}

impl InvokeRequest {
    #[must_use]
    pub fn new(api_path: impl Into<String>) -> Self {
        Self {
            api_path: api_path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn store_as(mut self, label: impl Into<String>) -> Self {
        self.store_as = Some(label.into());
        self
    }
}

/// Successful invocation.
#[derive(Debug, Clone)]
pub struct InvokeOutcome {
    pub value: HostValue,
    /// Type name of `value`, for caller introspection.
    pub type_name: String,
    pub stored_as: Option<String>,
}

/// Failed invocation with the arguments as far as they were resolved.
#[derive(Debug)]
pub struct InvokeFailure {
    pub error: InvokeError,
    pub resolved_args: Option<Vec<Value>>,
    pub resolved_kwargs: Option<Map<String, Value>>,
}

impl From<InvokeError> for Box<InvokeFailure> {
    fn from(error: InvokeError) -> Self {
        Box::new(InvokeFailure {
            error,
            resolved_args: None,
            resolved_kwargs: None,
        })
    }
}

enum Origin<'a> {
    Label(&'a str),
    Module(&'a str),
    Alias(&'a str),
    DefaultRoot,
}

/// The invocation engine. Cheap to clone; only ever used on the host thread.
#[derive(Clone)]
pub struct Invoker {
    host: Arc<dyn Host>,
    context: Arc<ContextStore>,
    constructors: Arc<ConstructorRegistry>,
}

impl Invoker {
    #[must_use]
    pub fn new(host: Arc<dyn Host>, context: Arc<ContextStore>) -> Self {
        Self {
            host,
            context,
            constructors: Arc::new(ConstructorRegistry::default()),
        }
    }

    #[must_use]
    pub fn with_constructors(mut self, constructors: ConstructorRegistry) -> Self {
        self.constructors = Arc::new(constructors);
        self
    }

    #[must_use]
    pub fn host(&self) -> &dyn Host {
        self.host.as_ref()
    }

    #[must_use]
    pub fn context(&self) -> &Arc<ContextStore> {
        &self.context
    }

    fn is_alias(&self, name: &str) -> bool {
        self.host.root_aliases().iter().any(|alias| alias == name)
    }

    fn split_origin<'a>(&self, path: &'a str) -> (Origin<'a>, &'a str) {
        if let Some(stripped) = path.strip_prefix('$') {
            let (label, rest) = stripped.split_once('.').unwrap_or((stripped, ""));
            return (Origin::Label(label), rest);
        }

        let module = self
            .host
            .module_names()
            .into_iter()
            .filter(|name| {
                path == name.as_str()
                    || path
                        .strip_prefix(name.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            })
            .max_by_key(String::len);
        if let Some(module) = module {
            let (head, rest) = path.split_at(module.len());
            return (Origin::Module(head), rest.trim_start_matches('.'));
        }

        let (first, rest) = path.split_once('.').unwrap_or((path, ""));
        if self.is_alias(first) {
            return (Origin::Alias(first), rest);
        }
        (Origin::DefaultRoot, path)
    }

    fn start(&self, path: &str, origin: &Origin<'_>) -> Result<HostValue, InvokeError> {
        match *origin {
            Origin::Label(label) => self
                .context
                .get(label)
                .ok_or_else(|| InvokeError::StoredObjectMissing {
                    label: label.to_string(),
                    available: self.context.labels(),
                }),
            Origin::Module(name) => self
                .host
                .module(name)
                .ok_or_else(|| InvokeError::path_not_found(path, name, "module not available")),
            Origin::Alias(alias) => match self.host.root(alias) {
                Ok(Some(root)) => Ok(root),
                Ok(None) => Err(InvokeError::path_not_found(path, alias, "root not available")),
                Err(e) => Err(InvokeError::PathNotFound {
                    path: path.to_string(),
                    segment: alias.to_string(),
                    reason: "root could not be read".into(),
                    source: Some(Box::new(e)),
                }),
            },
            Origin::DefaultRoot => self.host.default_root().map_err(|e| InvokeError::PathNotFound {
                path: path.to_string(),
                segment: self.host.name().to_string(),
                reason: "default root could not be read".into(),
                source: Some(Box::new(e)),
            }),
        }
    }

    /// Resolve `path` to a value. A final segment naming a method yields a
    /// [`HostValue::Method`] without calling it.
    ///
    /// # Errors
    /// `PathNotFound` naming the first unresolved segment,
    /// `StoredObjectMissing` for an unknown `$label`, or `InvocationFailed`
    /// if a `name()` segment raised.
    pub fn resolve_path(&self, path: &str) -> Result<HostValue, InvokeError> {
        let path = path.trim();
        if path.is_empty() || path == "$" {
            return Err(InvokeError::EmptyPath);
        }

        let (origin, rest) = self.split_origin(path);
        let mut current = self.start(path, &origin)?;

        let segments: Vec<&str> = rest.split('.').filter(|s| !s.is_empty()).collect();
        for (i, segment) in segments.iter().enumerate() {
            let is_last = i + 1 == segments.len();
            current = self.step(path, &current, segment, is_last)?;
            if current.is_null() && !is_last {
                return Err(InvokeError::path_not_found(path, segment, "resolved to null"));
            }
        }
        Ok(current)
    }

    fn step(&self, path: &str, current: &HostValue, segment: &str, is_last: bool) -> Result<HostValue, InvokeError> {
        let (name, call) = segment
            .strip_suffix("()")
            .map_or((segment, false), |name| (name, true));

        match current {
            HostValue::Null => Err(InvokeError::path_not_found(path, name, "resolved to null")),
            HostValue::Object(obj) if call => {
                if !obj.has_method(name) {
                    let reason = format!("'{}' object has no method '{name}'", obj.type_name());
                    return Err(InvokeError::path_not_found(path, name, reason));
                }
                obj.call_method(name, Vec::new(), Kwargs::new())
                    .map_err(|source| InvokeError::failed(format!("{}.{name}", obj.type_name()), source))
            }
            HostValue::Object(obj) => match obj.get_attribute(name) {
                Ok(Some(value)) => Ok(value),
                Ok(None) if obj.has_method(name) => {
                    if is_last {
                        Ok(HostValue::Method(BoundMethod {
                            receiver: Arc::clone(obj),
                            name: name.to_string(),
                        }))
                    } else {
                        Err(InvokeError::path_not_found(
                            path,
                            name,
                            format!("'{name}' is a method; write '{name}()' to call it mid-path"),
                        ))
                    }
                }
                Ok(None) => {
                    let error = hostlink_core::HostError::no_attribute(obj.type_name(), name);
                    Err(InvokeError::PathNotFound {
                        path: path.to_string(),
                        segment: name.to_string(),
                        reason: error.to_string(),
                        source: Some(Box::new(error)),
                    })
                }
                Err(e) => Err(InvokeError::PathNotFound {
                    path: path.to_string(),
                    segment: name.to_string(),
                    reason: "attribute could not be read".into(),
                    source: Some(Box::new(e)),
                }),
            },
            HostValue::Map(map) if !call => map
                .get(name)
                .cloned()
                .ok_or_else(|| InvokeError::path_not_found(path, name, "map has no such key")),
            HostValue::List(items) if !call => name
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index))
                .cloned()
                .ok_or_else(|| InvokeError::path_not_found(path, name, "list index out of range")),
            other => Err(InvokeError::path_not_found(
                path,
                name,
                format!("'{}' value has no attribute '{name}'", other.type_name()),
            )),
        }
    }

    /// Resolve one argument by shape.
    ///
    /// - `"$label..."` must resolve
    /// - dotted strings and root aliases are tried as paths, falling back
    ///   to the literal string
    /// - `{"type": ...}` maps are object-construction requests
    /// - lists resolve element-wise; everything else is a literal
    ///
    /// # Errors
    /// Returns error if a `$` reference or a construction fails.
    pub fn resolve_argument(&self, arg: &Value) -> Result<HostValue, InvokeError> {
        match arg {
            Value::String(s) if s.starts_with('$') => self.resolve_path(s),
            Value::String(s) if s.contains('.') || self.is_alias(s) => match self.resolve_path(s) {
                Ok(value) => Ok(value),
                Err(e) => {
                    tracing::debug!(argument = %s, error = %e, "Treating argument as a literal string");
                    Ok(HostValue::Str(s.clone()))
                }
            },
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_argument(item))
                .collect::<Result<Vec<_>, _>>()
                .map(HostValue::List),
            Value::Object(fields) if fields.contains_key("type") => self.constructors.construct(self, fields),
            other => Ok(HostValue::from_json(other)),
        }
    }

    /// Perform a generic invocation.
    ///
    /// # Errors
    /// Returns the failure with whatever arguments were resolved.
    pub fn invoke(&self, request: &InvokeRequest) -> Result<InvokeOutcome, Box<InvokeFailure>> {
        tracing::debug!(
            api_path = %request.api_path,
            args = request.args.len(),
            kwargs = request.kwargs.len(),
            "Invoking"
        );
        let target = self.resolve_path(&request.api_path)?;

        let mut args = Vec::with_capacity(request.args.len());
        for (i, arg) in request.args.iter().enumerate() {
            match self.resolve_argument(arg) {
                Ok(value) => args.push(value),
                Err(e) => {
                    return Err(Box::new(InvokeFailure {
                        error: InvokeError::Argument {
                            position: i.to_string(),
                            source: Box::new(e),
                        },
                        resolved_args: Some(args.iter().map(HostValue::to_json).collect()),
                        resolved_kwargs: None,
                    }));
                }
            }
        }
        let mut kwargs = Kwargs::new();
        for (key, arg) in &request.kwargs {
            match self.resolve_argument(arg) {
                Ok(value) => {
                    kwargs.insert(key.clone(), value);
                }
                Err(e) => {
                    return Err(Box::new(InvokeFailure {
                        error: InvokeError::Argument {
                            position: key.clone(),
                            source: Box::new(e),
                        },
                        resolved_args: Some(args.iter().map(HostValue::to_json).collect()),
                        resolved_kwargs: Some(kwargs.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
                    }));
                }
            }
        }

        let value = match target {
            HostValue::Method(method) => {
                let snapshot_args: Vec<Value> = args.iter().map(HostValue::to_json).collect();
                let snapshot_kwargs: Map<String, Value> =
                    kwargs.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
                method
                    .receiver
                    .call_method(&method.name, args, kwargs)
                    .map_err(|source| {
                        Box::new(InvokeFailure {
                            error: InvokeError::failed(
                                format!("{}.{}", method.receiver.type_name(), method.name),
                                source,
                            ),
                            resolved_args: Some(snapshot_args),
                            resolved_kwargs: Some(snapshot_kwargs),
                        })
                    })?
            }
            property => {
                if !args.is_empty() || !kwargs.is_empty() {
                    tracing::debug!(api_path = %request.api_path, "Ignoring arguments for a property");
                }
                property
            }
        };

        if let Some(label) = &request.store_as {
            self.context.insert(label.clone(), value.clone());
            tracing::info!(label = %label, api_path = %request.api_path, "Stored result");
        }

        Ok(InvokeOutcome {
            type_name: value.type_name(),
            value,
            stored_as: request.store_as.clone(),
        })
    }
}
