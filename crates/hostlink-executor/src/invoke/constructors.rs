//! Object-construction strategies keyed by type name.
//!
//! An argument shaped like `{"type": "Point3D", "x": 1, "y": 2}` asks for a
//! new host object. The type is located among the host's modules, then
//! built with a registered strategy, or with its `create` factory taking
//! the remaining keys as keyword arguments when the type advertises one.

use std::collections::HashMap;

use hostlink_core::{HostValue, Kwargs, ObjectRef};
use serde_json::{Map, Value, json};

use super::{InvokeError, Invoker};

/// How to build instances of one type.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstructorStrategy {
    /// Call `factory` with the listed keys positionally, in order; absent
    /// keys take their default.
    Positional {
        factory: String,
        params: Vec<(String, Value)>,
    },
    /// Call `factory` with every key except `type` as a keyword argument.
    Keyword { factory: String },
}

impl ConstructorStrategy {
    /// `create(x, y, z)` with zero defaults.
    #[must_use]
    pub fn xyz() -> Self {
        Self::Positional {
            factory: "create".into(),
            params: ["x", "y", "z"]
                .into_iter()
                .map(|axis| (axis.to_string(), json!(0)))
                .collect(),
        }
    }
}

/// Registry of construction strategies.
#[derive(Debug, Clone)]
pub struct ConstructorRegistry {
    strategies: HashMap<String, ConstructorStrategy>,
}

impl Default for ConstructorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("Point3D", ConstructorStrategy::xyz());
        registry.register("Vector3D", ConstructorStrategy::xyz());
        registry
    }
}

impl ConstructorRegistry {
    /// A registry with no strategies; only factory-bearing types build.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Register (or replace) the strategy for `type_name`.
    pub fn register(&mut self, type_name: impl Into<String>, strategy: ConstructorStrategy) {
        self.strategies.insert(type_name.into(), strategy);
    }

    #[must_use]
    pub fn strategy(&self, type_name: &str) -> Option<&ConstructorStrategy> {
        self.strategies.get(type_name)
    }

    /// Build the object described by `fields`.
    ///
    /// # Errors
    /// `UnsupportedConstructor` for unknown or factory-less types; any
    /// error resolving the parameters or raised by the factory.
    pub fn construct(&self, invoker: &Invoker, fields: &Map<String, Value>) -> Result<HostValue, InvokeError> {
        let type_name = fields
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| InvokeError::UnsupportedConstructor {
                type_name: fields.get("type").map_or_else(String::new, Value::to_string),
                reason: "'type' must be a string".into(),
            })?;
        let short_name = type_name.rsplit('.').next().unwrap_or(type_name);
        let type_obj = locate(invoker, type_name)?;

        let strategy = match self.strategies.get(short_name) {
            Some(strategy) => strategy.clone(),
            None if type_obj.has_factory() => ConstructorStrategy::Keyword {
                factory: "create".into(),
            },
            None => {
                return Err(InvokeError::UnsupportedConstructor {
                    type_name: type_name.to_string(),
                    reason: "type exposes no factory and has no registered strategy".into(),
                });
            }
        };

        let (factory, args, kwargs) = match strategy {
            ConstructorStrategy::Positional { factory, params } => {
                let args = params
                    .iter()
                    .map(|(key, default)| invoker.resolve_argument(fields.get(key).unwrap_or(default)))
                    .collect::<Result<Vec<_>, _>>()?;
                (factory, args, Kwargs::new())
            }
            ConstructorStrategy::Keyword { factory } => {
                let kwargs = fields
                    .iter()
                    .filter(|(key, _)| key.as_str() != "type")
                    .map(|(key, value)| Ok((key.clone(), invoker.resolve_argument(value)?)))
                    .collect::<Result<Kwargs, InvokeError>>()?;
                (factory, Vec::new(), kwargs)
            }
        };

        if !type_obj.has_method(&factory) {
            return Err(InvokeError::UnsupportedConstructor {
                type_name: type_name.to_string(),
                reason: format!("type has no '{factory}' factory"),
            });
        }
        tracing::debug!(type_name, %factory, "Constructing object");
        type_obj
            .call_method(&factory, args, kwargs)
            .map_err(|source| InvokeError::failed(format!("{short_name}.{factory}"), source))
    }
}

/// Find the type object: a dotted name resolves as a path, a bare name is
/// looked up in every host module.
fn locate(invoker: &Invoker, type_name: &str) -> Result<ObjectRef, InvokeError> {
    let unknown = || InvokeError::UnsupportedConstructor {
        type_name: type_name.to_string(),
        reason: "unknown type".into(),
    };

    if type_name.contains('.') {
        return match invoker.resolve_path(type_name) {
            Ok(HostValue::Object(obj)) => Ok(obj),
            _ => Err(unknown()),
        };
    }

    let host = invoker.host();
    host.module_names()
        .iter()
        .filter_map(|name| host.module(name))
        .find_map(|module| match module.as_object()?.get_attribute(type_name) {
            Ok(Some(HostValue::Object(obj))) => Some(obj),
            _ => None,
        })
        .ok_or_else(unknown)
}
