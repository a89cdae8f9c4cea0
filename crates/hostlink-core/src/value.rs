//! Values exchanged with the host application.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use serde_json::{Map, Number, Value};

use crate::traits::HostObject;

/// Shared handle to a live host object.
pub type ObjectRef = Arc<dyn HostObject>;

/// Keyword arguments, in the order the caller supplied them.
pub type Kwargs = IndexMap<String, HostValue>;

/// A method looked up on a host object but not yet invoked.
#[derive(Clone)]
pub struct BoundMethod {
    /// Object the method belongs to.
    pub receiver: ObjectRef,
    /// Method name.
    pub name: String,
}

impl fmt::Debug for BoundMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<method {}.{}>", self.receiver.type_name(), self.name)
    }
}

/// Any value the host can produce or accept.
///
/// Primitive variants mirror JSON. `Object` keeps the host's own identity,
/// so two handles to the same object compare equal under
/// [`HostValue::same_identity`].
#[derive(Clone, Default)]
pub enum HostValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<HostValue>),
    Map(IndexMap<String, HostValue>),
    Object(ObjectRef),
    Method(BoundMethod),
}

impl HostValue {
    /// Wrap a host object.
    #[must_use]
    pub fn object<T: HostObject + 'static>(obj: T) -> Self {
        Self::Object(Arc::new(obj))
    }

    /// Type name reported back to callers for introspection.
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            Self::Null => "null".into(),
            Self::Bool(_) => "bool".into(),
            Self::Int(_) => "int".into(),
            Self::Float(_) => "float".into(),
            Self::Str(_) => "str".into(),
            Self::List(_) => "list".into(),
            Self::Map(_) => "map".into(),
            Self::Object(obj) => obj.type_name().to_string(),
            Self::Method(m) => format!("method<{}.{}>", m.receiver.type_name(), m.name),
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to floats.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// True when both values are the same host object (pointer identity),
    /// or equal primitives.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            (Self::Method(a), Self::Method(b)) => {
                Arc::ptr_eq(&a.receiver, &b.receiver) && a.name == b.name
            }
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            #[allow(clippy::float_cmp)]
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_identity(y))
            }
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|w| v.same_identity(w)))
            }
            _ => false,
        }
    }

    /// Build a value from plain JSON. Objects become maps; nothing here
    /// resolves references or constructs host objects.
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Float(n.as_f64().unwrap_or(f64::NAN)), Self::Int),
            Value::String(s) => Self::Str(s.clone()),
            Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Render as JSON. Host objects are summarised via
    /// [`HostObject::summary`]; methods render as their description.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Number((*i).into()),
            Self::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Self::Str(s) => Value::String(s.clone()),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<_, _>>(),
            ),
            Self::Object(obj) => obj.summary(),
            Self::Method(m) => Value::String(format!("{m:?}")),
        }
    }

    /// Short human-readable rendering, used for property snapshots.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Null => "None".into(),
            Self::Str(s) => s.clone(),
            other => other.to_json().to_string(),
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(i) => write!(f, "Int({i})"),
            Self::Float(x) => write!(f, "Float({x})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::List(items) => f.debug_list().entries(items).finish(),
            Self::Map(map) => f.debug_map().entries(map).finish(),
            Self::Object(obj) => write!(f, "<{} object>", obj.type_name()),
            Self::Method(m) => m.fmt(f),
        }
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for HostValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for HostValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<ObjectRef> for HostValue {
    fn from(obj: ObjectRef) -> Self {
        Self::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_conversion_keeps_numbers_apart() {
        let value = HostValue::from_json(&json!({"i": 3, "f": 2.5, "s": "x", "l": [true, null]}));
        let HostValue::Map(map) = &value else {
            panic!("expected map, got {value:?}");
        };
        assert_eq!(map["i"].as_i64(), Some(3));
        assert_eq!(map["f"].as_f64(), Some(2.5));
        assert_eq!(map["s"].as_str(), Some("x"));
        assert_eq!(value.to_json(), json!({"i": 3, "f": 2.5, "s": "x", "l": [true, null]}));
    }

    #[test]
    fn test_nan_renders_as_null() {
        assert_eq!(HostValue::Float(f64::NAN).to_json(), Value::Null);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(HostValue::Null.type_name(), "null");
        assert_eq!(HostValue::from(1_i64).type_name(), "int");
        assert_eq!(HostValue::from("a").type_name(), "str");
    }
}
