//! JSON reports for invocation results.
//!
//! Built on the host thread, since rendering a result may read properties
//! of live host objects.

use hostlink_core::HostValue;
use serde_json::{Map, Value, json};

use super::{InvokeFailure, InvokeOutcome, InvokeRequest};

/// Report for a successful invocation.
#[must_use]
pub fn success(request: &InvokeRequest, outcome: &InvokeOutcome, context: Vec<String>) -> Value {
    let value = if request.return_properties.is_empty() {
        outcome.value.to_json()
    } else {
        property_snapshot(&outcome.value, &request.return_properties)
    };

    let mut report = json!({
        "success": true,
        "api_path": request.api_path,
        "value": value,
        "type": outcome.type_name,
        "context": context,
    });
    if let Some(label) = &outcome.stored_as {
        report["stored_as"] = Value::String(label.clone());
    }
    report
}

/// Report for a failed invocation.
#[must_use]
pub fn failure(request: &InvokeRequest, failure: &InvokeFailure, context: Vec<String>) -> Value {
    let error = &failure.error;
    let mut detail = json!({
        "kind": error.kind(),
        "message": error.to_string(),
        "causes": error.causes(),
    });
    if let Some(segment) = error.failing_segment() {
        detail["failing_segment"] = Value::String(segment);
    }

    let mut report = json!({
        "success": false,
        "error": detail,
        "call": {
            "api_path": request.api_path,
            "args": request.args,
            "kwargs": request.kwargs,
            "store_as": request.store_as,
            "return_properties": request.return_properties,
        },
        "context": context,
        "hints": error.hints(),
    });
    if let Some(args) = &failure.resolved_args {
        report["resolved_args"] = Value::Array(args.clone());
    }
    if let Some(kwargs) = failure.resolved_kwargs.as_ref().filter(|k| !k.is_empty()) {
        report["resolved_kwargs"] = Value::Object(kwargs.clone());
    }
    report
}

/// Render the named properties of `value` as display strings.
///
/// Missing properties render as `None`; properties that fail to read
/// render as `<error: ...>`.
#[must_use]
pub fn property_snapshot(value: &HostValue, properties: &[String]) -> Value {
    let rendered = properties
        .iter()
        .map(|name| {
            let text = match value {
                HostValue::Object(obj) => match obj.get_attribute(name) {
                    Ok(Some(v)) => v.display(),
                    Ok(None) => "None".to_string(),
                    Err(e) => format!("<error: {e}>"),
                },
                HostValue::Map(map) => map.get(name).map_or_else(|| "None".to_string(), HostValue::display),
                _ => "None".to_string(),
            };
            (name.clone(), Value::String(text))
        })
        .collect::<Map<_, _>>();
    Value::Object(rendered)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hostlink_core::{ContextStore, demo::DemoHost};
    use serde_json::json;

    use super::*;
    use crate::invoke::Invoker;

    fn invoker() -> Invoker {
        Invoker::new(Arc::new(DemoHost::new()), Arc::new(ContextStore::new()))
    }

    #[test]
    fn test_success_report() {
        let invoker = invoker();
        let request = InvokeRequest::new("make.circle").with_args(vec![json!(5)]).store_as("c1");
        let outcome = invoker.invoke(&request).unwrap();
        let report = success(&request, &outcome, invoker.context().labels());

        assert_eq!(report["success"], json!(true));
        assert_eq!(report["type"], json!("Circle"));
        assert_eq!(report["stored_as"], json!("c1"));
        assert_eq!(report["value"]["$type"], json!("Circle"));
        assert_eq!(report["context"], json!(["c1"]));
    }

    #[test]
    fn test_return_properties() {
        let invoker = invoker();
        let request = InvokeRequest {
            api_path: "make.circle".into(),
            args: vec![json!(2)],
            return_properties: vec!["radius".into(), "diameter".into(), "colour".into()],
            ..InvokeRequest::default()
        };
        let outcome = invoker.invoke(&request).unwrap();
        let report = success(&request, &outcome, Vec::new());

        assert_eq!(report["value"], json!({"radius": "2", "diameter": "4.0", "colour": "None"}));
        assert!(report.get("stored_as").is_none());
    }

    #[test]
    fn test_failure_report() {
        let invoker = invoker();
        let request = InvokeRequest::new("make.rectangle").with_args(vec![json!(3)]);
        let failed = invoker.invoke(&request).unwrap_err();
        let report = failure(&request, &failed, Vec::new());

        assert_eq!(report["success"], json!(false));
        assert_eq!(report["error"]["kind"], json!("InvocationFailed"));
        assert_eq!(report["error"]["failing_segment"], json!("ShapeFactory.rectangle"));
        assert_eq!(report["call"]["api_path"], json!("make.rectangle"));
        assert_eq!(report["resolved_args"], json!([3]));
        assert!(!report["hints"].as_array().unwrap().is_empty());
        assert!(report["error"]["causes"].as_array().unwrap().len() >= 2);
    }
}
