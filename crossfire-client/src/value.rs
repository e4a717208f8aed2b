// Crossfire value model
//
// Values arrive as JSON in several shapes: tagged maps, "result"
// wrappers and bare primitives. Everything here folds them into one
// closed union.

use crate::commands::{attributes, value_types};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Remote object handle
pub type Handle = u64;

// The "type" tag on a value map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueTag {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Object,
    Array,
    Function,
    Other,
}

impl ValueTag {
    pub fn parse(tag: &str) -> Self {
        match tag {
            value_types::UNDEFINED => ValueTag::Undefined,
            value_types::NULL => ValueTag::Null,
            value_types::BOOLEAN => ValueTag::Boolean,
            value_types::NUMBER => ValueTag::Number,
            value_types::STRING => ValueTag::String,
            value_types::OBJECT => ValueTag::Object,
            value_types::ARRAY => ValueTag::Array,
            value_types::FUNCTION => ValueTag::Function,
            _ => ValueTag::Other,
        }
    }
}

/// A reference to a remote object, array or function
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectRef {
    pub handle: Option<Handle>,
    pub class_name: Option<String>,
    /// Properties that came inline with the value, name -> value info
    pub properties: Map<String, Value>,
}

impl ObjectRef {
    pub fn from_json(json: &Map<String, Value>) -> Self {
        let class_name = match json.get(attributes::CONSTRUCTOR) {
            Some(Value::String(name)) => Some(name.clone()),
            Some(Value::Object(constructor)) => constructor
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        };

        let properties = match json.get(attributes::VALUE) {
            Some(Value::Object(props)) => props.clone(),
            _ => Map::new(),
        };

        Self {
            handle: json.get(attributes::HANDLE).and_then(parse_handle),
            class_name,
            properties,
        }
    }

    pub fn has_inline_properties(&self) -> bool {
        !self.properties.is_empty()
    }
}

/// Mirror of a remote value
///
/// `Undefined` and `Null` carry no state, so every instance of them is
/// the same value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueMirror {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Object(ObjectRef),
    Array(ObjectRef),
    Function(ObjectRef),
}

impl ValueMirror {
    pub fn type_name(&self) -> &'static str {
        match self {
            ValueMirror::Undefined => value_types::UNDEFINED,
            ValueMirror::Null => value_types::NULL,
            ValueMirror::Boolean(_) => value_types::BOOLEAN,
            ValueMirror::Number(_) => value_types::NUMBER,
            ValueMirror::String(_) => value_types::STRING,
            ValueMirror::Object(_) => value_types::OBJECT,
            ValueMirror::Array(_) => value_types::ARRAY,
            ValueMirror::Function(_) => value_types::FUNCTION,
        }
    }

    pub fn is_primitive(&self) -> bool {
        self.object_ref().is_none()
    }

    /// The remote reference behind object, array and function values
    pub fn object_ref(&self) -> Option<&ObjectRef> {
        match self {
            ValueMirror::Object(obj) | ValueMirror::Array(obj) | ValueMirror::Function(obj) => {
                Some(obj)
            }
            _ => None,
        }
    }

    pub fn handle(&self) -> Option<Handle> {
        self.object_ref().and_then(|obj| obj.handle)
    }

    /// Format value for display
    pub fn format(&self) -> String {
        match self {
            ValueMirror::Undefined => "undefined".to_string(),
            ValueMirror::Null => "null".to_string(),
            ValueMirror::Boolean(v) => v.to_string(),
            ValueMirror::Number(v) => format_number(*v),
            ValueMirror::String(v) => format!("\"{}\"", v),
            ValueMirror::Object(obj) | ValueMirror::Array(obj) | ValueMirror::Function(obj) => {
                let label = obj.class_name.as_deref().unwrap_or(self.type_name());
                match obj.handle {
                    Some(handle) => format!("({}) #{}", label, handle),
                    None => format!("({})", label),
                }
            }
        }
    }
}

impl fmt::Display for ValueMirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

fn format_number(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

/// Accept a handle given as a JSON number or as a numeric string
pub fn parse_handle(value: &Value) -> Option<Handle> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number_of(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

fn string_of(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Resolve any value JSON into a mirror. Never fails: shapes that are
/// not understood become `Null`.
pub fn create_value(json: &Value) -> ValueMirror {
    match json {
        Value::Object(map) => {
            if let Some(tag) = map.get(attributes::TYPE).and_then(Value::as_str) {
                return create_typed_value(ValueTag::parse(tag), map);
            }
            match map.get(attributes::RESULT) {
                Some(Value::Object(inner)) => ValueMirror::Object(ObjectRef::from_json(inner)),
                Some(Value::String(s)) => ValueMirror::String(s.clone()),
                Some(Value::Number(n)) => ValueMirror::Number(n.as_f64().unwrap_or(f64::NAN)),
                _ => ValueMirror::Null,
            }
        }
        Value::String(s) if s == value_types::UNDEFINED => ValueMirror::Undefined,
        Value::String(s) => ValueMirror::String(s.clone()),
        Value::Number(n) => ValueMirror::Number(n.as_f64().unwrap_or(f64::NAN)),
        _ => ValueMirror::Null,
    }
}

/// Tag dispatch. Tags outside the table, including "number" and
/// "boolean", resolve to `Null`.
fn create_typed_value(tag: ValueTag, map: &Map<String, Value>) -> ValueMirror {
    match tag {
        ValueTag::Undefined => ValueMirror::Undefined,
        ValueTag::String => ValueMirror::String(string_of(map.get(attributes::VALUE))),
        ValueTag::Object => ValueMirror::Object(ObjectRef::from_json(map)),
        ValueTag::Array => ValueMirror::Array(ObjectRef::from_json(map)),
        ValueTag::Function => ValueMirror::Function(ObjectRef::from_json(map)),
        ValueTag::Null | ValueTag::Boolean | ValueTag::Number | ValueTag::Other => {
            ValueMirror::Null
        }
    }
}

/// A named slot in a frame or object
///
/// `value` is filled for primitives reported inline; reference values
/// are left for a handle lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableMirror {
    pub name: String,
    pub handle: Option<Handle>,
    pub value: Option<ValueMirror>,
}

impl VariableMirror {
    /// Build a variable from its locals entry
    pub fn from_info(name: &str, info: &Map<String, Value>) -> Self {
        let handle = info.get(attributes::HANDLE).and_then(parse_handle);
        let value = info
            .get(attributes::TYPE)
            .and_then(Value::as_str)
            .and_then(|kind| {
                if name == attributes::THIS {
                    return Some(ValueMirror::Object(ObjectRef::from_json(info)));
                }
                match ValueTag::parse(kind) {
                    ValueTag::String => {
                        Some(ValueMirror::String(string_of(info.get(attributes::VALUE))))
                    }
                    ValueTag::Number => Some(ValueMirror::Number(number_of(info.get(attributes::VALUE)))),
                    ValueTag::Boolean => Some(ValueMirror::Boolean(
                        info.get(attributes::VALUE)
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                    )),
                    ValueTag::Undefined => Some(ValueMirror::Undefined),
                    ValueTag::Null => Some(ValueMirror::Null),
                    _ => None,
                }
            });

        Self {
            name: name.to_string(),
            handle,
            value,
        }
    }

    /// A local the server gave no description for
    pub fn without_info(name: &str) -> Self {
        Self {
            name: name.to_string(),
            handle: None,
            value: Some(ValueMirror::Null),
        }
    }

    /// The frame's receiver; it has no lookup of its own so it keeps
    /// the inline properties it was reported with
    pub fn this_object(info: &Map<String, Value>) -> Self {
        Self {
            name: attributes::THIS.to_string(),
            handle: info.get(attributes::HANDLE).and_then(parse_handle),
            value: Some(ValueMirror::Object(ObjectRef::from_json(info))),
        }
    }

    pub fn needs_lookup(&self) -> bool {
        self.value.is_none() && self.handle.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tagged_undefined_and_bare_synonym() {
        assert_eq!(create_value(&json!({ "type": "undefined" })), ValueMirror::Undefined);
        assert_eq!(create_value(&json!("undefined")), ValueMirror::Undefined);
    }

    #[test]
    fn test_tagged_object_is_always_a_reference() {
        let value = create_value(&json!({ "type": "object", "handle": 12, "value": 5 }));
        match value {
            ValueMirror::Object(obj) => {
                assert_eq!(obj.handle, Some(12));
                assert!(!obj.has_inline_properties());
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn test_tag_table() {
        assert_eq!(
            create_value(&json!({ "type": "string", "value": "hi" })),
            ValueMirror::String("hi".to_string())
        );
        assert!(matches!(
            create_value(&json!({ "type": "array", "handle": "4" })),
            ValueMirror::Array(ObjectRef { handle: Some(4), .. })
        ));
        assert!(matches!(
            create_value(&json!({ "type": "function", "handle": 9 })),
            ValueMirror::Function(_)
        ));
        assert_eq!(create_value(&json!({ "type": "null" })), ValueMirror::Null);
        // Outside the dispatch table
        assert_eq!(create_value(&json!({ "type": "number", "value": 3 })), ValueMirror::Null);
        assert_eq!(create_value(&json!({ "type": "symbol" })), ValueMirror::Null);
    }

    #[test]
    fn test_result_wrapper() {
        assert_eq!(
            create_value(&json!({ "result": "done" })),
            ValueMirror::String("done".to_string())
        );
        assert_eq!(create_value(&json!({ "result": 2.5 })), ValueMirror::Number(2.5));

        match create_value(&json!({ "result": { "handle": 3, "constructor": { "name": "Point" } } })) {
            ValueMirror::Object(obj) => {
                assert_eq!(obj.handle, Some(3));
                assert_eq!(obj.class_name.as_deref(), Some("Point"));
            }
            other => panic!("expected object, got {:?}", other),
        }

        assert_eq!(create_value(&json!({ "result": true })), ValueMirror::Null);
    }

    #[test]
    fn test_bare_values_and_fallback() {
        assert_eq!(create_value(&json!("text")), ValueMirror::String("text".to_string()));
        assert_eq!(create_value(&json!(7)), ValueMirror::Number(7.0));
        assert_eq!(create_value(&json!(true)), ValueMirror::Null);
        assert_eq!(create_value(&json!(null)), ValueMirror::Null);
        assert_eq!(create_value(&json!([1, 2])), ValueMirror::Null);
        assert_eq!(create_value(&json!({})), ValueMirror::Null);
    }

    #[test]
    fn test_parse_handle() {
        assert_eq!(parse_handle(&json!(17)), Some(17));
        assert_eq!(parse_handle(&json!("17")), Some(17));
        assert_eq!(parse_handle(&json!("x")), None);
        assert_eq!(parse_handle(&json!(null)), None);
    }

    #[test]
    fn test_variable_from_info() {
        let info = json!({ "type": "number", "value": "42" });
        let var = VariableMirror::from_info("n", info.as_object().unwrap());
        assert_eq!(var.value, Some(ValueMirror::Number(42.0)));

        let info = json!({ "type": "boolean", "value": true });
        let var = VariableMirror::from_info("flag", info.as_object().unwrap());
        assert_eq!(var.value, Some(ValueMirror::Boolean(true)));

        let info = json!({ "type": "object", "handle": 8 });
        let var = VariableMirror::from_info("obj", info.as_object().unwrap());
        assert!(var.needs_lookup());
        assert_eq!(var.handle, Some(8));

        let info = json!({ "handle": "3" });
        let var = VariableMirror::from_info("untyped", info.as_object().unwrap());
        assert_eq!(var.value, None);
        assert_eq!(var.handle, Some(3));
    }

    #[test]
    fn test_format() {
        assert_eq!(ValueMirror::Number(3.0).format(), "3");
        assert_eq!(ValueMirror::Number(0.5).format(), "0.5");
        assert_eq!(ValueMirror::String("a".to_string()).format(), "\"a\"");
        let obj = ObjectRef {
            handle: Some(5),
            class_name: None,
            properties: Map::new(),
        };
        assert_eq!(ValueMirror::Array(obj).format(), "(array) #5");
    }
}
