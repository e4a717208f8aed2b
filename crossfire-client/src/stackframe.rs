// Stack frame mirrors
//
// A frame is only meaningful while its thread stays suspended. Locals
// are parsed once from the frame JSON; object values are looked up by
// handle on demand and not cached.

use crate::commands::{attributes, requests};
use crate::protocol::RequestPacket;
use crate::script::ScriptMirror;
use crate::thread::ThreadMirror;
use crate::value::{create_value, Handle, ObjectRef, ValueMirror, VariableMirror};
use crate::vm::VirtualMachine;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Source position of a frame
#[derive(Debug, Clone)]
pub struct Location {
    pub script: Arc<ScriptMirror>,
    pub function_name: Option<String>,
    pub line: i64,
}

#[derive(Debug)]
pub struct StackFrameMirror {
    vm: Arc<VirtualMachine>,
    thread: Arc<ThreadMirror>,
    index: i64,
    line: i64,
    script_id: Option<String>,
    function_name: Option<String>,
    variables: Option<Vec<Arc<VariableMirror>>>,
    this: Option<Arc<VariableMirror>>,
    location: OnceCell<Location>,
}

fn str_of<'a>(json: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| json.get(*key).and_then(Value::as_str))
}

fn variables_of(map: &Map<String, Value>) -> Vec<Arc<VariableMirror>> {
    map.iter()
        .map(|(name, info)| {
            Arc::new(match info {
                Value::Object(info) => VariableMirror::from_info(name, info),
                _ => VariableMirror::without_info(name),
            })
        })
        .collect()
}

/// Walk a locals block. `this` is parsed as an object and its own
/// nested locals are collected as well.
fn parse_locals(
    locals: &Map<String, Value>,
    variables: &mut Option<Vec<Arc<VariableMirror>>>,
    this: &mut Option<Arc<VariableMirror>>,
) {
    if let Some(Value::Object(values)) = locals.get(attributes::VALUE) {
        variables.get_or_insert_with(Vec::new).extend(variables_of(values));
    }
    if let Some(Value::Object(this_map)) = locals.get(attributes::THIS) {
        if this.is_none() {
            *this = Some(Arc::new(VariableMirror::this_object(this_map)));
        }
        parse_locals(this_map, variables, this);
    }
}

impl StackFrameMirror {
    pub fn from_json(vm: Arc<VirtualMachine>, thread: Arc<ThreadMirror>, json: &Map<String, Value>) -> Self {
        let mut variables = None;
        let mut this = None;
        if let Some(Value::Object(locals)) = json.get(attributes::LOCALS) {
            parse_locals(locals, &mut variables, &mut this);
        }

        Self {
            vm,
            thread,
            index: json.get(attributes::INDEX).and_then(Value::as_i64).unwrap_or(-1),
            line: json.get(attributes::LINE).and_then(Value::as_i64).unwrap_or(-1),
            script_id: str_of(json, &[attributes::SCRIPT, attributes::URL]).map(str::to_string),
            function_name: str_of(json, &[attributes::FUNC, attributes::FUNCTION_NAME]).map(str::to_string),
            variables,
            this,
            location: OnceCell::new(),
        }
    }

    pub fn thread(&self) -> &Arc<ThreadMirror> {
        &self.thread
    }

    pub fn index(&self) -> i64 {
        self.index
    }

    pub fn line(&self) -> i64 {
        self.line
    }

    pub fn script_id(&self) -> Option<&str> {
        self.script_id.as_deref()
    }

    pub fn function_name(&self) -> Option<&str> {
        self.function_name.as_deref()
    }

    pub fn variables(&self) -> &[Arc<VariableMirror>] {
        self.variables.as_deref().unwrap_or(&[])
    }

    pub fn this_object(&self) -> Option<&Arc<VariableMirror>> {
        self.this.as_ref()
    }

    /// Resolve the frame's script. Not cached until the script is known.
    pub async fn location(&self) -> Option<Location> {
        if let Some(location) = self.location.get() {
            return Some(location.clone());
        }

        let script = self.vm.find_script(self.script_id.as_deref()?).await?;
        let location = Location {
            script,
            function_name: self.function_name.clone(),
            line: self.line,
        };
        self.location.set(location.clone()).ok();
        Some(location)
    }

    /// Evaluate `expression` in this frame; `None` if the server refused
    pub async fn evaluate(&self, expression: &str) -> Option<ValueMirror> {
        let request = RequestPacket::new(requests::EVALUATE, Some(self.thread.id()))
            .with_argument(attributes::FRAME, self.index)
            .with_argument(attributes::EXPRESSION, expression);
        let response = self.vm.send_request(request).await;
        if !response.is_success() {
            return None;
        }
        Some(create_value(&Value::Object(response.body)))
    }

    /// Resolve a handle; anything that goes wrong gives `Null`
    pub async fn lookup(&self, handle: Handle) -> ValueMirror {
        let request = RequestPacket::new(requests::LOOKUP, Some(self.thread.id()))
            .with_argument(attributes::HANDLE, handle)
            .with_argument(attributes::FRAME, self.index);
        let response = self.vm.send_request(request).await;
        if !response.is_success() {
            return self.vm.mirror_of_null();
        }
        create_value(&Value::Object(response.body))
    }

    /// The value of a variable, looking it up by handle when it was not
    /// reported inline
    pub async fn resolve(&self, variable: &VariableMirror) -> ValueMirror {
        match (&variable.value, variable.handle) {
            (Some(value), _) => value.clone(),
            (None, Some(handle)) => self.lookup(handle).await,
            (None, None) => self.vm.mirror_of_null(),
        }
    }

    /// Properties of an object, from the inline description if present,
    /// otherwise from a single lookup
    pub async fn properties(&self, object: &ObjectRef) -> Vec<Arc<VariableMirror>> {
        if object.has_inline_properties() {
            return variables_of(&object.properties);
        }
        let Some(handle) = object.handle else {
            return Vec::new();
        };
        match self.lookup(handle).await.object_ref() {
            Some(resolved) => variables_of(&resolved.properties),
            None => Vec::new(),
        }
    }

    /// True for this frame's `this` or one of its locals
    pub fn is_visible(&self, variable: &Arc<VariableMirror>) -> bool {
        self.this
            .as_ref()
            .is_some_and(|this| Arc::ptr_eq(this, variable))
            || self.variables().iter().any(|v| Arc::ptr_eq(v, variable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{attach_vm_with_threads, MockServer};
    use serde_json::json;

    async fn frame_with(json: Value) -> (StackFrameMirror, MockServer) {
        let (vm, server) = attach_vm_with_threads(&["1"]).await;
        let thread = vm.find_thread("1").await.unwrap();
        let frame = StackFrameMirror::from_json(vm, thread, json.as_object().unwrap());
        (frame, server)
    }

    #[tokio::test]
    async fn test_parse_frame_and_locals() {
        let (frame, _server) = frame_with(json!({
            "index": 0,
            "line": 17,
            "func": "handler",
            "script": "http://localhost/a.js",
            "locals": {
                "value": {
                    "count": { "type": "number", "value": 3 },
                    "name": { "type": "string", "value": "x" },
                    "opaque": null
                },
                "this": {
                    "type": "object",
                    "handle": 40,
                    "value": { "field": { "type": "boolean", "value": true } }
                }
            }
        }))
        .await;

        assert_eq!(frame.index(), 0);
        assert_eq!(frame.line(), 17);
        assert_eq!(frame.function_name(), Some("handler"));
        assert_eq!(frame.script_id(), Some("http://localhost/a.js"));

        // Three locals plus the nested field of `this`
        assert_eq!(frame.variables().len(), 4);
        let opaque = frame.variables().iter().find(|v| v.name == "opaque").unwrap();
        assert_eq!(opaque.value, Some(ValueMirror::Null));

        let this = frame.this_object().unwrap();
        assert_eq!(this.handle, Some(40));
        assert!(matches!(this.value, Some(ValueMirror::Object(_))));
    }

    #[tokio::test]
    async fn test_defaults_without_fields() {
        let (frame, _server) = frame_with(json!({})).await;
        assert_eq!(frame.index(), -1);
        assert_eq!(frame.line(), -1);
        assert!(frame.variables().is_empty());
        assert!(frame.this_object().is_none());
    }

    #[tokio::test]
    async fn test_is_visible_uses_identity() {
        let (frame, _server) = frame_with(json!({
            "locals": { "value": { "a": { "type": "number", "value": 1 } }, "this": { "type": "object" } }
        }))
        .await;

        let local = frame.variables()[0].clone();
        assert!(frame.is_visible(&local));
        assert!(frame.is_visible(frame.this_object().unwrap()));

        // An equal but distinct variable is not in scope
        let copy = Arc::new((*local).clone());
        assert!(!frame.is_visible(&copy));
    }

    #[tokio::test]
    async fn test_evaluate() {
        let (frame, mut server) = frame_with(json!({ "index": 2 })).await;

        let (value, request) = tokio::join!(frame.evaluate("a + b"), async {
            server.serve("evaluate", json!({ "result": 5 })).await
        });
        assert_eq!(request.context_id.as_deref(), Some("1"));
        assert_eq!(request.arguments["frame"], 2);
        assert_eq!(request.arguments["expression"], "a + b");
        assert_eq!(value, Some(ValueMirror::Number(5.0)));

        let (value, _) = tokio::join!(frame.evaluate("boom"), async {
            let request = server.expect_request("evaluate").await;
            server.respond(&request, false, json!({})).await;
        });
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_lookup_and_properties() {
        let (frame, mut server) = frame_with(json!({
            "locals": { "value": { "obj": { "type": "object", "handle": 9 } } }
        }))
        .await;
        let obj = frame.variables()[0].clone();
        assert!(obj.needs_lookup());

        let (value, request) = tokio::join!(frame.resolve(&obj), async {
            server
                .serve(
                    "lookup",
                    json!({ "type": "object", "handle": 9, "value": { "x": { "type": "number", "value": 1 } } }),
                )
                .await
        });
        assert_eq!(request.arguments["handle"], 9);

        let object = value.object_ref().unwrap().clone();
        let props = frame.properties(&object).await;
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].name, "x");

        // Without inline properties a lookup is made; failure gives nothing
        let bare = ObjectRef {
            handle: Some(11),
            class_name: None,
            properties: Map::new(),
        };
        let (props, _) = tokio::join!(frame.properties(&bare), async {
            let request = server.expect_request("lookup").await;
            server.respond(&request, false, json!({})).await;
        });
        assert!(props.is_empty());
    }

    #[tokio::test]
    async fn test_location_resolves_through_scripts() {
        let (frame, mut server) = frame_with(json!({ "line": 4, "script": "http://localhost/a.js" })).await;

        let (location, _) = tokio::join!(frame.location(), async {
            server
                .serve("scripts", json!({ "scripts": [{ "script": { "id": "http://localhost/a.js" } }] }))
                .await
        });
        let location = location.unwrap();
        assert_eq!(location.line, 4);
        assert_eq!(location.script.id, "http://localhost/a.js");

        // Cached on the frame now
        assert!(frame.location().await.is_some());
        server.assert_quiet(std::time::Duration::from_millis(30)).await;
    }
}
