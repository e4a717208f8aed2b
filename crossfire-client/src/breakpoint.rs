// Breakpoint registry
//
// Breakpoints are keyed by the handle the server assigns. The registry
// is filled once on attach and then follows explicit set/clear/change
// calls and the server's toggle notifications.

use crate::commands::{attributes, requests, value_types};
use crate::protocol::RequestPacket;
use crate::value::parse_handle;
use crate::vm::{lock, VirtualMachine};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt;
use tracing::{debug, info};

/// External listener for breakpoint changes made outside the debugger
pub trait BreakpointNotifier: Send + Sync + fmt::Debug {
    /// Called once when the VM stops listening
    fn detach(&self);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BreakpointLocation {
    pub url: Option<String>,
    pub line: Option<u64>,
}

impl BreakpointLocation {
    pub fn from_json(json: &Map<String, Value>) -> Self {
        Self {
            url: json
                .get(attributes::URL)
                .or_else(|| json.get(attributes::SCRIPT))
                .and_then(Value::as_str)
                .map(str::to_string),
            line: json.get(attributes::LINE).and_then(Value::as_u64),
        }
    }
}

impl fmt::Display for BreakpointLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url.as_deref().unwrap_or("<unknown>"))?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakpointMirror {
    pub handle: u64,
    pub kind: String,
    pub location: BreakpointLocation,
    pub enabled: bool,
    pub condition: Option<String>,
    pub context_id: Option<String>,
}

impl BreakpointMirror {
    pub fn from_json(json: &Map<String, Value>) -> Option<Self> {
        let handle = json.get(attributes::HANDLE).and_then(parse_handle)?;
        let mut breakpoint = Self {
            handle,
            kind: value_types::LINE.to_string(),
            location: BreakpointLocation::default(),
            enabled: true,
            condition: None,
            context_id: None,
        };
        breakpoint.apply(json);
        Some(breakpoint)
    }

    /// Merge the fields present in `json`. Enabled state and condition may
    /// sit at the top level or inside `attributes`.
    pub fn apply(&mut self, json: &Map<String, Value>) {
        if let Some(kind) = json.get(attributes::TYPE).and_then(Value::as_str) {
            self.kind = kind.to_string();
        }
        if let Some(Value::Object(location)) = json.get(attributes::LOCATION) {
            self.location = BreakpointLocation::from_json(location);
        }
        if let Some(context_id) = json.get(attributes::CONTEXT_ID).and_then(Value::as_str) {
            self.context_id = Some(context_id.to_string());
        }

        let nested = match json.get(attributes::ATTRIBUTES) {
            Some(Value::Object(attrs)) => Some(attrs),
            _ => None,
        };
        for source in std::iter::once(json).chain(nested) {
            if let Some(enabled) = source.get(attributes::ENABLED).and_then(Value::as_bool) {
                self.enabled = enabled;
            }
            match source.get(attributes::CONDITION) {
                Some(Value::String(condition)) => self.condition = Some(condition.clone()),
                Some(Value::Null) => self.condition = None,
                _ => {}
            }
        }
    }
}

/// Breakpoint bodies come either bare or under a `"breakpoint"` key
fn unwrap_breakpoint(json: &Map<String, Value>) -> &Map<String, Value> {
    match json.get(attributes::BREAKPOINT) {
        Some(Value::Object(inner)) => inner,
        _ => json,
    }
}

impl VirtualMachine {
    /// Load the breakpoints the server already has. Returns how many
    /// were registered.
    pub async fn initialize_breakpoints(&self) -> usize {
        if !self.ready() {
            return 0;
        }

        let response = self
            .send_request(RequestPacket::new(requests::GET_BREAKPOINTS, None))
            .await;
        if !response.is_success() {
            return 0;
        }

        let Some(Value::Array(list)) = response.body.get(attributes::BREAKPOINTS) else {
            return 0;
        };
        let mut breakpoints = lock(&self.breakpoints);
        let mut count = 0;
        for breakpoint in list
            .iter()
            .filter_map(Value::as_object)
            .filter_map(BreakpointMirror::from_json)
        {
            breakpoints.insert(breakpoint.handle, breakpoint);
            count += 1;
        }
        count
    }

    /// Set a line breakpoint. `context_id` of `None` sets it globally so
    /// it also applies to scripts loaded later.
    pub async fn set_breakpoint(
        &self,
        url: &str,
        line: u64,
        condition: Option<&str>,
        enabled: bool,
        context_id: Option<&str>,
    ) -> Option<BreakpointMirror> {
        if !self.ready() {
            return None;
        }

        let mut request = RequestPacket::new(requests::SET_BREAKPOINT, context_id)
            .with_argument(attributes::TYPE, value_types::LINE)
            .with_argument(attributes::LOCATION, json!({ "line": line, "url": url }))
            .with_argument(attributes::ENABLED, enabled);
        if let Some(condition) = condition {
            request.set_argument(attributes::CONDITION, condition);
        }

        let response = self.send_request(request).await;
        if !response.is_success() {
            return None;
        }

        let mut breakpoint = BreakpointMirror::from_json(unwrap_breakpoint(&response.body))?;
        if breakpoint.location.url.is_none() {
            breakpoint.location = BreakpointLocation {
                url: Some(url.to_string()),
                line: Some(line),
            };
        }
        info!("Breakpoint {} set at {}", breakpoint.handle, breakpoint.location);
        lock(&self.breakpoints).insert(breakpoint.handle, breakpoint.clone());
        Some(breakpoint)
    }

    pub async fn clear_breakpoint(&self, handle: u64) -> bool {
        if !self.ready() {
            return false;
        }

        let context_id = self.find_breakpoint(handle).and_then(|bp| bp.context_id);
        let request = RequestPacket::new(requests::CLEAR_BREAKPOINT, context_id.as_deref())
            .with_argument(attributes::HANDLE, handle);
        let cleared = self.send_request(request).await.is_success();
        if cleared {
            lock(&self.breakpoints).remove(&handle);
        }
        cleared
    }

    pub async fn change_breakpoint(&self, handle: u64, enabled: bool, condition: Option<&str>) -> bool {
        if !self.ready() {
            return false;
        }

        let context_id = self.find_breakpoint(handle).and_then(|bp| bp.context_id);
        let request = RequestPacket::new(requests::CHANGE_BREAKPOINT, context_id.as_deref())
            .with_argument(attributes::HANDLE, handle)
            .with_argument(attributes::ENABLED, enabled)
            .with_argument(attributes::CONDITION, condition);
        let changed = self.send_request(request).await.is_success();
        if changed {
            if let Some(breakpoint) = lock(&self.breakpoints).get_mut(&handle) {
                breakpoint.enabled = enabled;
                breakpoint.condition = condition.map(str::to_string);
            }
        }
        changed
    }

    /// Merge a breakpoint description into the registry, adding it if new
    pub fn update_breakpoint(&self, json: &Map<String, Value>) {
        if !self.ready() {
            return;
        }
        let json = unwrap_breakpoint(json);
        let Some(handle) = json.get(attributes::HANDLE).and_then(parse_handle) else {
            debug!("VM [breakpoint update without handle]");
            return;
        };

        let mut breakpoints = lock(&self.breakpoints);
        match breakpoints.get_mut(&handle) {
            Some(existing) => existing.apply(json),
            None => {
                if let Some(breakpoint) = BreakpointMirror::from_json(json) {
                    breakpoints.insert(handle, breakpoint);
                }
            }
        }
    }

    /// Apply a toggle notification; `"set": false` means it was removed
    pub fn toggle_breakpoint(&self, json: &Map<String, Value>) {
        if !self.ready() {
            return;
        }
        let removed = json.get(attributes::SET).and_then(Value::as_bool) == Some(false);
        if !removed {
            self.update_breakpoint(json);
            return;
        }

        if let Some(handle) = unwrap_breakpoint(json)
            .get(attributes::HANDLE)
            .and_then(parse_handle)
        {
            lock(&self.breakpoints).remove(&handle);
        }
    }

    /// Registered breakpoints ordered by handle
    pub fn breakpoints(&self) -> Vec<BreakpointMirror> {
        let mut list: Vec<_> = lock(&self.breakpoints).values().cloned().collect();
        list.sort_by_key(|bp| bp.handle);
        list
    }

    pub fn find_breakpoint(&self, handle: u64) -> Option<BreakpointMirror> {
        lock(&self.breakpoints).get(&handle).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::attach_vm;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_breakpoint_from_json() {
        let bp = BreakpointMirror::from_json(&obj(json!({
            "handle": 3,
            "type": "line",
            "location": { "url": "http://localhost/a.js", "line": 14 },
            "attributes": { "enabled": false, "condition": "x > 1" }
        })))
        .unwrap();

        assert_eq!(bp.handle, 3);
        assert!(!bp.enabled);
        assert_eq!(bp.condition.as_deref(), Some("x > 1"));
        assert_eq!(bp.location.to_string(), "http://localhost/a.js:14");

        assert!(BreakpointMirror::from_json(&obj(json!({ "type": "line" }))).is_none());
    }

    #[tokio::test]
    async fn test_initialize_breakpoints() {
        let (vm, mut server) = attach_vm().await;

        let (count, request) = tokio::join!(vm.initialize_breakpoints(), async {
            server
                .serve(
                    "getbreakpoints",
                    json!({ "breakpoints": [
                        { "handle": 2, "location": { "url": "a.js", "line": 1 } },
                        { "handle": 1, "location": { "url": "b.js", "line": 9 } },
                        { "location": { "url": "c.js", "line": 3 } }
                    ] }),
                )
                .await
        });

        assert!(request.context_id.is_none());
        assert_eq!(count, 2);
        let handles: Vec<u64> = vm.breakpoints().iter().map(|bp| bp.handle).collect();
        assert_eq!(handles, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_set_change_and_clear() {
        let (vm, mut server) = attach_vm().await;

        let (bp, request) = tokio::join!(
            vm.set_breakpoint("http://localhost/a.js", 20, Some("i == 3"), true, None),
            async { server.serve("setbreakpoint", json!({ "breakpoint": { "handle": 5 } })).await }
        );
        assert_eq!(request.arguments["location"]["line"], 20);
        assert_eq!(request.arguments["condition"], "i == 3");
        let bp = bp.unwrap();
        assert_eq!(bp.handle, 5);
        assert_eq!(bp.location.line, Some(20));
        assert!(vm.find_breakpoint(5).is_some());

        let (changed, request) = tokio::join!(vm.change_breakpoint(5, false, None), async {
            server.serve("changebreakpoint", json!({})).await
        });
        assert!(changed);
        assert_eq!(request.arguments["condition"], Value::Null);
        let bp = vm.find_breakpoint(5).unwrap();
        assert!(!bp.enabled);
        assert!(bp.condition.is_none());

        // A rejected clear leaves the registry alone
        let (cleared, _) = tokio::join!(vm.clear_breakpoint(5), async {
            let request = server.expect_request("clearbreakpoint").await;
            server.respond(&request, false, json!({})).await;
        });
        assert!(!cleared);
        assert!(vm.find_breakpoint(5).is_some());

        let (cleared, request) = tokio::join!(vm.clear_breakpoint(5), async {
            server.serve("clearbreakpoint", json!({})).await
        });
        assert!(cleared);
        assert_eq!(request.arguments["handle"], 5);
        assert!(vm.breakpoints().is_empty());
    }

    #[tokio::test]
    async fn test_update_and_toggle() {
        let (vm, _server) = attach_vm().await;

        vm.update_breakpoint(&obj(json!({
            "breakpoint": { "handle": 7, "location": { "url": "a.js", "line": 2 } }
        })));
        assert!(vm.find_breakpoint(7).unwrap().enabled);

        vm.toggle_breakpoint(&obj(json!({
            "breakpoint": { "handle": 7, "attributes": { "enabled": false } },
            "set": true
        })));
        let bp = vm.find_breakpoint(7).unwrap();
        assert!(!bp.enabled);
        assert_eq!(bp.location.line, Some(2));

        vm.toggle_breakpoint(&obj(json!({ "breakpoint": { "handle": 7 }, "set": false })));
        assert!(vm.find_breakpoint(7).is_none());
    }
}
