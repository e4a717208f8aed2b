// Script mirrors
//
// Scripts belong to the context that compiled them and are dropped
// together with it.

use crate::commands::{attributes, requests};
use crate::protocol::RequestPacket;
use crate::vm::{lock, VirtualMachine};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptMirror {
    pub id: String,
    pub context_id: String,
    pub url: Option<String>,
    pub line_offset: u64,
    pub column_offset: u64,
    pub source_length: u64,
    pub line_count: u64,
    pub compilation_type: Option<String>,
    /// Only present when the server sent it
    pub source: Option<String>,
}

fn u64_of(json: &Map<String, Value>, key: &str) -> u64 {
    json.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn string_of(json: &Map<String, Value>, key: &str) -> Option<String> {
    json.get(key).and_then(Value::as_str).map(str::to_string)
}

impl ScriptMirror {
    /// Parse a script description, unwrapping a `"script"` envelope
    pub fn from_json(context_id: &str, json: &Map<String, Value>) -> Option<Self> {
        let json = match json.get(attributes::SCRIPT) {
            Some(Value::Object(inner)) => inner,
            _ => json,
        };

        let url = string_of(json, attributes::URL);
        let id = string_of(json, attributes::ID).or_else(|| url.clone())?;

        Some(Self {
            id,
            context_id: context_id.to_string(),
            url,
            line_offset: u64_of(json, attributes::LINE_OFFSET),
            column_offset: u64_of(json, attributes::COLUMN_OFFSET),
            source_length: u64_of(json, attributes::SOURCE_LENGTH),
            line_count: u64_of(json, attributes::LINE_COUNT),
            compilation_type: string_of(json, attributes::COMPILATION_TYPE),
            source: string_of(json, attributes::SOURCE),
        })
    }
}

impl VirtualMachine {
    fn scripts_initialized(&self) -> bool {
        lock(&self.scripts).is_some()
    }

    fn cached_scripts(&self) -> Option<Vec<Arc<ScriptMirror>>> {
        lock(&self.scripts)
            .as_ref()
            .map(|scripts| scripts.values().cloned().collect())
    }

    // Caller holds `scripts_gate`
    async fn populate_scripts(&self) {
        if self.scripts_initialized() || !self.ready() {
            return;
        }

        let mut registry = HashMap::new();
        for thread in self.all_threads().await {
            let request = RequestPacket::new(requests::SCRIPTS, Some(thread.id()))
                .with_argument(attributes::INCLUDE_SOURCE, false);
            let response = self.send_request(request).await;
            if !response.is_success() {
                continue;
            }
            if let Some(Value::Array(scripts)) = response.body.get(attributes::SCRIPTS) {
                for script in scripts.iter().filter_map(Value::as_object) {
                    if let Some(script) = ScriptMirror::from_json(thread.id(), script) {
                        registry.insert(script.id.clone(), Arc::new(script));
                    }
                }
            }
        }

        // An empty listing is not kept: the next lookup asks again
        if registry.is_empty() {
            debug!("VM [no scripts loaded]");
            return;
        }

        let mut scripts = lock(&self.scripts);
        if self.ready() {
            *scripts = Some(registry);
        }
    }

    pub async fn all_scripts(&self) -> Vec<Arc<ScriptMirror>> {
        let _gate = self.scripts_gate.lock().await;
        self.populate_scripts().await;
        self.cached_scripts().unwrap_or_default()
    }

    pub async fn find_script(&self, id: &str) -> Option<Arc<ScriptMirror>> {
        let _gate = self.scripts_gate.lock().await;
        self.populate_scripts().await;

        let script = lock(&self.scripts)
            .as_ref()
            .and_then(|scripts| scripts.get(id).cloned());
        if script.is_none() {
            debug!("VM [failed to find script]: {}", id);
        }
        script
    }

    /// Register a script announced by `context_id`
    pub async fn add_script(&self, context_id: &str, json: &Map<String, Value>) -> Option<Arc<ScriptMirror>> {
        let _gate = self.scripts_gate.lock().await;
        self.populate_scripts().await;

        let script = Arc::new(ScriptMirror::from_json(context_id, json)?);
        let mut scripts = lock(&self.scripts);
        if !self.ready() {
            return None;
        }
        scripts
            .get_or_insert_with(HashMap::new)
            .insert(script.id.clone(), script.clone());
        Some(script)
    }

    pub fn remove_script(&self, id: &str) -> Option<Arc<ScriptMirror>> {
        let removed = lock(&self.scripts).as_mut().and_then(|scripts| scripts.remove(id));
        if removed.is_none() {
            debug!("VM [failed to remove script]: {}", id);
        }
        removed
    }

    /// Drop every script owned by a destroyed context
    pub fn remove_scripts_for_context(&self, context_id: &str) -> usize {
        let mut guard = lock(&self.scripts);
        let Some(scripts) = guard.as_mut() else {
            return 0;
        };
        let before = scripts.len();
        scripts.retain(|_, script| script.context_id != context_id);
        before - scripts.len()
    }

    /// Fetch the source text of a script that was announced without it
    pub async fn script_source(&self, script: &ScriptMirror) -> Option<String> {
        if let Some(source) = &script.source {
            return Some(source.clone());
        }

        let request = RequestPacket::new(requests::SCRIPT, Some(script.context_id.as_str()))
            .with_argument(attributes::URL, script.url.as_deref().unwrap_or(&script.id))
            .with_argument(attributes::INCLUDE_SOURCE, true);
        let response = self.send_request(request).await;
        if !response.is_success() {
            return None;
        }

        let json = match response.body.get(attributes::SCRIPT) {
            Some(Value::Object(inner)) => inner,
            _ => &response.body,
        };
        string_of(json, attributes::SOURCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::attach_vm_with_threads;
    use serde_json::json;
    use std::time::Duration;

    fn script_json(id: &str) -> Value {
        json!({ "script": { "id": id, "url": id, "lineCount": 10, "sourceLength": 200 } })
    }

    #[test]
    fn test_script_from_json() {
        let json = script_json("http://localhost/a.js");
        let script = ScriptMirror::from_json("1", json.as_object().unwrap()).unwrap();
        assert_eq!(script.id, "http://localhost/a.js");
        assert_eq!(script.context_id, "1");
        assert_eq!(script.line_count, 10);
        assert!(script.source.is_none());

        // The url stands in for a missing id
        let json = json!({ "url": "http://localhost/b.js", "source": "var b;" });
        let script = ScriptMirror::from_json("1", json.as_object().unwrap()).unwrap();
        assert_eq!(script.id, "http://localhost/b.js");
        assert_eq!(script.source.as_deref(), Some("var b;"));

        assert!(ScriptMirror::from_json("1", json!({}).as_object().unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_all_scripts_per_context() {
        let (vm, mut server) = attach_vm_with_threads(&["1"]).await;

        let (scripts, request) = tokio::join!(vm.all_scripts(), async {
            server
                .serve(
                    "scripts",
                    json!({ "scripts": [script_json("http://localhost/a.js"), script_json("http://localhost/b.js")] }),
                )
                .await
        });

        assert_eq!(request.context_id.as_deref(), Some("1"));
        assert_eq!(request.arguments["includeSource"], false);
        assert_eq!(scripts.len(), 2);

        // Cached from here on
        assert!(vm.find_script("http://localhost/a.js").await.is_some());
        server.assert_quiet(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_empty_listing_is_not_cached() {
        let (vm, mut server) = attach_vm_with_threads(&["1"]).await;

        let (scripts, _) = tokio::join!(vm.all_scripts(), async {
            server.serve("scripts", json!({ "scripts": [] })).await
        });
        assert!(scripts.is_empty());

        let (found, _) = tokio::join!(vm.find_script("http://localhost/a.js"), async {
            server
                .serve("scripts", json!({ "scripts": [script_json("http://localhost/a.js")] }))
                .await
        });
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_remove_scripts_for_context() {
        let (vm, mut server) = attach_vm_with_threads(&["1", "2"]).await;

        let body = |id: &str| json!({ "scripts": [script_json(id)] });
        let (scripts, _) = tokio::join!(vm.all_scripts(), async {
            // One scripts request per context, in whatever order the registry yields
            for _ in 0..2 {
                let request = server.expect_request("scripts").await;
                let id = format!("http://localhost/{}.js", request.context_id.as_deref().unwrap());
                server.respond(&request, true, body(&id)).await;
            }
        });
        assert_eq!(scripts.len(), 2);

        assert_eq!(vm.remove_scripts_for_context("1"), 1);
        assert!(vm.find_script("http://localhost/1.js").await.is_none());
        assert!(vm.find_script("http://localhost/2.js").await.is_some());

        assert!(vm.remove_script("http://localhost/2.js").is_some());
        assert!(vm.remove_script("http://localhost/2.js").is_none());
    }

    #[tokio::test]
    async fn test_script_source() {
        let (vm, mut server) = attach_vm_with_threads(&["1"]).await;
        let json = script_json("http://localhost/a.js");
        let script = ScriptMirror::from_json("1", json.as_object().unwrap()).unwrap();

        let (source, request) = tokio::join!(vm.script_source(&script), async {
            server
                .serve("script", json!({ "script": { "id": "http://localhost/a.js", "source": "var a = 1;" } }))
                .await
        });

        assert_eq!(request.arguments["includeSource"], true);
        assert_eq!(source.as_deref(), Some("var a = 1;"));
    }
}
