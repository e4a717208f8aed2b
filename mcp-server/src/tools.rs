// Debug tools schema definitions
//
// MCP tools for Crossfire debugging operations

use crate::protocol::Tool;
use serde_json::{json, Value};

fn tool(name: &str, description: &str, input_schema: Value) -> Tool {
    Tool {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

fn no_arguments() -> Value {
    json!({ "type": "object", "properties": {} })
}

fn thread_argument(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "thread_id": {
                "type": "string",
                "description": description
            }
        }
    })
}

pub fn get_tools() -> Vec<Tool> {
    vec![
        tool(
            "debug.attach",
            "Connect to a browser or runtime running a Crossfire server",
            json!({
                "type": "object",
                "properties": {
                    "host": {
                        "type": "string",
                        "description": "Crossfire host",
                        "default": "localhost"
                    },
                    "port": {
                        "type": "integer",
                        "description": "Crossfire port",
                        "default": 5000
                    },
                    "request_timeout_ms": {
                        "type": "integer",
                        "description": "How long to wait for each response",
                        "default": 3000
                    },
                    "trace_packets": {
                        "type": "boolean",
                        "description": "Log every packet at debug level",
                        "default": false
                    }
                }
            }),
        ),
        tool("debug.version", "Report the Crossfire server version", no_arguments()),
        tool(
            "debug.list_threads",
            "List the remote contexts (pages, frames, workers)",
            no_arguments(),
        ),
        tool("debug.list_scripts", "List the scripts loaded in the remote runtime", no_arguments()),
        tool(
            "debug.pause",
            "Suspend execution (all contexts or one context)",
            thread_argument("Context ID to suspend (optional, suspends all if omitted)"),
        ),
        tool(
            "debug.continue",
            "Resume execution (all contexts or one context)",
            thread_argument("Context ID to resume (optional, resumes all if omitted)"),
        ),
        tool(
            "debug.set_breakpoint",
            "Set a line breakpoint in a script",
            json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "Script URL (e.g., 'http://localhost:8080/app.js')"
                    },
                    "line": {
                        "type": "integer",
                        "description": "Line number"
                    },
                    "condition": {
                        "type": "string",
                        "description": "Only break when this expression is true (optional)"
                    },
                    "enabled": {
                        "type": "boolean",
                        "default": true
                    },
                    "thread_id": {
                        "type": "string",
                        "description": "Limit to one context (optional, global if omitted)"
                    }
                },
                "required": ["url", "line"]
            }),
        ),
        tool(
            "debug.clear_breakpoint",
            "Clear a specific breakpoint",
            json!({
                "type": "object",
                "properties": {
                    "handle": {
                        "type": "integer",
                        "description": "Breakpoint handle from list_breakpoints"
                    }
                },
                "required": ["handle"]
            }),
        ),
        tool("debug.list_breakpoints", "List all active breakpoints", no_arguments()),
        tool(
            "debug.get_stack",
            "Get the call stack of a suspended context",
            json!({
                "type": "object",
                "properties": {
                    "thread_id": {
                        "type": "string",
                        "description": "Context ID (optional, defaults to the first suspended context)"
                    },
                    "max_frames": {
                        "type": "integer",
                        "default": 20
                    },
                    "include_variables": {
                        "type": "boolean",
                        "default": true
                    }
                }
            }),
        ),
        tool(
            "debug.evaluate",
            "Evaluate an expression in a stack frame",
            json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "JavaScript expression"
                    },
                    "thread_id": {
                        "type": "string",
                        "description": "Context ID (optional, defaults to the first suspended context)"
                    },
                    "frame_index": {
                        "type": "integer",
                        "default": 0
                    }
                },
                "required": ["expression"]
            }),
        ),
        tool(
            "debug.wait_event",
            "Wait for the next debug event (breakpoint hit, script load, context change)",
            json!({
                "type": "object",
                "properties": {
                    "timeout_ms": {
                        "type": "integer",
                        "description": "Maximum time to wait",
                        "default": 3000
                    }
                }
            }),
        ),
        tool("debug.list_tools", "List the remote Crossfire tools", no_arguments()),
        tool(
            "debug.open_url",
            "Open a URL in the remote browser",
            json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string"
                    },
                    "new_context": {
                        "type": "boolean",
                        "description": "Open in a new context instead of the current one",
                        "default": false
                    }
                },
                "required": ["url"]
            }),
        ),
        tool("debug.disconnect", "Disconnect from the debug session", no_arguments()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tool_names_unique_and_namespaced() {
        let tools = get_tools();
        let names: HashSet<_> = tools.iter().map(|t| t.name.as_str()).collect();

        assert_eq!(names.len(), tools.len());
        assert!(names.iter().all(|n| n.starts_with("debug.")));
        assert!(names.contains("debug.attach"));
        assert!(names.contains("debug.wait_event"));
    }

    #[test]
    fn test_schemas_are_objects() {
        for tool in get_tools() {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
        }
    }
}
