// MCP request handlers
//
// Handles initialize, list tools, and debug tool execution

use crate::protocol::*;
use crate::session::{DebugSession, SessionManager};
use crate::tools;
use crossfire_client::{ClientConfig, Event, ThreadMirror, VirtualMachine};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const NO_SESSION: &str = "No active debug session. Use debug.attach first.";

fn to_result<T: Serialize>(value: T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(JsonRpcError::internal)
}

fn thread_id_arg(args: &Value) -> Option<&str> {
    args.get("thread_id").and_then(|v| v.as_str())
}

/// The named thread, else the first suspended one, else the first one
async fn pick_thread(vm: &VirtualMachine, thread_id: Option<&str>) -> Result<Arc<ThreadMirror>, String> {
    if let Some(id) = thread_id {
        return vm
            .find_thread(id)
            .await
            .ok_or_else(|| format!("Context not found: {}", id));
    }

    let threads = vm.all_threads().await;
    threads
        .iter()
        .find(|t| t.is_suspended())
        .or_else(|| threads.first())
        .cloned()
        .ok_or_else(|| "No contexts found".to_string())
}

fn describe_event(event: &Event) -> String {
    match event {
        Event::VmDeath { .. } => "vm_death: remote runtime closed the connection".to_string(),
        Event::ScriptLoad { thread, script, .. } => format!(
            "script_load: {} in context {}",
            script.url.as_deref().unwrap_or(&script.id),
            thread.id()
        ),
        Event::ThreadEnter { thread, .. } => format!(
            "thread_enter: context {} ({})",
            thread.id(),
            thread.href().unwrap_or("no url")
        ),
        Event::ThreadExit { thread, .. } => format!("thread_exit: context {}", thread.id()),
        Event::Breakpoint { thread, location, .. } => match location {
            Some(location) => format!("breakpoint: context {} at {}", thread.id(), location),
            None => format!("breakpoint: context {} suspended", thread.id()),
        },
    }
}

pub struct RequestHandler {
    session_manager: SessionManager,
}

impl RequestHandler {
    pub fn new() -> Self {
        Self {
            session_manager: SessionManager::new(),
        }
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "tools/list" => self.handle_list_tools(),
            "tools/call" => self.handle_call_tool(request.params).await,
            _ => Err(JsonRpcError {
                code: METHOD_NOT_FOUND,
                message: format!("Method not found: {}", request.method),
                data: None,
            }),
        };

        match result {
            Ok(value) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id: request.id,
                result: Some(value),
                error: None,
            },
            Err(error) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id: request.id,
                result: None,
                error: Some(error),
            },
        }
    }

    pub async fn handle_notification(&self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                info!("Client initialized");
            }
            "notifications/cancelled" => {
                debug!("Request cancelled");
            }
            _ => {
                warn!("Unknown notification: {}", notification.method);
            }
        }
    }

    fn handle_initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let _params: InitializeParams = serde_json::from_value(params.unwrap_or(json!({})))
            .map_err(|e| JsonRpcError {
                code: INVALID_PARAMS,
                message: format!("Invalid initialize params: {}", e),
                data: None,
            })?;

        let result = InitializeResult {
            protocol_version: "2024-11-05".to_string(),
            capabilities: ServerCapabilities {
                tools: ToolsCapability {},
            },
            server_info: ServerInfo {
                name: "crossfire-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: Some(
                "Crossfire debugging server for remote JavaScript. \
                Start by using debug.attach to connect to a browser, \
                then use debug.set_breakpoint, debug.wait_event, debug.get_stack, etc."
                    .to_string(),
            ),
        };

        to_result(result)
    }

    fn handle_list_tools(&self) -> Result<Value, JsonRpcError> {
        let result = ListToolsResult {
            tools: tools::get_tools(),
        };

        to_result(result)
    }

    async fn handle_call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let call_params: CallToolParams = serde_json::from_value(params.unwrap_or(json!({})))
            .map_err(|e| JsonRpcError {
                code: INVALID_PARAMS,
                message: format!("Invalid tool call params: {}", e),
                data: None,
            })?;

        // Route to appropriate handler based on tool name
        let args = call_params.arguments;
        let result = match call_params.name.as_str() {
            "debug.attach" => self.handle_attach(args).await,
            "debug.version" => self.handle_version(args).await,
            "debug.list_threads" => self.handle_list_threads(args).await,
            "debug.list_scripts" => self.handle_list_scripts(args).await,
            "debug.pause" => self.handle_pause(args).await,
            "debug.continue" => self.handle_continue(args).await,
            "debug.set_breakpoint" => self.handle_set_breakpoint(args).await,
            "debug.clear_breakpoint" => self.handle_clear_breakpoint(args).await,
            "debug.list_breakpoints" => self.handle_list_breakpoints(args).await,
            "debug.get_stack" => self.handle_get_stack(args).await,
            "debug.evaluate" => self.handle_evaluate(args).await,
            "debug.wait_event" => self.handle_wait_event(args).await,
            "debug.list_tools" => self.handle_remote_tools(args).await,
            "debug.open_url" => self.handle_open_url(args).await,
            "debug.disconnect" => self.handle_disconnect(args).await,
            _ => Err(format!("Unknown tool: {}", call_params.name)),
        };

        let call_result = match result {
            Ok(content) => CallToolResult {
                content: vec![ContentBlock::Text { text: content }],
                is_error: None,
            },
            Err(error) => CallToolResult {
                content: vec![ContentBlock::Text { text: error }],
                is_error: Some(true),
            },
        };
        to_result(call_result)
    }

    async fn current_session(&self) -> Result<Arc<DebugSession>, String> {
        self.session_manager
            .get_current_session()
            .await
            .ok_or_else(|| NO_SESSION.to_string())
    }

    async fn handle_attach(&self, args: Value) -> Result<String, String> {
        let args = if args.is_null() { json!({}) } else { args };
        let config: ClientConfig =
            serde_json::from_value(args).map_err(|e| format!("Invalid attach arguments: {}", e))?;

        let vm = VirtualMachine::attach(&config)
            .await
            .map_err(|e| format!("Failed to connect: {}", e))?;
        let breakpoints = vm.breakpoints().len();

        let endpoint = format!("{}:{}", config.host, config.port);
        let session_id = self
            .session_manager
            .create_session(DebugSession::new(vm, config))
            .await;

        Ok(format!(
            "✅ Connected to Crossfire server at {} (session: {})\n   Existing breakpoints: {}",
            endpoint, session_id, breakpoints
        ))
    }

    async fn handle_version(&self, _args: Value) -> Result<String, String> {
        let session = self.current_session().await?;
        let version = session.vm.version().await;
        Ok(format!("{} ({}), version {}", session.vm.name(), session.vm.description(), version))
    }

    async fn handle_list_threads(&self, _args: Value) -> Result<String, String> {
        let session = self.current_session().await?;
        let threads = session.vm.all_threads().await;

        if threads.is_empty() {
            return Ok("No contexts".to_string());
        }

        let mut output = format!("🧵 {} context(s):\n\n", threads.len());
        for thread in &threads {
            output.push_str(&format!(
                "  Context {}{}\n     URL: {}\n     Status: {}\n",
                thread.id(),
                if thread.is_current() { " (current)" } else { "" },
                thread.href().unwrap_or("-"),
                if thread.is_suspended() { "Suspended" } else { "Running" }
            ));
        }

        Ok(output)
    }

    async fn handle_list_scripts(&self, _args: Value) -> Result<String, String> {
        let session = self.current_session().await?;
        let scripts = session.vm.all_scripts().await;

        if scripts.is_empty() {
            return Ok("No scripts loaded".to_string());
        }

        let mut output = format!("📜 {} script(s):\n\n", scripts.len());
        for script in &scripts {
            output.push_str(&format!(
                "  {} (context {}, {} lines)\n",
                script.url.as_deref().unwrap_or(&script.id),
                script.context_id,
                script.line_count
            ));
        }

        Ok(output)
    }

    async fn handle_pause(&self, args: Value) -> Result<String, String> {
        let session = self.current_session().await?;

        if let Some(id) = thread_id_arg(&args) {
            let thread = pick_thread(&session.vm, Some(id)).await?;
            if !session.vm.suspend_thread(&thread).await {
                return Err(format!("Failed to suspend context {}", id));
            }
            return Ok(format!("⏸️  Context {} suspended", id));
        }

        session.vm.suspend().await;
        Ok("⏸️  Execution paused (all contexts suspended)".to_string())
    }

    async fn handle_continue(&self, args: Value) -> Result<String, String> {
        let session = self.current_session().await?;

        if let Some(id) = thread_id_arg(&args) {
            let thread = pick_thread(&session.vm, Some(id)).await?;
            if !session.vm.resume_thread(&thread).await {
                return Err(format!("Failed to resume context {}", id));
            }
            return Ok(format!("▶️  Context {} resumed", id));
        }

        session.vm.resume().await;
        Ok("▶️  Execution resumed".to_string())
    }

    async fn handle_set_breakpoint(&self, args: Value) -> Result<String, String> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "Missing 'url' parameter".to_string())?;

        let line = args
            .get("line")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| "Missing 'line' parameter".to_string())?;

        let condition = args.get("condition").and_then(|v| v.as_str());
        let enabled = args.get("enabled").and_then(|v| v.as_bool()).unwrap_or(true);
        let context_id = thread_id_arg(&args);

        let session = self.current_session().await?;
        let breakpoint = session
            .vm
            .set_breakpoint(url, line, condition, enabled, context_id)
            .await
            .ok_or_else(|| format!("Failed to set breakpoint at {}:{}", url, line))?;

        let mut output = format!(
            "✅ Breakpoint set at {}\n   Handle: {}",
            breakpoint.location, breakpoint.handle
        );
        if let Some(condition) = &breakpoint.condition {
            output.push_str(&format!("\n   Condition: {}", condition));
        }
        Ok(output)
    }

    async fn handle_clear_breakpoint(&self, args: Value) -> Result<String, String> {
        let handle = args
            .get("handle")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| "Missing 'handle' parameter".to_string())?;

        let session = self.current_session().await?;
        let location = session
            .vm
            .find_breakpoint(handle)
            .map(|bp| bp.location.to_string())
            .ok_or_else(|| format!("Breakpoint not found: {}", handle))?;

        if !session.vm.clear_breakpoint(handle).await {
            return Err(format!("Failed to clear breakpoint {}", handle));
        }

        Ok(format!("✅ Breakpoint cleared: {} at {}", handle, location))
    }

    async fn handle_list_breakpoints(&self, _args: Value) -> Result<String, String> {
        let session = self.current_session().await?;
        let breakpoints = session.vm.breakpoints();

        if breakpoints.is_empty() {
            return Ok("No breakpoints set".to_string());
        }

        let mut output = format!("📍 {} breakpoint(s):\n\n", breakpoints.len());
        for bp in &breakpoints {
            output.push_str(&format!(
                "  {} [{}] {}\n",
                if bp.enabled { "✓" } else { "✗" },
                bp.handle,
                bp.location
            ));
            if let Some(condition) = &bp.condition {
                output.push_str(&format!("     Condition: {}\n", condition));
            }
            if let Some(context_id) = &bp.context_id {
                output.push_str(&format!("     Context: {}\n", context_id));
            }
        }

        Ok(output)
    }

    async fn handle_get_stack(&self, args: Value) -> Result<String, String> {
        let session = self.current_session().await?;

        let max_frames = args
            .get("max_frames")
            .and_then(|v| v.as_u64())
            .unwrap_or(20) as usize;

        let include_variables = args
            .get("include_variables")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let thread = pick_thread(&session.vm, thread_id_arg(&args)).await?;
        let frames = session.vm.frames(&thread).await;

        if frames.is_empty() {
            return Ok(format!("Context {} has no stack frames", thread.id()));
        }

        let mut output = format!("🔍 Stack for context {} ({} frames):\n\n", thread.id(), frames.len());

        for frame in frames.iter().take(max_frames) {
            output.push_str(&format!("Frame {}:\n", frame.index()));
            output.push_str(&format!(
                "  Function: {}\n",
                frame.function_name().unwrap_or("(anonymous)")
            ));
            match frame.location().await {
                Some(location) => output.push_str(&format!(
                    "  Location: {}:{}\n",
                    location.script.url.as_deref().unwrap_or(&location.script.id),
                    location.line
                )),
                None => output.push_str(&format!(
                    "  Location: {}:{}\n",
                    frame.script_id().unwrap_or("?"),
                    frame.line()
                )),
            }

            if include_variables && !frame.variables().is_empty() {
                output.push_str(&format!("  Variables ({}):\n", frame.variables().len()));
                for variable in frame.variables() {
                    let value = frame.resolve(variable).await;
                    output.push_str(&format!("    {} = {}\n", variable.name, value));
                }
            }

            output.push('\n');
        }

        Ok(output)
    }

    async fn handle_evaluate(&self, args: Value) -> Result<String, String> {
        let expression = args
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "Missing 'expression' parameter".to_string())?;

        let frame_index = args.get("frame_index").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

        let session = self.current_session().await?;
        let thread = pick_thread(&session.vm, thread_id_arg(&args)).await?;
        let frame = session
            .vm
            .frame(&thread, frame_index)
            .await
            .ok_or_else(|| format!("No frame {} in context {}", frame_index, thread.id()))?;

        let value = frame
            .evaluate(expression)
            .await
            .ok_or_else(|| format!("Evaluation failed: {}", expression))?;

        Ok(format!("{} = {} ({})", expression, value, value.type_name()))
    }

    async fn handle_wait_event(&self, args: Value) -> Result<String, String> {
        let session = self.current_session().await?;
        let timeout = args
            .get("timeout_ms")
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
            .unwrap_or_else(|| session.config.event_timeout());

        let events = session
            .queue
            .remove(Some(timeout))
            .await
            .map_err(|e| format!("Event queue failed: {}", e))?;

        match events {
            Some(set) => {
                let lines: Vec<String> = set.events().iter().map(describe_event).collect();
                Ok(format!("⚡ {} event(s):\n  {}", lines.len(), lines.join("\n  ")))
            }
            None if !session.vm.is_connected() => {
                Err("Connection to the Crossfire server is closed".to_string())
            }
            None => Ok(format!("No events within {} ms", timeout.as_millis())),
        }
    }

    async fn handle_remote_tools(&self, _args: Value) -> Result<String, String> {
        let session = self.current_session().await?;
        let tools = session.vm.all_tools().await;

        if tools.is_empty() {
            return Ok("No tools reported".to_string());
        }

        let mut output = format!("🔧 {} tool(s):\n\n", tools.len());
        for tool in &tools {
            let name = tool.get("name").and_then(|v| v.as_str()).unwrap_or("?");
            let enabled = tool.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false);
            output.push_str(&format!("  {} {}\n", if enabled { "✓" } else { "✗" }, name));
        }

        Ok(output)
    }

    async fn handle_open_url(&self, args: Value) -> Result<String, String> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "Missing 'url' parameter".to_string())?;
        let new_context = args.get("new_context").and_then(|v| v.as_bool()).unwrap_or(false);

        let session = self.current_session().await?;
        let opened = if new_context {
            session.vm.create_context(url).await
        } else {
            session.vm.update_context(url).await
        };

        if !opened {
            return Err(format!("Failed to open {}", url));
        }
        Ok(format!("✅ Opened {}", url))
    }

    async fn handle_disconnect(&self, _args: Value) -> Result<String, String> {
        let current_session_id = self.session_manager.get_current_session_id().await;

        if let Some(session_id) = current_session_id {
            // Remove the session (this will also clear current session)
            self.session_manager.remove_session(&session_id).await;
            Ok(format!("✅ Disconnected from debug session: {}", session_id))
        } else {
            Err("No active debug session to disconnect".to_string())
        }
    }
}
