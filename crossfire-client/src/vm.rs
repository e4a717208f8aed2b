// Virtual machine mirror
//
// Local view of the remote runtime. Thread and script registries are
// filled on first use; the breakpoint registry is kept in step by
// explicit updates. Once disconnected the mirror never comes back.

use crate::breakpoint::{BreakpointMirror, BreakpointNotifier};
use crate::commands::{attributes, requests};
use crate::config::ClientConfig;
use crate::connection::CrossfireConnection;
use crate::eventrequest::EventRequestManager;
use crate::protocol::*;
use crate::queue::EventQueue;
use crate::script::ScriptMirror;
use crate::thread::ThreadMirror;
use crate::value::ValueMirror;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Returned by `version()` when the remote side cannot tell us
pub const UNKNOWN: &str = "unknown";
pub const VM_NAME: &str = "Crossfire";
pub const VM_DESCRIPTION: &str = "Crossfire remote JavaScript debugger";

/// `None` until first populated
pub(crate) type Registry<T> = Mutex<Option<HashMap<String, Arc<T>>>>;

/// Lock a registry, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug)]
pub struct VirtualMachine {
    session: CrossfireConnection,
    connected: AtomicBool,
    pub(crate) threads: Registry<ThreadMirror>,
    // Serialises population of `threads`; never held while locking `scripts_gate`
    pub(crate) threads_gate: tokio::sync::Mutex<()>,
    pub(crate) scripts: Registry<ScriptMirror>,
    pub(crate) scripts_gate: tokio::sync::Mutex<()>,
    pub(crate) breakpoints: Mutex<HashMap<u64, BreakpointMirror>>,
    event_requests: EventRequestManager,
    queue_disposed: AtomicBool,
    notifier: Mutex<Option<Arc<dyn BreakpointNotifier>>>,
}

impl VirtualMachine {
    /// Wrap an established session
    pub fn new(session: CrossfireConnection) -> Arc<Self> {
        Arc::new(Self {
            session,
            connected: AtomicBool::new(true),
            threads: Mutex::new(None),
            threads_gate: tokio::sync::Mutex::new(()),
            scripts: Mutex::new(None),
            scripts_gate: tokio::sync::Mutex::new(()),
            breakpoints: Mutex::new(HashMap::new()),
            event_requests: EventRequestManager::new(),
            queue_disposed: AtomicBool::new(false),
            notifier: Mutex::new(None),
        })
    }

    /// Connect, handshake and pull the existing breakpoints
    pub async fn attach(config: &ClientConfig) -> CrossfireResult<Arc<Self>> {
        let session = CrossfireConnection::connect(config).await?;
        let vm = Self::new(session);
        let count = vm.initialize_breakpoints().await;
        info!("Attached to Crossfire VM ({} breakpoints)", count);
        Ok(vm)
    }

    /// Whether requests may still be issued
    pub fn ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.ready()
    }

    pub fn config(&self) -> &ClientConfig {
        self.session.config()
    }

    fn trace(&self) -> bool {
        self.session.config().trace_packets
    }

    /// Send a request and wait for its response.
    ///
    /// Never fails: timeouts and application failures come back as the
    /// failed sentinel, and a lost connection disconnects the mirror first.
    pub async fn send_request(&self, request: RequestPacket) -> ResponsePacket {
        if !self.ready() {
            debug!("VM [not ready, dropping {} request]", request.command);
            return ResponsePacket::failed();
        }

        let command = request.command.clone();
        match self.session.send_request(request).await {
            Ok(response) => {
                if !response.is_success() {
                    debug!("VM [failed {} request]", command);
                }
                response
            }
            Err(e) if e.is_disconnect() => {
                warn!("Connection lost during {} request", command);
                self.disconnect_vm();
                ResponsePacket::failed()
            }
            Err(e) => {
                warn!("{} request failed: {}", command, e);
                ResponsePacket::failed()
            }
        }
    }

    pub(crate) async fn receive_event(&self, timeout: Option<Duration>) -> CrossfireResult<EventPacket> {
        let packet = self.session.receive_event(timeout).await?;
        if self.trace() {
            debug!("QUEUE: [event - {}] {:?}", packet.event, packet.body);
        }
        Ok(packet)
    }

    pub fn event_request_manager(&self) -> &EventRequestManager {
        &self.event_requests
    }

    pub fn event_queue(self: &Arc<Self>) -> EventQueue {
        EventQueue::new(self.clone())
    }

    pub(crate) fn dispose_queue(&self) {
        self.queue_disposed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_queue_disposed(&self) -> bool {
        self.queue_disposed.load(Ordering::SeqCst)
    }

    /// Tear everything down. Only the first call has any effect.
    pub fn disconnect_vm(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            debug!("VM [already disconnected]");
            return;
        }
        info!("VM [disconnecting]");

        lock(&self.threads).take();
        lock(&self.scripts).take();
        lock(&self.breakpoints).clear();

        self.dispose_queue();
        self.event_requests.dispose();
        self.session.dispose();

        if let Some(notifier) = lock(&self.notifier).take() {
            notifier.detach();
        }
    }

    pub fn terminate(&self) {
        if self.ready() {
            self.disconnect_vm();
        }
    }

    pub fn dispose(&self) {
        debug!("VM [disposing]");
        self.dispose_queue();
        self.event_requests.dispose();
        self.disconnect_vm();
    }

    /// Attach the external breakpoint-change listener; it is detached
    /// when the mirror disconnects
    pub fn register_notifier(&self, notifier: Arc<dyn BreakpointNotifier>) {
        if !self.ready() {
            notifier.detach();
            return;
        }
        if let Some(previous) = lock(&self.notifier).replace(notifier) {
            previous.detach();
        }
    }

    pub fn name(&self) -> &'static str {
        VM_NAME
    }

    pub fn description(&self) -> &'static str {
        VM_DESCRIPTION
    }

    pub async fn version(&self) -> String {
        if !self.ready() {
            return UNKNOWN.to_string();
        }

        let response = self
            .send_request(RequestPacket::new(requests::VERSION, None))
            .await;
        if response.is_success() {
            match response.body.get(attributes::VERSION) {
                Some(Value::String(version)) => return version.clone(),
                Some(Value::Number(version)) => return version.to_string(),
                _ => {}
            }
        }
        UNKNOWN.to_string()
    }

    pub fn mirror_of_null(&self) -> ValueMirror {
        ValueMirror::Null
    }

    pub fn mirror_of_undefined(&self) -> ValueMirror {
        ValueMirror::Undefined
    }

    pub fn mirror_of_bool(&self, value: bool) -> ValueMirror {
        ValueMirror::Boolean(value)
    }

    pub fn mirror_of_number(&self, value: f64) -> ValueMirror {
        ValueMirror::Number(value)
    }

    pub fn mirror_of_string(&self, value: &str) -> ValueMirror {
        ValueMirror::String(value.to_string())
    }

    /// Every tool the server knows about, enabled or not
    pub async fn all_tools(&self) -> Vec<Value> {
        if !self.ready() {
            return Vec::new();
        }
        let response = self
            .send_request(RequestPacket::new(requests::GET_TOOLS, None))
            .await;
        match response.body.get(attributes::TOOLS) {
            Some(Value::Array(tools)) if response.is_success() => tools.clone(),
            _ => Vec::new(),
        }
    }

    pub async fn enable_tools(&self, tools: &[&str]) -> bool {
        self.tool_request(requests::ENABLE_TOOLS, tools).await
    }

    pub async fn disable_tools(&self, tools: &[&str]) -> bool {
        self.tool_request(requests::DISABLE_TOOLS, tools).await
    }

    async fn tool_request(&self, command: &str, tools: &[&str]) -> bool {
        if tools.is_empty() || !self.ready() {
            return false;
        }
        let request = RequestPacket::new(command, None).with_argument(attributes::TOOLS, tools.to_vec());
        self.send_request(request).await.is_success()
    }

    /// Open or refresh `url` in the remote browser
    pub async fn update_context(&self, url: &str) -> bool {
        if !self.ready() {
            return false;
        }
        let request = RequestPacket::new(requests::UPDATE_CONTEXT, None).with_argument(attributes::HREF, url);
        self.send_request(request).await.is_success()
    }

    /// Open `url` in a new context
    pub async fn create_context(&self, url: &str) -> bool {
        if !self.ready() {
            return false;
        }
        let request = RequestPacket::new(requests::CREATE_CONTEXT, None).with_argument(attributes::URL, url);
        self.send_request(request).await.is_success()
    }
}
