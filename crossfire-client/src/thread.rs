// Thread (context) mirrors
//
// A Crossfire context is what the debugger calls a thread. Frames are
// fetched on demand and never cached on the thread.

use crate::commands::{attributes, requests};
use crate::protocol::RequestPacket;
use crate::stackframe::StackFrameMirror;
use crate::vm::{lock, VirtualMachine};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub struct ThreadMirror {
    id: String,
    href: Option<String>,
    current: bool,
    suspended: AtomicBool,
}

impl ThreadMirror {
    pub fn new(id: &str, href: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            href: href.map(str::to_string),
            current: false,
            suspended: AtomicBool::new(false),
        }
    }

    /// Parse one entry of a `listcontexts` response
    pub fn from_json(json: &Map<String, Value>) -> Option<Self> {
        let id = json
            .get(attributes::CONTEXT_ID)
            .or_else(|| json.get(attributes::ID))
            .and_then(Value::as_str)?;
        let href = json
            .get(attributes::HREF)
            .or_else(|| json.get(attributes::URL))
            .and_then(Value::as_str);

        let mut thread = Self::new(id, href);
        thread.current = json
            .get(attributes::CURRENT)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Some(thread)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn href(&self) -> Option<&str> {
        self.href.as_deref()
    }

    pub fn is_current(&self) -> bool {
        self.current
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.is_suspended()
    }

    pub fn mark_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::SeqCst);
    }
}

impl VirtualMachine {
    fn threads_initialized(&self) -> bool {
        lock(&self.threads).is_some()
    }

    pub(crate) fn cached_threads(&self) -> Option<Vec<Arc<ThreadMirror>>> {
        lock(&self.threads)
            .as_ref()
            .map(|threads| threads.values().cloned().collect())
    }

    // Caller holds `threads_gate`
    async fn populate_threads(&self) {
        if self.threads_initialized() || !self.ready() {
            return;
        }

        let response = self
            .send_request(RequestPacket::new(requests::LIST_CONTEXTS, None))
            .await;

        // A failed listing still initialises the registry
        let mut registry = HashMap::new();
        if response.is_success() {
            if let Some(Value::Array(contexts)) = response.body.get(attributes::CONTEXTS) {
                for context in contexts {
                    if let Some(thread) = context.as_object().and_then(ThreadMirror::from_json) {
                        registry.insert(thread.id.clone(), Arc::new(thread));
                    }
                }
            }
        }
        debug!("VM [populated {} threads]", registry.len());

        let mut threads = lock(&self.threads);
        if self.ready() {
            *threads = Some(registry);
        }
    }

    /// All known threads; the first call asks the remote side
    pub async fn all_threads(&self) -> Vec<Arc<ThreadMirror>> {
        let _gate = self.threads_gate.lock().await;
        self.populate_threads().await;
        self.cached_threads().unwrap_or_default()
    }

    /// Register a new context. Returns `None` once disconnected.
    pub async fn add_thread(&self, id: &str, href: Option<&str>) -> Option<Arc<ThreadMirror>> {
        let _gate = self.threads_gate.lock().await;
        self.populate_threads().await;

        let thread = Arc::new(ThreadMirror::new(id, href));
        let mut threads = lock(&self.threads);
        let registry = threads.as_mut()?;
        registry.insert(id.to_string(), thread.clone());
        Some(thread)
    }

    pub fn remove_thread(&self, id: &str) -> Option<Arc<ThreadMirror>> {
        let removed = lock(&self.threads).as_mut().and_then(|threads| threads.remove(id));
        if removed.is_none() {
            debug!("VM [failed to remove thread]: {}", id);
        }
        removed
    }

    pub async fn find_thread(&self, id: &str) -> Option<Arc<ThreadMirror>> {
        let _gate = self.threads_gate.lock().await;
        self.populate_threads().await;

        let thread = lock(&self.threads)
            .as_ref()
            .and_then(|threads| threads.get(id).cloned());
        if thread.is_none() {
            debug!("VM [failed to find thread]: {}", id);
        }
        thread
    }

    /// Resume every cached thread that is suspended
    pub async fn resume(&self) {
        if !self.ready() {
            return;
        }
        let threads = self.cached_threads().unwrap_or_default();
        for thread in threads.iter().filter(|t| t.is_suspended()) {
            self.resume_thread(thread).await;
        }
    }

    /// Suspend every cached thread that is running
    pub async fn suspend(&self) {
        if !self.ready() {
            return;
        }
        let threads = self.cached_threads().unwrap_or_default();
        for thread in threads.iter().filter(|t| t.is_running()) {
            self.suspend_thread(thread).await;
        }
    }

    pub async fn resume_thread(&self, thread: &ThreadMirror) -> bool {
        let request = RequestPacket::new(requests::CONTINUE, Some(thread.id()));
        let resumed = self.send_request(request).await.is_success();
        if resumed {
            thread.mark_suspended(false);
        }
        resumed
    }

    pub async fn suspend_thread(&self, thread: &ThreadMirror) -> bool {
        let request = RequestPacket::new(requests::SUSPEND, Some(thread.id()));
        let suspended = self.send_request(request).await.is_success();
        if suspended {
            thread.mark_suspended(true);
        }
        suspended
    }

    /// Issue exactly one `continue`, scoped to `thread` when there is one
    pub async fn resume_target(&self, thread: Option<&Arc<ThreadMirror>>) -> bool {
        let request = RequestPacket::new(requests::CONTINUE, thread.map(|t| t.id()));
        let resumed = self.send_request(request).await.is_success();
        if let (true, Some(thread)) = (resumed, thread) {
            thread.mark_suspended(false);
        }
        resumed
    }

    /// The thread's current call stack, top frame first
    pub async fn frames(self: &Arc<Self>, thread: &Arc<ThreadMirror>) -> Vec<StackFrameMirror> {
        let request = RequestPacket::new(requests::BACKTRACE, Some(thread.id()))
            .with_argument(attributes::FROM_FRAME, 0)
            .with_argument(attributes::INCLUDE_SCOPES, true);
        let response = self.send_request(request).await;
        if !response.is_success() {
            return Vec::new();
        }

        match response.body.get(attributes::FRAMES) {
            Some(Value::Array(frames)) => frames
                .iter()
                .filter_map(Value::as_object)
                .map(|json| StackFrameMirror::from_json(self.clone(), thread.clone(), json))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// A single frame by index
    pub async fn frame(self: &Arc<Self>, thread: &Arc<ThreadMirror>, index: u32) -> Option<StackFrameMirror> {
        let request = RequestPacket::new(requests::FRAME, Some(thread.id()))
            .with_argument(attributes::NUMBER, index)
            .with_argument(attributes::INCLUDE_SCOPES, true);
        let response = self.send_request(request).await;
        if !response.is_success() {
            return None;
        }

        let json = match response.body.get(attributes::FRAME) {
            Some(Value::Object(frame)) => frame,
            _ => &response.body,
        };
        Some(StackFrameMirror::from_json(self.clone(), thread.clone(), json))
    }
}
