// Standing event registrations
//
// The event queue only surfaces an event when someone asked for that
// kind. Registrations live locally; nothing is sent to the remote side.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventRequestKind {
    ScriptLoad,
    ThreadEnter,
    ThreadExit,
    VmDeath,
    Breakpoint,
}

/// A caller-installed interest in one kind of event
#[derive(Debug)]
pub struct EventRequest {
    id: u64,
    kind: EventRequestKind,
    enabled: AtomicBool,
}

impl EventRequest {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> EventRequestKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct EventRequestManager {
    next_id: AtomicU64,
    requests: Mutex<Vec<Arc<EventRequest>>>,
}

impl EventRequestManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<EventRequest>>> {
        match self.requests.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register interest in `kind`; new registrations start enabled
    pub fn create(&self, kind: EventRequestKind) -> Arc<EventRequest> {
        let request = Arc::new(EventRequest {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            kind,
            enabled: AtomicBool::new(true),
        });
        debug!("Created event request {} for {:?}", request.id, kind);
        self.lock().push(request.clone());
        request
    }

    pub fn create_script_load_request(&self) -> Arc<EventRequest> {
        self.create(EventRequestKind::ScriptLoad)
    }

    pub fn create_thread_enter_request(&self) -> Arc<EventRequest> {
        self.create(EventRequestKind::ThreadEnter)
    }

    pub fn create_thread_exit_request(&self) -> Arc<EventRequest> {
        self.create(EventRequestKind::ThreadExit)
    }

    pub fn create_vm_death_request(&self) -> Arc<EventRequest> {
        self.create(EventRequestKind::VmDeath)
    }

    pub fn create_breakpoint_request(&self) -> Arc<EventRequest> {
        self.create(EventRequestKind::Breakpoint)
    }

    /// Remove a registration; returns false if it was not registered
    pub fn delete(&self, request: &EventRequest) -> bool {
        let mut requests = self.lock();
        let before = requests.len();
        requests.retain(|r| r.id != request.id);
        requests.len() != before
    }

    /// Enabled registrations of one kind, in creation order
    pub fn requests(&self, kind: EventRequestKind) -> Vec<Arc<EventRequest>> {
        self.lock()
            .iter()
            .filter(|r| r.kind == kind && r.is_enabled())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every registration
    pub fn dispose(&self) {
        let mut requests = self.lock();
        if !requests.is_empty() {
            debug!("Disposing {} event requests", requests.len());
        }
        requests.clear();
    }
}
