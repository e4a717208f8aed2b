// Debug session management
//
// One session per attached Crossfire server. The VM mirror does its own
// locking, so sessions are shared without an outer mutex.

use crossfire_client::{ClientConfig, EventQueue, VirtualMachine};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type SessionId = String;

#[derive(Debug)]
pub struct DebugSession {
    pub vm: Arc<VirtualMachine>,
    pub queue: EventQueue,
    pub config: ClientConfig,
}

impl DebugSession {
    /// Wrap an attached VM and register interest in every event kind
    pub fn new(vm: Arc<VirtualMachine>, config: ClientConfig) -> Self {
        let requests = vm.event_request_manager();
        requests.create_breakpoint_request();
        requests.create_script_load_request();
        requests.create_thread_enter_request();
        requests.create_thread_exit_request();
        requests.create_vm_death_request();

        let queue = vm.event_queue();
        Self { vm, queue, config }
    }
}

pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<SessionId, Arc<DebugSession>>>>,
    current_session: Arc<Mutex<Option<SessionId>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            current_session: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn create_session(&self, session: DebugSession) -> SessionId {
        let session_id = format!("session_{}", uuid::v4());

        let mut sessions = self.sessions.lock().await;
        sessions.insert(session_id.clone(), Arc::new(session));

        // Set as current session
        let mut current = self.current_session.lock().await;
        *current = Some(session_id.clone());

        session_id
    }

    pub async fn get_current_session(&self) -> Option<Arc<DebugSession>> {
        let current = self.current_session.lock().await;
        if let Some(session_id) = current.as_ref() {
            let sessions = self.sessions.lock().await;
            sessions.get(session_id).cloned()
        } else {
            None
        }
    }

    pub async fn get_current_session_id(&self) -> Option<SessionId> {
        let current = self.current_session.lock().await;
        current.clone()
    }

    /// Drop a session and release its connection
    pub async fn remove_session(&self, session_id: &str) -> Option<Arc<DebugSession>> {
        let removed = self.sessions.lock().await.remove(session_id);
        if let Some(session) = &removed {
            session.vm.dispose();
        }

        // Clear current if it was this session
        let mut current = self.current_session.lock().await;
        if current.as_deref() == Some(session_id) {
            *current = None;
        }
        removed
    }
}

// Simple unique ids for sessions
mod uuid {
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(1);

    pub fn v4() -> String {
        let counter = COUNTER.fetch_add(1, Ordering::SeqCst);
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        format!("{:x}{:x}", timestamp, counter)
    }
}
