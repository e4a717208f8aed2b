// Crossfire event classification
//
// Raw event names map onto a fixed set of kinds. Events surfaced to
// callers are synthesised per standing registration.

use crate::breakpoint::BreakpointLocation;
use crate::commands::events;
use crate::eventrequest::EventRequest;
use crate::script::ScriptMirror;
use crate::thread::ThreadMirror;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Debug,
    Error,
    Info,
    Log,
    Warn,
}

/// Classification of a raw event name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEventKind {
    Closed,
    Break,
    Script,
    ContextCreated,
    ContextDestroyed,
    Console(ConsoleLevel),
    InspectNode,
    Resume,
    ToggleBreakpoint,
    Unrecognized(String),
}

impl RawEventKind {
    pub fn classify(name: &str) -> Self {
        match name {
            events::CLOSED => RawEventKind::Closed,
            events::ON_BREAK => RawEventKind::Break,
            events::ON_SCRIPT => RawEventKind::Script,
            events::ON_CONTEXT_CREATED => RawEventKind::ContextCreated,
            events::ON_CONTEXT_DESTROYED => RawEventKind::ContextDestroyed,
            events::ON_CONSOLE_DEBUG => RawEventKind::Console(ConsoleLevel::Debug),
            events::ON_CONSOLE_ERROR => RawEventKind::Console(ConsoleLevel::Error),
            events::ON_CONSOLE_INFO => RawEventKind::Console(ConsoleLevel::Info),
            events::ON_CONSOLE_LOG => RawEventKind::Console(ConsoleLevel::Log),
            events::ON_CONSOLE_WARN => RawEventKind::Console(ConsoleLevel::Warn),
            events::ON_INSPECT_NODE => RawEventKind::InspectNode,
            events::ON_RESUME => RawEventKind::Resume,
            events::ON_TOGGLE_BREAKPOINT => RawEventKind::ToggleBreakpoint,
            other => RawEventKind::Unrecognized(other.to_string()),
        }
    }
}

/// A debug event, tied to the registration that asked for it
#[derive(Debug, Clone)]
pub enum Event {
    VmDeath {
        request: Arc<EventRequest>,
    },
    ScriptLoad {
        request: Arc<EventRequest>,
        thread: Arc<ThreadMirror>,
        script: Arc<ScriptMirror>,
    },
    ThreadEnter {
        request: Arc<EventRequest>,
        thread: Arc<ThreadMirror>,
    },
    ThreadExit {
        request: Arc<EventRequest>,
        thread: Arc<ThreadMirror>,
    },
    Breakpoint {
        request: Arc<EventRequest>,
        thread: Arc<ThreadMirror>,
        location: Option<BreakpointLocation>,
    },
}

impl Event {
    pub fn request(&self) -> &Arc<EventRequest> {
        match self {
            Event::VmDeath { request }
            | Event::ScriptLoad { request, .. }
            | Event::ThreadEnter { request, .. }
            | Event::ThreadExit { request, .. }
            | Event::Breakpoint { request, .. } => request,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::VmDeath { .. } => "vm_death",
            Event::ScriptLoad { .. } => "script_load",
            Event::ThreadEnter { .. } => "thread_enter",
            Event::ThreadExit { .. } => "thread_exit",
            Event::Breakpoint { .. } => "breakpoint",
        }
    }
}

/// Events produced from one raw transport event
#[derive(Debug, Clone, Default)]
pub struct EventSet {
    thread: Option<Arc<ThreadMirror>>,
    events: Vec<Event>,
}

impl EventSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_thread(&mut self, thread: Arc<ThreadMirror>) {
        self.thread = Some(thread);
    }

    pub fn thread(&self) -> Option<&Arc<ThreadMirror>> {
        self.thread.as_ref()
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl IntoIterator for EventSet {
    type Item = Event;
    type IntoIter = std::vec::IntoIter<Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}
