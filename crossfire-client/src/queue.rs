// Event queue
//
// Pulls raw events off the session, keeps the VM registries in step and
// turns each raw event into an event set for the registrations that
// want it. Sets nobody asked for are resumed instead of returned.

use crate::breakpoint::BreakpointLocation;
use crate::commands::attributes;
use crate::eventrequest::EventRequestKind;
use crate::events::{ConsoleLevel, Event, EventSet, RawEventKind};
use crate::protocol::{CrossfireError, CrossfireResult, EventPacket};
use crate::vm::VirtualMachine;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct EventQueue {
    vm: Arc<VirtualMachine>,
}

impl EventQueue {
    pub(crate) fn new(vm: Arc<VirtualMachine>) -> Self {
        Self { vm }
    }

    pub fn vm(&self) -> &Arc<VirtualMachine> {
        &self.vm
    }

    /// Wait for the next non-empty event set.
    ///
    /// Every receive is bounded by `timeout` (`None` uses the configured
    /// default). Returns `Ok(None)` on timeout, on disconnect and once
    /// the queue is disposed. A malformed packet is a hard error and
    /// leaves the VM disconnected.
    pub async fn remove(&self, timeout: Option<Duration>) -> CrossfireResult<Option<EventSet>> {
        while !self.vm.is_queue_disposed() {
            let packet = match self.vm.receive_event(timeout).await {
                Ok(packet) => packet,
                Err(CrossfireError::Timeout) => {
                    debug!("QUEUE: timed out waiting for event");
                    return Ok(None);
                }
                Err(e) if e.is_disconnect() => {
                    info!("QUEUE: connection closed");
                    self.vm.disconnect_vm();
                    return Ok(None);
                }
                Err(e) => {
                    error!("QUEUE: failed to read event: {}", e);
                    self.vm.disconnect_vm();
                    return Err(e);
                }
            };

            let set = self.dispatch(packet).await;
            if set.is_empty() {
                self.vm.resume_target(set.thread()).await;
                continue;
            }
            return Ok(Some(set));
        }
        Ok(None)
    }

    /// Stop `remove` from looping. A receive already in progress
    /// finishes first.
    pub fn dispose(&self) {
        self.vm.dispose_queue();
    }

    pub fn is_disposed(&self) -> bool {
        self.vm.is_queue_disposed()
    }

    async fn dispatch(&self, packet: EventPacket) -> EventSet {
        let vm = &self.vm;
        let requests = vm.event_request_manager();
        let context_id = packet.context_id.as_deref();
        let mut set = EventSet::new();

        match RawEventKind::classify(&packet.event) {
            RawEventKind::Closed => {
                for request in requests.requests(EventRequestKind::VmDeath) {
                    set.push(Event::VmDeath { request });
                }
                vm.terminate();
            }
            RawEventKind::Break => {
                let thread = match context_id {
                    Some(id) => vm.find_thread(id).await,
                    None => None,
                };
                if let Some(thread) = thread {
                    thread.mark_suspended(true);
                    let location = match packet.body.get(attributes::LOCATION) {
                        Some(Value::Object(location)) => Some(BreakpointLocation::from_json(location)),
                        _ => None,
                    };
                    for request in requests.requests(EventRequestKind::Breakpoint) {
                        set.push(Event::Breakpoint {
                            request,
                            thread: thread.clone(),
                            location: location.clone(),
                        });
                    }
                    set.set_thread(thread);
                }
            }
            RawEventKind::Script => {
                let Some(id) = context_id else {
                    warn!("QUEUE: onScript without a context");
                    return set;
                };
                if let Some(thread) = vm.find_thread(id).await {
                    if let Some(script) = vm.add_script(id, &packet.body).await {
                        for request in requests.requests(EventRequestKind::ScriptLoad) {
                            set.push(Event::ScriptLoad {
                                request,
                                thread: thread.clone(),
                                script: script.clone(),
                            });
                        }
                    }
                    set.set_thread(thread);
                }
            }
            RawEventKind::ContextCreated => {
                let Some(id) = context_id else {
                    warn!("QUEUE: onContextCreated without a context");
                    return set;
                };
                let href = packet
                    .body
                    .get(attributes::HREF)
                    .or_else(|| packet.body.get(attributes::URL))
                    .and_then(Value::as_str);
                if let Some(thread) = vm.add_thread(id, href).await {
                    for request in requests.requests(EventRequestKind::ThreadEnter) {
                        set.push(Event::ThreadEnter {
                            request,
                            thread: thread.clone(),
                        });
                    }
                }
            }
            RawEventKind::ContextDestroyed => {
                let Some(id) = context_id else {
                    warn!("QUEUE: onContextDestroyed without a context");
                    return set;
                };
                let thread = vm.find_thread(id).await;
                vm.remove_thread(id);
                vm.remove_scripts_for_context(id);
                if let Some(thread) = thread {
                    for request in requests.requests(EventRequestKind::ThreadExit) {
                        set.push(Event::ThreadExit {
                            request,
                            thread: thread.clone(),
                        });
                    }
                }
            }
            RawEventKind::Resume => {
                if let Some(id) = context_id {
                    if let Some(thread) = vm.find_thread(id).await {
                        thread.mark_suspended(false);
                        set.set_thread(thread);
                    }
                }
            }
            RawEventKind::ToggleBreakpoint => vm.toggle_breakpoint(&packet.body),
            RawEventKind::Console(level) => {
                let message = packet.body.get(attributes::VALUE).cloned().unwrap_or(Value::Null);
                match level {
                    ConsoleLevel::Error => debug!(target: "crossfire::console", "error: {}", message),
                    ConsoleLevel::Warn => debug!(target: "crossfire::console", "warn: {}", message),
                    _ => debug!(target: "crossfire::console", "{:?}: {}", level, message),
                }
            }
            RawEventKind::InspectNode => debug!("QUEUE: [event - {}]", packet.event),
            RawEventKind::Unrecognized(name) => debug!("QUEUE: [unknown event - {}]", name),
        }

        set
    }
}
