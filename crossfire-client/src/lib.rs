// Crossfire client library for remote JavaScript debugging
//
// Implements the client side of the Crossfire protocol:
// - Handshake and framed JSON transport
// - Request/response correlation alongside the event stream
// - Lazily populated mirrors of threads, scripts and breakpoints
// - Event queue with standing registrations
// - Stack frame, variable and value mirrors

pub mod breakpoint;
pub mod commands;
pub mod config;
pub mod connection;
pub mod eventloop;
pub mod eventrequest;
pub mod events;
pub mod framing;
pub mod protocol;
pub mod queue;
pub mod script;
pub mod stackframe;
pub mod thread;
pub mod value;
pub mod vm;

#[cfg(test)]
mod testing;

pub use breakpoint::{BreakpointLocation, BreakpointMirror, BreakpointNotifier};
pub use config::ClientConfig;
pub use connection::CrossfireConnection;
pub use eventrequest::{EventRequest, EventRequestKind, EventRequestManager};
pub use events::{Event, EventSet};
pub use protocol::{CrossfireError, CrossfireResult};
pub use queue::EventQueue;
pub use script::ScriptMirror;
pub use stackframe::{Location, StackFrameMirror};
pub use thread::ThreadMirror;
pub use value::{ObjectRef, ValueMirror, VariableMirror};
pub use vm::VirtualMachine;
