// Client configuration
//
// Passed explicitly into connections and mirrors; nothing here is global.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Bound on waiting for the response to a single request
    pub request_timeout_ms: u64,
    /// Bound used by event receives that do not supply their own
    pub event_timeout_ms: u64,
    /// How long to wait for the server to answer the handshake
    pub ready_wait_ms: u64,
    pub ready_poll_ms: u64,
    /// Log every packet read from or written to the wire
    pub trace_packets: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            request_timeout_ms: 3000,
            event_timeout_ms: 3000,
            ready_wait_ms: 1000,
            ready_poll_ms: 100,
            trace_packets: false,
        }
    }
}

impl ClientConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn event_timeout(&self) -> Duration {
        Duration::from_millis(self.event_timeout_ms)
    }

    pub fn ready_wait(&self) -> Duration {
        Duration::from_millis(self.ready_wait_ms)
    }

    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms.max(1))
    }
}
