// Crossfire protocol definitions and packet handling
//
// Every packet is a JSON object carrying a "type" discriminator
// ("request", "response" or "event") and a sender-assigned "seq".

use crate::commands::attributes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub type CrossfireResult<T> = Result<T, CrossfireError>;

#[derive(Debug, Error)]
pub enum CrossfireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Did not get correct Crossfire handshake")]
    InvalidHandshake,

    #[error("Timed out waiting for packet")]
    Timeout,

    #[error("Connection closed")]
    Disconnected,
}

impl CrossfireError {
    /// Disconnects are terminal; everything else leaves the session usable
    pub fn is_disconnect(&self) -> bool {
        matches!(self, CrossfireError::Disconnected)
    }
}

// Crossfire handshake, sent by the client and echoed by the server
pub const HANDSHAKE: &[u8] = b"CrossfireHandshake\r\n";

// Frame layout:
// <label>:<decimal byte length>\r\n<payload>
// The label is ignored on read.
pub const FRAME_LABEL: &str = "Content-Length";

pub const REQUEST: &str = "request";
pub const RESPONSE: &str = "response";
pub const EVENT: &str = "event";

/// A command sent to the remote runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPacket {
    #[serde(default)]
    pub seq: u64,
    pub command: String,
    #[serde(
        rename = "contextId",
        alias = "context_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub context_id: Option<String>,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// The reply to a request, matched by `request_seq`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePacket {
    #[serde(default)]
    pub seq: u64,
    pub request_seq: u64,
    #[serde(default)]
    pub command: String,
    #[serde(
        rename = "contextId",
        alias = "context_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub context_id: Option<String>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub body: Map<String, Value>,
}

/// An unsolicited notification from the remote runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPacket {
    #[serde(default)]
    pub seq: u64,
    pub event: String,
    #[serde(
        rename = "contextId",
        alias = "context_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub context_id: Option<String>,
    #[serde(default)]
    pub body: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Request(RequestPacket),
    Response(ResponsePacket),
    Event(EventPacket),
}

impl RequestPacket {
    pub fn new(command: &str, context_id: Option<&str>) -> Self {
        Self {
            seq: 0,
            command: command.to_string(),
            context_id: context_id.map(str::to_string),
            arguments: Map::new(),
        }
    }

    /// Builder-style argument setter
    pub fn with_argument(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set_argument(key, value);
        self
    }

    pub fn set_argument(&mut self, key: &str, value: impl Into<Value>) {
        self.arguments.insert(key.to_string(), value.into());
    }
}

impl ResponsePacket {
    /// Sentinel returned when no response arrived in time
    pub fn failed() -> Self {
        Self {
            seq: 0,
            request_seq: 0,
            command: String::new(),
            context_id: None,
            success: false,
            running: false,
            body: Map::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }
}

impl EventPacket {
    pub fn new(event: &str, context_id: Option<&str>) -> Self {
        Self {
            seq: 0,
            event: event.to_string(),
            context_id: context_id.map(str::to_string),
            body: Map::new(),
        }
    }
}

impl Packet {
    pub fn seq(&self) -> u64 {
        match self {
            Packet::Request(p) => p.seq,
            Packet::Response(p) => p.seq,
            Packet::Event(p) => p.seq,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Packet::Request(_) => REQUEST,
            Packet::Response(_) => RESPONSE,
            Packet::Event(_) => EVENT,
        }
    }

    /// Serialize to the JSON payload carried inside a frame
    pub fn to_json(&self) -> CrossfireResult<Value> {
        let mut value = match self {
            Packet::Request(p) => serde_json::to_value(p)?,
            Packet::Response(p) => serde_json::to_value(p)?,
            Packet::Event(p) => serde_json::to_value(p)?,
        };
        if let Value::Object(map) = &mut value {
            map.insert(attributes::TYPE.to_string(), Value::from(self.type_name()));
        }
        Ok(value)
    }

    /// Build the concrete packet variant selected by the payload's "type"
    pub fn from_json(value: Value) -> CrossfireResult<Self> {
        let kind = value
            .get(attributes::TYPE)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default();

        match kind.as_str() {
            EVENT => Ok(Packet::Event(serde_json::from_value(value)?)),
            REQUEST => Ok(Packet::Request(serde_json::from_value(value)?)),
            RESPONSE => Ok(Packet::Response(serde_json::from_value(value)?)),
            _ => Err(CrossfireError::Protocol(format!(
                "Unknown packet type: {}",
                kind
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_json_shape() {
        let mut request = RequestPacket::new("version", None).with_argument("includeSource", false);
        request.seq = 7;

        let value = Packet::Request(request).to_json().unwrap();
        assert_eq!(value["type"], "request");
        assert_eq!(value["seq"], 7);
        assert_eq!(value["command"], "version");
        assert_eq!(value["arguments"]["includeSource"], false);
        assert!(value.get("contextId").is_none());
    }

    #[test]
    fn test_response_from_json() {
        let packet = Packet::from_json(json!({
            "type": "response",
            "seq": 4,
            "request_seq": 1,
            "command": "version",
            "success": true,
            "body": { "version": "1.0" }
        }))
        .unwrap();

        match packet {
            Packet::Response(response) => {
                assert_eq!(response.request_seq, 1);
                assert!(response.is_success());
                assert_eq!(response.body()["version"], "1.0");
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_event_accepts_legacy_context_key() {
        let packet = Packet::from_json(json!({
            "type": "event",
            "seq": 9,
            "event": "onContextCreated",
            "context_id": "xf0.1::1"
        }))
        .unwrap();

        match packet {
            Packet::Event(event) => {
                assert_eq!(event.context_id.as_deref(), Some("xf0.1::1"));
                assert!(event.body.is_empty());
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_protocol_error() {
        let err = Packet::from_json(json!({ "type": "notification", "seq": 1 })).unwrap_err();
        assert!(matches!(err, CrossfireError::Protocol(msg) if msg.contains("notification")));

        let err = Packet::from_json(json!({ "seq": 1 })).unwrap_err();
        assert!(matches!(err, CrossfireError::Protocol(_)));
    }

    #[test]
    fn test_failed_sentinel() {
        let failed = ResponsePacket::failed();
        assert!(!failed.is_success());
        assert!(failed.body().is_empty());
    }
}
