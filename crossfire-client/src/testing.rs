// In-process Crossfire server for tests
//
// Runs over a tokio duplex pipe; the test drives it step by step.

use crate::config::ClientConfig;
use crate::connection::CrossfireConnection;
use crate::framing::{read_packet, write_packet};
use crate::protocol::*;
use crate::vm::VirtualMachine;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

const READ_TIMEOUT: Duration = Duration::from_secs(2);

pub fn test_config() -> ClientConfig {
    ClientConfig {
        request_timeout_ms: 200,
        event_timeout_ms: 200,
        ready_wait_ms: 500,
        ready_poll_ms: 10,
        ..ClientConfig::default()
    }
}

pub struct MockServer {
    stream: DuplexStream,
    next_seq: u64,
}

impl MockServer {
    /// Read the client handshake and echo it back
    pub async fn accept(mut stream: DuplexStream) -> Self {
        let mut handshake = vec![0u8; HANDSHAKE.len()];
        stream.read_exact(&mut handshake).await.unwrap();
        assert_eq!(handshake, HANDSHAKE);
        stream.write_all(HANDSHAKE).await.unwrap();

        Self {
            stream,
            next_seq: 1000,
        }
    }

    /// Read the client handshake, answer with arbitrary bytes and hang up
    pub async fn reply_handshake(mut stream: DuplexStream, reply: Vec<u8>) {
        let mut handshake = vec![0u8; HANDSHAKE.len()];
        stream.read_exact(&mut handshake).await.unwrap();
        stream.write_all(&reply).await.unwrap();
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub async fn read_request(&mut self) -> RequestPacket {
        let packet = tokio::time::timeout(READ_TIMEOUT, read_packet(&mut self.stream))
            .await
            .expect("timed out waiting for a request")
            .unwrap();
        match packet {
            Packet::Request(request) => request,
            other => panic!("expected request, got {:?}", other),
        }
    }

    pub async fn expect_request(&mut self, command: &str) -> RequestPacket {
        let request = self.read_request().await;
        assert_eq!(request.command, command, "unexpected request {:?}", request);
        request
    }

    pub async fn respond(&mut self, request: &RequestPacket, success: bool, body: Value) {
        let body = match body {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let response = ResponsePacket {
            seq: self.next_seq(),
            request_seq: request.seq,
            command: request.command.clone(),
            context_id: request.context_id.clone(),
            success,
            running: true,
            body,
        };
        write_packet(&mut self.stream, &Packet::Response(response))
            .await
            .unwrap();
    }

    /// Expect a request and answer it successfully
    pub async fn serve(&mut self, command: &str, body: Value) -> RequestPacket {
        let request = self.expect_request(command).await;
        self.respond(&request, true, body).await;
        request
    }

    pub async fn send_event(&mut self, name: &str, context_id: Option<&str>, body: Value) {
        let mut event = EventPacket::new(name, context_id);
        event.seq = self.next_seq();
        if let Value::Object(map) = body {
            event.body = map;
        }
        write_packet(&mut self.stream, &Packet::Event(event))
            .await
            .unwrap();
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Assert the client sends nothing for `wait`
    pub async fn assert_quiet(&mut self, wait: Duration) {
        if let Ok(result) = tokio::time::timeout(wait, read_packet(&mut self.stream)).await {
            match result {
                Ok(packet) => panic!("unexpected packet {:?}", packet),
                Err(e) => assert!(e.is_disconnect(), "unexpected error {}", e),
            }
        }
    }
}

/// A connected session and the server end of it
pub async fn connect_pair() -> (CrossfireConnection, MockServer) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (connection, server) = tokio::join!(
        CrossfireConnection::from_stream(client, test_config()),
        MockServer::accept(server)
    );
    (connection.unwrap(), server)
}

/// A VM mirror over a fresh session, without the initial breakpoint sync
pub async fn attach_vm() -> (Arc<VirtualMachine>, MockServer) {
    let (connection, server) = connect_pair().await;
    (VirtualMachine::new(connection), server)
}

/// A VM mirror whose thread registry already holds the given contexts
pub async fn attach_vm_with_threads(ids: &[&str]) -> (Arc<VirtualMachine>, MockServer) {
    let (vm, mut server) = attach_vm().await;
    let contexts: Vec<Value> = ids
        .iter()
        .map(|id| serde_json::json!({ "contextId": id, "href": format!("http://localhost/{}", id) }))
        .collect();

    let (threads, _) = tokio::join!(
        vm.all_threads(),
        server.serve("listcontexts", serde_json::json!({ "contexts": contexts }))
    );
    assert_eq!(threads.len(), ids.len());
    (vm, server)
}
