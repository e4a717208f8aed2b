// Crossfire connection management
//
// Handles the TCP connection, the handshake, and event loop startup.
// Once connected the session multiplexes one stream into a
// request/response path and an event path.

use crate::config::ClientConfig;
use crate::eventloop::{spawn_event_loop, EventLoopHandle, Outgoing};
use crate::protocol::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Longest reply read while looking for the handshake line end
const MAX_HANDSHAKE_LEN: usize = HANDSHAKE.len() + 64;

/// Produced by a successful handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeAck;

#[derive(Debug)]
pub struct CrossfireConnection {
    event_loop: EventLoopHandle,
    next_seq: Arc<AtomicU64>,
    config: ClientConfig,
}

impl CrossfireConnection {
    /// Connect to a Crossfire server
    pub async fn connect(config: &ClientConfig) -> CrossfireResult<Self> {
        info!("Connecting to Crossfire at {}:{}", config.host, config.port);

        let stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
        stream.set_nodelay(true).ok();

        Self::from_stream(stream, config.clone()).await
    }

    /// Run the handshake over an already-open stream and start the event loop
    pub async fn from_stream<S>(stream: S, config: ClientConfig) -> CrossfireResult<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        write_handshake(&mut write_half, config.trace_packets).await?;
        wait_for_ready_read(&mut reader, config.ready_wait(), config.ready_poll()).await;
        read_handshake(&mut reader, config.trace_packets).await?;

        // The buffered reader keeps anything that arrived behind the handshake
        let event_loop = spawn_event_loop(reader, write_half, config.trace_packets);

        Ok(Self {
            event_loop,
            next_seq: Arc::new(AtomicU64::new(1)),
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Generate next request sequence number
    pub fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Assign a sequence number and write the request without waiting
    pub async fn send(&self, mut request: RequestPacket) -> CrossfireResult<u64> {
        request.seq = self.next_seq();
        let seq = request.seq;
        debug!("Sending request seq={} command={}", seq, request.command);

        self.event_loop
            .submit(Outgoing {
                packet: request,
                reply_tx: None,
            })
            .await?;
        Ok(seq)
    }

    /// Send a request and wait for the response with the matching request_seq.
    ///
    /// A timeout is not an error: it yields the failed sentinel response.
    /// Only a lost connection (or a protocol fault on the read side) is
    /// reported through `Err`.
    pub async fn send_request(&self, mut request: RequestPacket) -> CrossfireResult<ResponsePacket> {
        request.seq = self.next_seq();
        let seq = request.seq;
        let command = request.command.clone();
        debug!("Sending request seq={} command={}", seq, command);

        let (reply_tx, reply_rx) = oneshot::channel();
        self.event_loop
            .submit(Outgoing {
                packet: request,
                reply_tx: Some(reply_tx),
            })
            .await?;

        match self.receive_response(seq, reply_rx).await {
            Err(CrossfireError::Timeout) => {
                warn!("Timed out waiting for response to {} (seq={})", command, seq);
                Ok(ResponsePacket::failed())
            }
            other => other,
        }
    }

    async fn receive_response(
        &self,
        seq: u64,
        reply_rx: oneshot::Receiver<CrossfireResult<ResponsePacket>>,
    ) -> CrossfireResult<ResponsePacket> {
        match tokio::time::timeout(self.config.request_timeout(), reply_rx).await {
            Err(_) => Err(CrossfireError::Timeout),
            Ok(Err(_)) => {
                debug!("Reply channel for seq={} closed", seq);
                Err(CrossfireError::Disconnected)
            }
            Ok(Ok(result)) => result,
        }
    }

    /// Wait for the next event. `None` uses the configured default bound.
    pub async fn receive_event(&self, timeout: Option<Duration>) -> CrossfireResult<EventPacket> {
        let timeout = timeout.unwrap_or_else(|| self.config.event_timeout());
        self.event_loop.recv_event(timeout).await
    }

    pub fn is_open(&self) -> bool {
        self.event_loop.is_open()
    }

    /// Requests still waiting on the event loop for a reply
    pub fn pending_requests(&self) -> usize {
        self.event_loop.pending_requests()
    }

    /// Close the session. Only the first call releases the stream.
    pub fn dispose(&self) -> bool {
        let closed = self.event_loop.shutdown();
        if closed {
            info!("Crossfire session closed");
        }
        closed
    }
}

/// Write the handshake string
async fn write_handshake<W>(writer: &mut W, trace_packets: bool) -> CrossfireResult<()>
where
    W: AsyncWrite + Unpin,
{
    if trace_packets {
        debug!("WRITE HANDSHAKE: {:?}", String::from_utf8_lossy(HANDSHAKE));
    }
    writer.write_all(HANDSHAKE).await?;
    writer.flush().await?;
    Ok(())
}

/// Poll until the server has sent something back, giving up quietly
/// after `wait`
async fn wait_for_ready_read<R>(reader: &mut BufReader<R>, wait: Duration, poll: Duration)
where
    R: AsyncRead + Unpin,
{
    let deadline = Instant::now() + wait;
    loop {
        match tokio::time::timeout(poll, reader.fill_buf()).await {
            Ok(Ok(_)) => return,
            Ok(Err(e)) => {
                debug!("HANDSHAKE: Error while waiting for ready read: {}", e);
                return;
            }
            Err(_) if Instant::now() >= deadline => {
                debug!("HANDSHAKE: Timed out waiting for ready read from handshake");
                return;
            }
            Err(_) => {}
        }
    }
}

/// Read the server's handshake up to and including the first CR LF
/// and require a byte-exact match
async fn read_handshake<R>(reader: &mut BufReader<R>, trace_packets: bool) -> CrossfireResult<HandshakeAck>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::with_capacity(HANDSHAKE.len());
    let mut saw_cr = false;

    loop {
        let c = match reader.read_u8().await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        buffer.push(c);
        if saw_cr && c == b'\n' {
            break;
        }
        if buffer.len() >= MAX_HANDSHAKE_LEN {
            debug!("HANDSHAKE: no line end within {} bytes", MAX_HANDSHAKE_LEN);
            break;
        }
        saw_cr = c == b'\r';
    }

    if buffer == HANDSHAKE {
        if trace_packets {
            debug!("ACK HANDSHAKE: {:?}", String::from_utf8_lossy(&buffer));
        }
        info!("Crossfire handshake successful");
        return Ok(HandshakeAck);
    }

    // Drain whatever is already buffered so it shows up in the log
    let extra = reader.buffer().to_vec();
    if !extra.is_empty() {
        debug!(
            "Reading extra post-amble from socket: {:?}",
            String::from_utf8_lossy(&extra)
        );
        std::pin::Pin::new(&mut *reader).consume(extra.len());
    }

    warn!("Invalid handshake response: {:?}", String::from_utf8_lossy(&buffer));
    Err(CrossfireError::InvalidHandshake)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{connect_pair, test_config, MockServer};
    use serde_json::json;

    #[tokio::test]
    async fn test_handshake_exact_match() {
        let (connection, _server) = connect_pair().await;
        assert!(connection.is_open());
    }

    #[tokio::test]
    async fn test_handshake_rejects_whitespace_variation() {
        let (client, server) = tokio::io::duplex(1024);
        let server = tokio::spawn(MockServer::reply_handshake(server, b"CrossfireHandshake \r\n".to_vec()));

        let err = CrossfireConnection::from_stream(client, test_config())
            .await
            .unwrap_err();
        assert!(matches!(err, CrossfireError::InvalidHandshake));
        drop(server);
    }

    #[tokio::test]
    async fn test_handshake_rejects_missing_crlf() {
        let (client, server) = tokio::io::duplex(1024);
        let server = tokio::spawn(MockServer::reply_handshake(server, b"CrossfireHandshake\n".to_vec()));

        let err = CrossfireConnection::from_stream(client, test_config())
            .await
            .unwrap_err();
        assert!(matches!(err, CrossfireError::InvalidHandshake));
        drop(server);
    }

    #[tokio::test]
    async fn test_handshake_without_line_end_is_bounded() {
        let (client, mut server) = tokio::io::duplex(4096);
        let _server = tokio::spawn(async move {
            let mut handshake = vec![0u8; HANDSHAKE.len()];
            server.read_exact(&mut handshake).await.unwrap();
            server.write_all(&[b'x'; 512]).await.unwrap();
            server
        });

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            CrossfireConnection::from_stream(client, test_config()),
        )
        .await
        .expect("handshake read should give up");
        assert!(matches!(result, Err(CrossfireError::InvalidHandshake)));
    }

    #[tokio::test]
    async fn test_late_handshake_after_ready_wait() {
        let config = ClientConfig {
            ready_wait_ms: 50,
            ..test_config()
        };
        let (client, mut server) = tokio::io::duplex(1024);
        let _server = tokio::spawn(async move {
            let mut handshake = vec![0u8; HANDSHAKE.len()];
            server.read_exact(&mut handshake).await.unwrap();
            tokio::time::sleep(Duration::from_millis(150)).await;
            server.write_all(HANDSHAKE).await.unwrap();
            server
        });

        let connection = CrossfireConnection::from_stream(client, config)
            .await
            .unwrap();
        assert!(connection.is_open());
    }

    #[tokio::test]
    async fn test_packet_behind_handshake_is_not_lost() {
        let (client, server) = tokio::io::duplex(4096);
        let mut reply = HANDSHAKE.to_vec();
        let payload = br#"{"type":"event","seq":1,"event":"onResume"}"#;
        reply.extend_from_slice(format!("Content-Length:{}\r\n", payload.len()).as_bytes());
        reply.extend_from_slice(payload);
        let _server = tokio::spawn(MockServer::reply_handshake(server, reply));

        let connection = CrossfireConnection::from_stream(client, test_config())
            .await
            .unwrap();
        let event = connection.receive_event(None).await.unwrap();
        assert_eq!(event.event, "onResume");
    }

    #[tokio::test]
    async fn test_send_assigns_increasing_sequence() {
        let (connection, mut server) = connect_pair().await;

        let first = connection.send(RequestPacket::new("version", None)).await.unwrap();
        let second = connection.send(RequestPacket::new("listcontexts", None)).await.unwrap();
        assert!(second > first);

        assert_eq!(server.read_request().await.seq, first);
        assert_eq!(server.read_request().await.seq, second);
    }

    #[tokio::test]
    async fn test_responses_routed_by_request_seq() {
        let (connection, mut server) = connect_pair().await;
        let connection = Arc::new(connection);

        let c1 = connection.clone();
        let first = tokio::spawn(async move {
            c1.send_request(RequestPacket::new("version", None)).await
        });
        let r1 = server.read_request().await;

        let c2 = connection.clone();
        let second = tokio::spawn(async move {
            c2.send_request(RequestPacket::new("listcontexts", None)).await
        });
        let r2 = server.read_request().await;

        // Answer in reverse order, with an event in between
        server.respond(&r2, true, json!({ "contexts": [] })).await;
        server.send_event("onResume", None, json!({})).await;
        server.respond(&r1, true, json!({ "version": "0.3" })).await;

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first.request_seq, r1.seq);
        assert_eq!(first.body["version"], "0.3");
        assert_eq!(second.request_seq, r2.seq);
        assert!(second.body.contains_key("contexts"));

        // The event was not consumed by either waiter
        let event = connection.receive_event(None).await.unwrap();
        assert_eq!(event.event, "onResume");
    }

    #[tokio::test]
    async fn test_request_timeout_yields_failed_sentinel() {
        let (connection, mut server) = connect_pair().await;

        let response = connection
            .send_request(RequestPacket::new("version", None))
            .await
            .unwrap();
        assert!(!response.is_success());
        assert!(response.body.is_empty());

        // The request still went out
        assert_eq!(server.read_request().await.command, "version");
    }

    #[tokio::test]
    async fn test_event_timeout_distinct_from_disconnect() {
        let (connection, server) = connect_pair().await;

        let err = connection
            .receive_event(Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, CrossfireError::Timeout));

        drop(server);
        let err = connection.receive_event(None).await.unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_pending_request_sees_disconnect() {
        let (connection, mut server) = connect_pair().await;
        let connection = Arc::new(connection);

        let c = connection.clone();
        let pending = tokio::spawn(async move {
            c.send_request(RequestPacket::new("version", None)).await
        });
        server.read_request().await;
        drop(server);

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_timed_out_requests_release_reply_slots() {
        let (connection, mut server) = connect_pair().await;

        for _ in 0..3 {
            let response = connection
                .send_request(RequestPacket::new("version", None))
                .await
                .unwrap();
            assert!(!response.success);
            server.read_request().await;
        }

        // Only the most recent unanswered request still holds a slot
        assert_eq!(connection.pending_requests(), 1);
    }

    #[tokio::test]
    async fn test_protocol_fault_is_surfaced() {
        let (connection, mut server) = connect_pair().await;

        server.write_raw(b"Content-Length:2\rX{}").await;
        let err = connection.receive_event(None).await.unwrap_err();
        assert!(matches!(err, CrossfireError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let (connection, _server) = connect_pair().await;

        assert!(connection.dispose());
        assert!(!connection.dispose());
        assert!(!connection.is_open());

        let err = connection
            .send(RequestPacket::new("version", None))
            .await
            .unwrap_err();
        assert!(err.is_disconnect());
    }
}
