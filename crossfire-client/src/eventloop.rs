// Crossfire Event Loop
//
// One task owns the write half and the table of pending requests; a
// second task owns the read half and forwards every complete packet.
// Responses are routed by request_seq, events go to the event channel.

use crate::framing::{encode_packet, read_packet};
use crate::protocol::{
    CrossfireError, CrossfireResult, EventPacket, Packet, RequestPacket, ResponsePacket,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

pub type ReplySender = oneshot::Sender<CrossfireResult<ResponsePacket>>;

/// A request handed to the loop for writing
pub struct Outgoing {
    pub packet: RequestPacket,
    /// Present when the caller waits for the matching response
    pub reply_tx: Option<ReplySender>,
}

/// Handle to the event loop for sending requests and receiving events
#[derive(Clone, Debug)]
pub struct EventLoopHandle {
    command_tx: mpsc::Sender<Outgoing>,
    event_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<CrossfireResult<EventPacket>>>>,
    shutdown_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    open: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
}

impl EventLoopHandle {
    /// Queue a request for writing
    pub async fn submit(&self, outgoing: Outgoing) -> CrossfireResult<()> {
        if !self.is_open() {
            return Err(CrossfireError::Disconnected);
        }
        self.command_tx
            .send(outgoing)
            .await
            .map_err(|_| CrossfireError::Disconnected)
    }

    /// Wait for the next event, up to `timeout`
    pub async fn recv_event(&self, timeout: Duration) -> CrossfireResult<EventPacket> {
        let mut rx = self.event_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Err(_) => Err(CrossfireError::Timeout),
            Ok(None) => Err(CrossfireError::Disconnected),
            Ok(Some(event)) => event,
        }
    }

    /// Stop the loop and release the stream. Returns true only for the
    /// call that actually performed the shutdown.
    pub fn shutdown(&self) -> bool {
        let sender = match self.shutdown_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        self.open.store(false, Ordering::SeqCst);
        match sender {
            Some(tx) => {
                tx.send(()).ok();
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Requests written and still holding a reply slot
    pub fn pending_requests(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Start the event loop tasks over a split stream
pub fn spawn_event_loop<R, W>(reader: R, writer: W, trace_packets: bool) -> EventLoopHandle
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(32);
    // Use larger buffer for events to avoid loss under load
    let (event_tx, event_rx) = mpsc::channel(256);
    let (inbound_tx, inbound_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let open = Arc::new(AtomicBool::new(true));
    let pending = Arc::new(AtomicUsize::new(0));

    let reader_task = tokio::spawn(reader_task(reader, inbound_tx, trace_packets));
    tokio::spawn(event_loop_task(
        writer,
        reader_task,
        command_rx,
        inbound_rx,
        event_tx,
        shutdown_rx,
        open.clone(),
        pending.clone(),
        trace_packets,
    ));

    EventLoopHandle {
        command_tx,
        event_rx: Arc::new(tokio::sync::Mutex::new(event_rx)),
        shutdown_tx: Arc::new(Mutex::new(Some(shutdown_tx))),
        open,
        pending,
    }
}

/// Sole reader of the stream; stops after the first failed read
async fn reader_task<R>(
    mut reader: R,
    inbound_tx: mpsc::Sender<CrossfireResult<Packet>>,
    trace_packets: bool,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let result = read_packet(&mut reader).await;
        let failed = result.is_err();

        if trace_packets {
            if let Ok(packet) = &result {
                debug!("READ PACKET: {:?}", packet);
            }
        }

        if inbound_tx.send(result).await.is_err() || failed {
            break;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn event_loop_task<W>(
    mut writer: W,
    reader_task: tokio::task::JoinHandle<()>,
    mut command_rx: mpsc::Receiver<Outgoing>,
    mut inbound_rx: mpsc::Receiver<CrossfireResult<Packet>>,
    event_tx: mpsc::Sender<CrossfireResult<EventPacket>>,
    mut shutdown_rx: oneshot::Receiver<()>,
    open: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    trace_packets: bool,
) where
    W: AsyncWrite + Unpin,
{
    info!("Event loop started");

    let mut pending_replies: HashMap<u64, ReplySender> = HashMap::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                info!("Session disposed");
                break;
            }

            // Handle outgoing requests
            Some(cmd) = command_rx.recv() => {
                let seq = cmd.packet.seq;
                let packet = Packet::Request(cmd.packet);

                let frame = match encode_packet(&packet) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("Failed to encode request seq={}: {}", seq, e);
                        if let Some(tx) = cmd.reply_tx {
                            tx.send(Err(e)).ok();
                        }
                        continue;
                    }
                };

                // Waiters that timed out have dropped their receiver
                pending_replies.retain(|_, tx| !tx.is_closed());
                if let Some(tx) = cmd.reply_tx {
                    pending_replies.insert(seq, tx);
                }
                pending.store(pending_replies.len(), Ordering::SeqCst);

                if trace_packets {
                    debug!("WRITE PACKET: {}", String::from_utf8_lossy(&frame));
                } else {
                    debug!("Sending request seq={}", seq);
                }

                let written = match writer.write_all(&frame).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };

                if let Err(e) = written {
                    error!("Failed to write request: {}", e);
                    let err = crate::framing::eof_as_disconnect(e);
                    let disconnected = err.is_disconnect();
                    if let Some(tx) = pending_replies.remove(&seq) {
                        tx.send(Err(err)).ok();
                    }
                    pending.store(pending_replies.len(), Ordering::SeqCst);
                    if disconnected {
                        break;
                    }
                    continue;
                }
            }

            // Handle incoming packets
            inbound = inbound_rx.recv() => {
                match inbound {
                    Some(Ok(Packet::Response(response))) => {
                        debug!("Received response request_seq={}", response.request_seq);

                        if let Some(tx) = pending_replies.remove(&response.request_seq) {
                            pending.store(pending_replies.len(), Ordering::SeqCst);
                            tx.send(Ok(response)).ok();
                        } else {
                            warn!("Received response for unknown request seq={}", response.request_seq);
                        }
                    }
                    Some(Ok(Packet::Event(event))) => {
                        debug!("Received event {}", event.event);

                        match event_tx.try_send(Ok(event)) {
                            Ok(_) => {}
                            Err(mpsc::error::TrySendError::Full(event)) => {
                                error!("Event channel full! Dropping event {:?}. Consider consuming events faster.",
                                      event.map(|e| e.event).ok());
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                warn!("Event receiver dropped, future events will be discarded");
                            }
                        }
                    }
                    Some(Ok(Packet::Request(request))) => {
                        warn!("Ignoring request from remote side: {}", request.command);
                    }
                    Some(Err(e)) if e.is_disconnect() => {
                        info!("Remote side closed the connection");
                        break;
                    }
                    Some(Err(e)) => {
                        error!("Failed to read packet: {}", e);
                        let message = e.to_string();
                        for (_, tx) in pending_replies.drain() {
                            tx.send(Err(CrossfireError::Protocol(message.clone()))).ok();
                        }
                        event_tx.try_send(Err(CrossfireError::Protocol(message))).ok();
                        break;
                    }
                    None => break,
                }
            }

            else => break,
        }
    }

    open.store(false, Ordering::SeqCst);
    reader_task.abort();
    writer.shutdown().await.ok();

    // Dropping the pending senders wakes every waiter with a disconnect
    pending_replies.clear();
    pending.store(0, Ordering::SeqCst);
    info!("Event loop shutting down");
}
