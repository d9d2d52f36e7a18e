//! TCP link adapter for the locator kit
//!
//! Owns the client connection to the gateway and keeps the half-duplex
//! discipline honest: one request on the wire, a watchdog per request, a
//! bounded number of verbatim resends, and reconnection with bounded
//! retry when the gateway drops us.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{LinkEvent, LinkHandle, TransportError};
use crate::proto::{command_id, frame_len};

const MAX_RECONNECT_ATTEMPTS: u32 = 3;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(1500);
const MAX_RESENDS: u32 = 3;
const EVENT_CAPACITY: usize = 64;
// Deadline used while no request is pending; effectively "never".
const IDLE_PARK: Duration = Duration::from_secs(86_400);

/// Connection tunables for one locator link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Gateway IP address or hostname.
    pub host: String,
    /// Gateway TCP port the device is mapped to.
    pub port: u16,
    /// Window to wait for a response after each non-restart send.
    pub response_timeout: Duration,
    /// Reconnect attempts per outage before backing off a full delay.
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl LinkConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            response_timeout: RESPONSE_TIMEOUT,
            reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }
}

enum LinkCommand {
    Send { frame: Bytes, is_restart: bool },
    ResendLast,
}

/// Client-side link to the locator kit.
pub struct LocatorLink {
    cmd_tx: mpsc::UnboundedSender<LinkCommand>,
    connected: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<TransportError>>>,
}

impl LocatorLink {
    /// Spawn the connection task. Events arrive on the returned channel.
    pub fn spawn(config: LinkConfig) -> (Self, mpsc::Receiver<LinkEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let last_error = Arc::new(Mutex::new(None));

        let task = LinkTask {
            config,
            cmd_rx,
            event_tx,
            connected: connected.clone(),
            last_error: last_error.clone(),
        };
        tokio::spawn(task.run());

        (
            Self {
                cmd_tx,
                connected,
                last_error,
            },
            event_rx,
        )
    }
}

impl LinkHandle for LocatorLink {
    fn send(&self, frame: Bytes, is_restart: bool) {
        let _ = self.cmd_tx.send(LinkCommand::Send { frame, is_restart });
    }

    fn resend_last(&self) {
        let _ = self.cmd_tx.send(LinkCommand::ResendLast);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn last_error(&self) -> String {
        self.last_error
            .lock()
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_default()
    }
}

enum Exit {
    HandleDropped,
    Disconnected,
}

struct LinkTask {
    config: LinkConfig,
    cmd_rx: mpsc::UnboundedReceiver<LinkCommand>,
    event_tx: mpsc::Sender<LinkEvent>,
    connected: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<TransportError>>>,
}

impl LinkTask {
    async fn run(mut self) {
        loop {
            let stream = match self.connect_with_retry().await {
                Some(stream) => stream,
                None => {
                    // Frames queued while the link is down are stale by
                    // the time it comes back; drop them.
                    while let Ok(_cmd) = self.cmd_rx.try_recv() {
                        warn!("link down, dropping queued frame");
                    }
                    tokio::time::sleep(self.config.reconnect_delay).await;
                    continue;
                }
            };

            self.connected.store(true, Ordering::SeqCst);
            info!(host = %self.config.host, port = self.config.port, "locator link up");
            if self.event_tx.send(LinkEvent::Ready).await.is_err() {
                return;
            }

            let exit = self.drive(stream).await;
            self.connected.store(false, Ordering::SeqCst);

            match exit {
                Exit::HandleDropped => return,
                Exit::Disconnected => {
                    warn!("locator link lost");
                    if self.event_tx.send(LinkEvent::QueueReset).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn connect_with_retry(&self) -> Option<TcpStream> {
        for attempt in 1..=self.config.reconnect_attempts {
            match TcpStream::connect((self.config.host.as_str(), self.config.port)).await {
                Ok(stream) => return Some(stream),
                Err(e) => {
                    warn!(attempt, max = self.config.reconnect_attempts, error = %e, "connect failed");
                    *self.last_error.lock() =
                        Some(TransportError::ConnectionFailed(e.to_string()));
                    if attempt < self.config.reconnect_attempts {
                        tokio::time::sleep(self.config.reconnect_delay).await;
                    }
                }
            }
        }
        None
    }

    /// The connected I/O loop: commands from the mediator, bytes from the
    /// device, and the response watchdog.
    async fn drive(&mut self, stream: TcpStream) -> Exit {
        let (mut reader, mut writer) = stream.into_split();
        let mut buf = BytesMut::with_capacity(256);
        let mut chunk = [0u8; 256];
        let mut last_sent: Option<Bytes> = None;
        let mut resends: u32 = 0;
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    None => return Exit::HandleDropped,
                    Some(LinkCommand::Send { frame, is_restart }) => {
                        debug!(frame = %hex::encode(&frame), is_restart, "sending frame");
                        if let Err(e) = writer.write_all(&frame).await {
                            *self.last_error.lock() =
                                Some(TransportError::SendFailed(e.to_string()));
                            return Exit::Disconnected;
                        }
                        last_sent = Some(frame);
                        resends = 0;
                        if is_restart {
                            // Fire and forget: the device reboots instead
                            // of answering.
                            deadline = None;
                            if self.event_tx.send(LinkEvent::Ready).await.is_err() {
                                return Exit::HandleDropped;
                            }
                        } else {
                            deadline = Some(Instant::now() + self.config.response_timeout);
                        }
                    }
                    Some(LinkCommand::ResendLast) => {
                        let Some(frame) = last_sent.clone() else { continue };
                        if resends >= MAX_RESENDS {
                            warn!(resends, "resend ceiling reached, giving up on this request");
                            deadline = None;
                            *self.last_error.lock() = Some(TransportError::Timeout);
                            if self.event_tx.send(LinkEvent::TimedOut).await.is_err() {
                                return Exit::HandleDropped;
                            }
                            continue;
                        }
                        resends += 1;
                        debug!(frame = %hex::encode(&frame), resends, "resending last frame");
                        if let Err(e) = writer.write_all(&frame).await {
                            *self.last_error.lock() =
                                Some(TransportError::SendFailed(e.to_string()));
                            return Exit::Disconnected;
                        }
                        deadline = Some(Instant::now() + self.config.response_timeout);
                    }
                },
                read = reader.read(&mut chunk) => match read {
                    Ok(0) => {
                        *self.last_error.lock() = Some(TransportError::ConnectionClosed);
                        return Exit::Disconnected;
                    }
                    Ok(n) => {
                        buf.extend_from_slice(&chunk[..n]);
                        while let Some(frame) = split_frame(&mut buf) {
                            deadline = None;
                            let event = if frame[0] == command_id::ZERO {
                                debug!("keepalive round-trip complete");
                                LinkEvent::Ready
                            } else {
                                debug!(frame = %hex::encode(&frame), "frame received");
                                LinkEvent::Frame(frame)
                            };
                            if self.event_tx.send(event).await.is_err() {
                                return Exit::HandleDropped;
                            }
                        }
                    }
                    Err(e) => {
                        *self.last_error.lock() =
                            Some(TransportError::ReceiveFailed(e.to_string()));
                        return Exit::Disconnected;
                    }
                },
                _ = tokio::time::sleep_until(
                    deadline.unwrap_or_else(|| Instant::now() + IDLE_PARK)
                ), if deadline.is_some() => {
                    warn!("response window elapsed");
                    deadline = None;
                    *self.last_error.lock() = Some(TransportError::Timeout);
                    if self.event_tx.send(LinkEvent::TimedOut).await.is_err() {
                        return Exit::HandleDropped;
                    }
                }
            }
        }
    }
}

/// Slice one complete frame off the front of the receive buffer.
///
/// Unknown lead bytes cannot be measured, so the whole buffered run is
/// handed up as-is; the decoder rejects it and the mediator recovers by
/// resending.
fn split_frame(buf: &mut BytesMut) -> Option<Bytes> {
    let id = *buf.first()?;
    match frame_len(id) {
        Some(len) if buf.len() >= len => Some(buf.split_to(len).freeze()),
        Some(_) => None,
        None => Some(buf.split_to(buf.len()).freeze()),
    }
}
