//! adjustkit-meteo - weather-kit listener
//!
//! The weather kit dials in through the gateway and talks a fixed-frame
//! protocol: 11-byte frames, no delimiter beyond length. This side is a
//! TCP server that accepts a single connection, verified by the peer's
//! source port, and runs a single-shot no-answer watchdog around each
//! outbound request. No queue, no multi-frame session: the minimal
//! instance of the request/watchdog pattern.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Every frame the kit sends is exactly this long.
pub const METEO_FRAME_LEN: usize = 11;

const NO_ANSWER_WINDOW: Duration = Duration::from_secs(2);
const EVENT_CAPACITY: usize = 64;
// Deadline used while the watchdog is disarmed; effectively "never".
const IDLE_PARK: Duration = Duration::from_secs(86_400);

/// Listener tunables.
#[derive(Debug, Clone)]
pub struct MeteoConfig {
    /// Local port to listen on.
    pub listen_port: u16,
    /// Source port the kit is expected to dial in from.
    pub peer_port: u16,
    /// Single-shot watchdog armed on every outbound send.
    pub no_answer_window: Duration,
}

impl MeteoConfig {
    pub fn new(listen_port: u16, peer_port: u16) -> Self {
        Self {
            listen_port,
            peer_port,
            no_answer_window: NO_ANSWER_WINDOW,
        }
    }

    pub fn with_no_answer_window(mut self, window: Duration) -> Self {
        self.no_answer_window = window;
        self
    }
}

/// Events the listener raises toward its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum MeteoEvent {
    /// One complete 11-byte frame from the kit.
    Frame(Bytes),
    /// The kit did not answer a request within the watchdog window.
    NoAnswer,
}

/// Handle to the listener task.
pub struct MeteoServer {
    cmd_tx: mpsc::UnboundedSender<Bytes>,
    connected: Arc<AtomicBool>,
    local_port: u16,
}

impl MeteoServer {
    /// Bind the listener and spawn its task. Events arrive on the
    /// returned channel.
    pub async fn bind(config: MeteoConfig) -> io::Result<(Self, mpsc::Receiver<MeteoEvent>)> {
        let listener = TcpListener::bind(("0.0.0.0", config.listen_port)).await?;
        let local_port = listener.local_addr()?.port();
        info!(port = local_port, "weather-kit listener up");

        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        let task = MeteoTask {
            config,
            listener,
            cmd_rx,
            event_tx,
            connected: connected.clone(),
        };
        tokio::spawn(task.run());

        Ok((
            Self {
                cmd_tx,
                connected,
                local_port,
            },
            event_rx,
        ))
    }

    /// Queue one request frame for the kit. Arms the no-answer watchdog.
    pub fn send(&self, frame: Bytes) {
        let _ = self.cmd_tx.send(frame);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The port actually bound; differs from the configured one when the
    /// listener was asked for an ephemeral port.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }
}

struct MeteoTask {
    config: MeteoConfig,
    listener: TcpListener,
    cmd_rx: mpsc::UnboundedReceiver<Bytes>,
    event_tx: mpsc::Sender<MeteoEvent>,
    connected: Arc<AtomicBool>,
}

impl MeteoTask {
    async fn run(mut self) {
        loop {
            let (socket, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            if peer.port() != self.config.peer_port {
                warn!(%peer, expected = self.config.peer_port, "unexpected peer port, dropping");
                continue;
            }

            info!(%peer, "weather kit connected");
            self.connected.store(true, Ordering::SeqCst);
            let done = self.drive(socket).await;
            self.connected.store(false, Ordering::SeqCst);
            info!("weather kit disconnected");
            if done {
                return;
            }
        }
    }

    /// Connected loop. Returns true once the consumer is gone for good.
    async fn drive(&mut self, stream: TcpStream) -> bool {
        let (mut reader, mut writer) = stream.into_split();
        let mut buf = BytesMut::with_capacity(4 * METEO_FRAME_LEN);
        let mut chunk = [0u8; 64];
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    None => return true,
                    Some(frame) => {
                        debug!(frame = %hex::encode(&frame), "sending request");
                        if let Err(e) = writer.write_all(&frame).await {
                            warn!(error = %e, "send failed");
                            return false;
                        }
                        deadline = Some(Instant::now() + self.config.no_answer_window);
                    }
                },
                read = reader.read(&mut chunk) => match read {
                    Ok(0) => return false,
                    Ok(n) => {
                        // Any bytes at all count as an answer
                        deadline = None;
                        buf.extend_from_slice(&chunk[..n]);
                        while let Some(frame) = take_frame(&mut buf) {
                            debug!(frame = %hex::encode(&frame), "frame received");
                            if self.event_tx.send(MeteoEvent::Frame(frame)).await.is_err() {
                                return true;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "receive failed");
                        return false;
                    }
                },
                _ = tokio::time::sleep_until(
                    deadline.unwrap_or_else(|| Instant::now() + IDLE_PARK)
                ), if deadline.is_some() => {
                    warn!("weather kit did not answer");
                    deadline = None;
                    if self.event_tx.send(MeteoEvent::NoAnswer).await.is_err() {
                        return true;
                    }
                }
            }
        }
    }
}

/// Slice one complete frame off the front of the buffer, if enough bytes
/// have accumulated.
fn take_frame(buf: &mut BytesMut) -> Option<Bytes> {
    if buf.len() >= METEO_FRAME_LEN {
        Some(buf.split_to(METEO_FRAME_LEN).freeze())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_twenty_three_bytes_yield_two_frames() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x55; 23]);

        let first = take_frame(&mut buf).unwrap();
        let second = take_frame(&mut buf).unwrap();
        assert_eq!(first.len(), METEO_FRAME_LEN);
        assert_eq!(second.len(), METEO_FRAME_LEN);

        // One byte stays behind for the next read
        assert!(take_frame(&mut buf).is_none());
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_partial_frame_is_retained() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x01; 10]);
        assert!(take_frame(&mut buf).is_none());

        buf.extend_from_slice(&[0x02; 1]);
        let frame = take_frame(&mut buf).unwrap();
        assert_eq!(frame.len(), METEO_FRAME_LEN);
        assert_eq!(frame[10], 0x02);
        assert!(buf.is_empty());
    }
}
