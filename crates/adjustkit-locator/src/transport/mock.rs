//! Mock link adapter for testing
//!
//! Implements the same [`LinkHandle`] + event-channel surface as the TCP
//! adapter, with scripted responses: write commands are acked by echo,
//! read requests by canned telemetry frames, the keepalive by readiness.
//! Tests can flip the connection flag, corrupt a response, or inject raw
//! events to exercise the mediator's failure paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{LinkEvent, LinkHandle};
use crate::proto::{command_id, CommandEncoder};

const EVENT_CAPACITY: usize = 64;

pub struct MockLink {
    event_tx: mpsc::Sender<LinkEvent>,
    connected: AtomicBool,
    auto_respond: AtomicBool,
    garbage_next: AtomicBool,
    /// A request is on the wire and unanswered.
    in_flight: AtomicBool,
    /// A second frame was sent while one was still in flight.
    violated: AtomicBool,
    /// Every frame pushed through the handle, with its restart flag.
    sent: Mutex<Vec<(Bytes, bool)>>,
    /// Canned telemetry responses keyed by channel id.
    read_responses: Mutex<HashMap<u8, Bytes>>,
}

impl MockLink {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<LinkEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let link = Arc::new(Self {
            event_tx,
            connected: AtomicBool::new(true),
            auto_respond: AtomicBool::new(true),
            garbage_next: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            violated: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            read_responses: Mutex::new(Self::default_responses()),
        });
        (link, event_rx)
    }

    /// Canned device state: the telemetry a healthy device would report.
    fn default_responses() -> HashMap<u8, Bytes> {
        let enc = CommandEncoder::new(30_250_000.0, 40_000_000.0);
        HashMap::from([
            (1, enc.first_command(30_300_000.0)),
            (2, enc.second_command(30_300_000.0, 1000.0)),
            (3, enc.third_command(500.0, 68.0)),
            (4, enc.fourth_command(15.5, 20.0)),
            (5, enc.five_command(12.5)),
            (6, enc.six_command(2, 0.0)),
        ])
    }

    /// Replace the canned response for one telemetry channel.
    pub fn set_read_response(&self, channel: u8, frame: Bytes) {
        self.read_responses.lock().insert(channel, frame);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Stop answering; the test drives events by hand.
    pub fn set_auto_respond(&self, respond: bool) {
        self.auto_respond.store(respond, Ordering::SeqCst);
    }

    /// Corrupt the next response once, then answer normally again.
    pub fn fail_next_response(&self) {
        self.garbage_next.store(true, Ordering::SeqCst);
    }

    /// Inject a raw event, e.g. a timeout or a disconnect. Either way
    /// the pending request is resolved at link level.
    pub fn inject(&self, event: LinkEvent) {
        self.in_flight.store(false, Ordering::SeqCst);
        self.event_tx.try_send(event).expect("event channel full");
    }

    /// True if the half-duplex discipline was ever broken: a frame went
    /// out while another was still awaiting its response.
    pub fn one_in_flight_violated(&self) -> bool {
        self.violated.load(Ordering::SeqCst)
    }

    pub fn sent_frames(&self) -> Vec<(Bytes, bool)> {
        self.sent.lock().clone()
    }

    /// Command ids of everything sent, in order.
    pub fn sent_ids(&self) -> Vec<u8> {
        self.sent.lock().iter().map(|(frame, _)| frame[0]).collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    fn respond_to(&self, frame: &Bytes, is_restart: bool) {
        if !self.auto_respond.load(Ordering::SeqCst) {
            return;
        }
        if self.garbage_next.swap(false, Ordering::SeqCst) {
            self.inject(LinkEvent::Frame(Bytes::from_static(&[0xAA, 0xBB])));
            return;
        }
        if is_restart {
            self.inject(LinkEvent::Ready);
            return;
        }
        match frame[0] {
            command_id::ZERO => self.inject(LinkEvent::Ready),
            command_id::SEVEN => {
                let response = self.read_responses.lock().get(&frame[1]).cloned();
                if let Some(response) = response {
                    self.inject(LinkEvent::Frame(response));
                }
            }
            // Writes are acked by echoing the frame
            _ => self.inject(LinkEvent::Frame(frame.clone())),
        }
    }
}

impl LinkHandle for MockLink {
    fn send(&self, frame: Bytes, is_restart: bool) {
        if self.in_flight.swap(!is_restart, Ordering::SeqCst) {
            self.violated.store(true, Ordering::SeqCst);
        }
        self.sent.lock().push((frame.clone(), is_restart));
        self.respond_to(&frame, is_restart);
    }

    fn resend_last(&self) {
        let last = self.sent.lock().last().cloned();
        if let Some((frame, is_restart)) = last {
            self.sent.lock().push((frame.clone(), is_restart));
            self.respond_to(&frame, is_restart);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn last_error(&self) -> String {
        if self.is_connected() {
            String::new()
        } else {
            "mock link disconnected".to_string()
        }
    }
}
