//! The adjusting-kit protocol mediator
//!
//! Turns a high-level "set/read device state" request into the ordered
//! command sequence the firmware expects, drives it through the link one
//! frame at a time, reassembles the multi-frame answer into a snapshot
//! and degrades to the timed-out / not-connected variants when the
//! conversation breaks down.
//!
//! All transitions run on one event loop; nothing here blocks and
//! nothing needs a lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use adjustkit_core::{AdjustState, MediatorEvent, RequestMode};

use crate::proto::{CommandEncoder, Repository, StateAccumulator, READ_CHANNELS};
use crate::transport::{LinkEvent, LinkHandle};

const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(3500);
const REQUEST_CAPACITY: usize = 8;
const OUT_CAPACITY: usize = 32;

/// Where the mediator is in its conversation with the device.
///
/// The keepalive timer runs purely as a side effect of `Idle`; a session
/// is strictly half-duplex and must never interleave with a ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No session; the keepalive ping is the only traffic.
    Idle,
    /// A command queue is draining, one frame in flight at a time.
    Session,
}

/// Hands requests to the mediator's event loop.
#[derive(Clone)]
pub struct MediatorHandle {
    requests: mpsc::Sender<AdjustState>,
}

impl MediatorHandle {
    /// Submit a write, read or restart request. The matching snapshot
    /// (or its terminal variant) comes back on the event channel.
    pub async fn request(&self, state: AdjustState) {
        let _ = self.requests.send(state).await;
    }

    /// State refresh without a preceding write.
    pub async fn read_only(&self) {
        self.request(AdjustState::read_request()).await;
    }
}

/// The state machine and command-queue owner for one locator kit.
pub struct Mediator {
    link: Arc<dyn LinkHandle>,
    link_events: mpsc::Receiver<LinkEvent>,
    requests: mpsc::Receiver<AdjustState>,
    out: mpsc::Sender<MediatorEvent>,
    encoder: CommandEncoder,
    accumulator: StateAccumulator,
    repository: Repository,
    queue: VecDeque<Bytes>,
    phase: Phase,
    is_restart_mode: bool,
    keepalive: Interval,
}

impl Mediator {
    pub fn new(
        link: Arc<dyn LinkHandle>,
        link_events: mpsc::Receiver<LinkEvent>,
        carrier_hz: f64,
        reference_hz: f64,
    ) -> (Self, MediatorHandle, mpsc::Receiver<MediatorEvent>) {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel(OUT_CAPACITY);

        let mut keepalive = interval_at(Instant::now() + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mediator = Self {
            link,
            link_events,
            requests: request_rx,
            out: out_tx,
            encoder: CommandEncoder::new(carrier_hz, reference_hz),
            accumulator: StateAccumulator::new(reference_hz),
            repository: Repository::new(),
            queue: VecDeque::new(),
            phase: Phase::Idle,
            is_restart_mode: false,
            keepalive,
        };
        let handle = MediatorHandle {
            requests: request_tx,
        };
        (mediator, handle, out_rx)
    }

    /// Run until both the request handle and the link are gone.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.keepalive.tick(), if self.phase == Phase::Idle => {
                    self.on_keepalive_tick();
                }
                request = self.requests.recv() => match request {
                    Some(state) => self.on_request(state).await,
                    None => break,
                },
                event = self.link_events.recv() => match event {
                    Some(LinkEvent::Ready) => self.dispatch().await,
                    Some(LinkEvent::Frame(frame)) => self.on_frame(frame).await,
                    Some(LinkEvent::TimedOut) => self.on_timeout().await,
                    Some(LinkEvent::QueueReset) => self.on_queue_reset(),
                    None => break,
                },
            }
        }
    }

    /// A new top-level request supersedes whatever session was running.
    async fn on_request(&mut self, state: AdjustState) {
        if !self.link.is_connected() {
            warn!(error = %self.link.last_error(), "request while the link is down");
            self.is_restart_mode = false;
            self.repository.set_no_connection_state();
            self.emit_snapshot().await;
            return;
        }

        self.phase = Phase::Session;
        self.accumulator.reset();
        self.repository.clear_status();

        match state.mode {
            RequestMode::Restart => {
                info!("restarting the device");
                self.queue.clear();
                self.is_restart_mode = true;
                self.queue.push_back(self.encoder.restart_command());
            }
            RequestMode::Read => {
                info!("refreshing device state");
                self.is_restart_mode = false;
                self.queue.clear();
                self.push_read_commands();
            }
            RequestMode::Write => {
                info!("writing device state");
                self.is_restart_mode = false;
                self.repository
                    .set_distance_to_locator(state.distance_to_locator);
                self.queue.clear();
                self.push_write_commands(&state);
                self.push_read_commands();
            }
        }
        self.dispatch().await;
    }

    /// The fixed write sequence. Only the PLL relock is ever skipped,
    /// and only when the requested VCO programs the words already in the
    /// device; nothing is reordered.
    fn push_write_commands(&mut self, state: &AdjustState) {
        self.queue.push_back(self.encoder.six_command(0, 0.0));
        if !self
            .encoder
            .same_pll_words(self.repository.fvco(), state.vco_frequency)
        {
            self.queue
                .push_back(self.encoder.first_command(state.vco_frequency));
        }
        self.queue
            .push_back(self.encoder.second_command(state.vco_frequency, state.doppler_frequency));
        self.queue
            .push_back(self.encoder.third_command(state.distance, state.distance_to_locator));
        self.queue
            .push_back(self.encoder.fourth_command(state.gain_tx, state.gain_rx));
        self.queue
            .push_back(self.encoder.five_command(state.attenuator_db));
        self.queue
            .push_back(self.encoder.six_command(state.work_mode, 0.0));
    }

    fn push_read_commands(&mut self) {
        for channel in READ_CHANNELS {
            self.queue.push_back(self.encoder.seven_command(channel));
        }
    }

    /// Advance the conversation: send the queue front, or fall back to
    /// idle once the session has drained. A readiness signal while
    /// already idle is a completed keepalive round-trip.
    async fn dispatch(&mut self) {
        if self.phase == Phase::Idle {
            debug!("keepalive answered, link healthy");
            let _ = self.out.send(MediatorEvent::LinkHealthy).await;
            return;
        }
        match self.queue.pop_front() {
            Some(frame) => {
                debug!(frame = %hex::encode(&frame), queued = self.queue.len(), "dispatching");
                self.link.send(frame, self.is_restart_mode);
            }
            None => {
                debug!("session drained");
                self.enter_idle();
            }
        }
    }

    async fn on_frame(&mut self, frame: Bytes) {
        if self
            .accumulator
            .try_fill_from_frame(&frame, &mut self.repository)
        {
            if self.accumulator.take_all_collected() {
                info!("full state collected");
                self.emit_snapshot().await;
            }
            self.dispatch().await;
        } else {
            warn!(frame = %hex::encode(&frame), "undecodable frame, asking for a resend");
            self.link.resend_last();
        }
    }

    /// The queue is left alone: the next request clears it anyway, and
    /// wiping it here would hide which frames never got answered.
    async fn on_timeout(&mut self) {
        warn!("request timed out");
        self.repository.set_timeout_state();
        self.emit_snapshot().await;
    }

    fn on_queue_reset(&mut self) {
        debug!("link asked for a queue reset");
        self.queue.clear();
        if self.phase == Phase::Session {
            self.enter_idle();
        }
    }

    fn on_keepalive_tick(&mut self) {
        debug!("keepalive ping");
        self.link.send(self.encoder.zero_command(), false);
    }

    fn enter_idle(&mut self) {
        self.phase = Phase::Idle;
        self.keepalive.reset();
    }

    async fn emit_snapshot(&mut self) {
        let snapshot = self.repository.snapshot();
        let _ = self.out.send(MediatorEvent::Snapshot(snapshot)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockLink;
    use adjustkit_core::LinkStatus;
    use pretty_assertions::assert_eq;

    const F: f64 = 30_250_000.0;
    const FREF: f64 = 40_000_000.0;

    fn write_request() -> AdjustState {
        AdjustState {
            mode: RequestMode::Write,
            vco_frequency: 30_300_000.0,
            doppler_frequency: 1000.0,
            distance: 500.0,
            distance_to_locator: 68.0,
            gain_tx: 15.5,
            gain_rx: 20.0,
            attenuator_db: 12.5,
            work_mode: 2,
            status: LinkStatus::Normal,
        }
    }

    fn spawn_mediator() -> (
        Arc<MockLink>,
        MediatorHandle,
        mpsc::Receiver<MediatorEvent>,
    ) {
        let (link, link_events) = MockLink::new();
        let (mediator, handle, out) = Mediator::new(link.clone(), link_events, F, FREF);
        tokio::spawn(mediator.run());
        (link, handle, out)
    }

    /// Let the mediator task drain everything that is already runnable
    /// before the test advances the clock.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn next_event(out: &mut mpsc::Receiver<MediatorEvent>) -> MediatorEvent {
        tokio::time::timeout(Duration::from_secs(1), out.recv())
            .await
            .expect("no mediator event")
            .expect("mediator gone")
    }

    async fn next_snapshot(out: &mut mpsc::Receiver<MediatorEvent>) -> AdjustState {
        match next_event(out).await {
            MediatorEvent::Snapshot(snapshot) => snapshot,
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_write_session_sequence() {
        let (link, handle, mut out) = spawn_mediator();

        handle.request(write_request()).await;
        let snapshot = next_snapshot(&mut out).await;
        settle().await;

        // Warm-up, relock (cache was empty), the five writes, six
        // read-backs in ascending channel order
        assert_eq!(
            link.sent_ids(),
            vec![6, 1, 2, 3, 4, 5, 6, 7, 7, 7, 7, 7, 7]
        );
        let params: Vec<u8> = link
            .sent_frames()
            .iter()
            .filter(|(f, _)| f[0] == 7)
            .map(|(f, _)| f[1])
            .collect();
        assert_eq!(params, vec![1, 2, 3, 4, 5, 6]);

        assert_eq!(snapshot.status, LinkStatus::Normal);
        assert_eq!(snapshot.distance, 500.0);
        assert_eq!(snapshot.gain_rx, 20.0);
        assert!(!link.one_in_flight_violated());
    }

    #[tokio::test]
    async fn test_cached_fvco_suppresses_relock() {
        let (link, handle, mut out) = spawn_mediator();

        // Prime the cache: the canned telemetry reports 30.3 MHz
        handle.read_only().await;
        let primed = next_snapshot(&mut out).await;
        assert!((primed.vco_frequency - 30_300_000.0).abs() < 1.0);
        settle().await;
        link.clear_sent();

        // Same target frequency: the relock is omitted, order untouched
        handle.request(write_request()).await;
        let snapshot = next_snapshot(&mut out).await;
        settle().await;
        assert_eq!(link.sent_ids(), vec![6, 2, 3, 4, 5, 6, 7, 7, 7, 7, 7, 7]);
        assert_eq!(snapshot.status, LinkStatus::Normal);
    }

    #[tokio::test]
    async fn test_read_session() {
        let (link, handle, mut out) = spawn_mediator();

        handle.read_only().await;
        let snapshot = next_snapshot(&mut out).await;
        settle().await;

        assert_eq!(link.sent_ids(), vec![7, 7, 7, 7, 7, 7]);
        assert_eq!(snapshot.status, LinkStatus::Normal);
        assert_eq!(snapshot.work_mode, 2);
        assert_eq!(snapshot.attenuator_db, 12.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_session() {
        let (link, handle, mut out) = spawn_mediator();

        handle.request(AdjustState::restart_request()).await;
        settle().await;

        // Back in idle, so the next thing on the wire is a keepalive;
        // no snapshot came out of the restart
        tokio::time::advance(Duration::from_millis(3600)).await;
        assert_eq!(next_event(&mut out).await, MediatorEvent::LinkHealthy);

        let sent = link.sent_frames();
        assert_eq!(sent[0].0.as_ref(), &[0x08]);
        assert!(sent[0].1, "restart frame carries the restart flag");
        assert_eq!(sent[1].0.as_ref(), &[0x00]);
        assert!(!sent[1].1);
    }

    #[tokio::test]
    async fn test_request_while_not_connected() {
        let (link, handle, mut out) = spawn_mediator();
        link.set_connected(false);

        handle.request(write_request()).await;
        let snapshot = next_snapshot(&mut out).await;

        assert_eq!(snapshot.status, LinkStatus::NotConnected);
        assert!(link.sent_frames().is_empty(), "queue was never touched");
    }

    #[tokio::test]
    async fn test_timeout_emits_terminal_snapshot() {
        let (link, handle, mut out) = spawn_mediator();
        link.set_auto_respond(false);

        handle.request(write_request()).await;
        link.inject(LinkEvent::TimedOut);

        let snapshot = next_snapshot(&mut out).await;
        assert_eq!(snapshot.status, LinkStatus::TimedOut);
        assert_eq!(snapshot.vco_frequency, 0.0);
        settle().await;
        // Only the first frame ever went out
        assert_eq!(link.sent_ids(), vec![6]);
    }

    #[tokio::test]
    async fn test_decode_failure_triggers_one_resend() {
        let (link, handle, mut out) = spawn_mediator();
        link.fail_next_response();

        handle.request(write_request()).await;
        let snapshot = next_snapshot(&mut out).await;
        assert_eq!(snapshot.status, LinkStatus::Normal);
        settle().await;

        // The garbled warm-up ack was answered by resending the warm-up
        // frame verbatim, and the queue never advanced past it
        let ids = link.sent_ids();
        assert_eq!(&ids[..3], &[6, 6, 1]);
        assert_eq!(ids.len(), 14);
    }

    #[tokio::test]
    async fn test_snapshot_emitted_once_per_request() {
        let (_link, handle, mut out) = spawn_mediator();

        handle.request(write_request()).await;
        let first = next_event(&mut out).await;
        assert!(matches!(first, MediatorEvent::Snapshot(_)));

        // The read-backs that drain after the batch completed must not
        // produce a second snapshot
        assert!(
            tokio::time::timeout(Duration::from_millis(100), out.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_reports_link_healthy() {
        let (link, _handle, mut out) = spawn_mediator();

        tokio::time::advance(Duration::from_millis(3600)).await;
        assert_eq!(next_event(&mut out).await, MediatorEvent::LinkHealthy);
        assert_eq!(link.sent_ids(), vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_reset_returns_to_idle() {
        let (link, handle, mut out) = spawn_mediator();
        link.set_auto_respond(false);

        handle.request(write_request()).await;
        settle().await;
        assert_eq!(link.sent_ids(), vec![6]);

        link.inject(LinkEvent::QueueReset);
        link.set_auto_respond(true);
        settle().await;

        // Keepalive resumes after the disconnect wiped the session
        tokio::time::advance(Duration::from_millis(3600)).await;
        assert_eq!(next_event(&mut out).await, MediatorEvent::LinkHealthy);
        assert_eq!(link.sent_ids(), vec![6, 0]);
    }
}
