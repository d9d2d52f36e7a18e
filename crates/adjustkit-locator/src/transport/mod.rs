//! Link adapters for the serial-to-Ethernet gateway
//!
//! The mediator depends on exactly this surface: a [`LinkHandle`] to push
//! frames through and a channel of [`LinkEvent`]s coming back. Sockets,
//! reconnects and watchdogs stay behind it.

mod error;
mod link;
pub mod mock;

pub use error::TransportError;
pub use link::{LinkConfig, LocatorLink};

use bytes::Bytes;

/// Events a link adapter raises toward the mediator.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The link finished a round-trip (or just connected) and can take
    /// the next frame.
    Ready,
    /// A complete inbound frame.
    Frame(Bytes),
    /// No response inside the adapter's window, or the resend ceiling
    /// was exhausted.
    TimedOut,
    /// The connection dropped; any queued session state is stale.
    QueueReset,
}

/// The mediator-facing surface of a link adapter.
pub trait LinkHandle: Send + Sync {
    /// Queue one frame for transmission. `is_restart` marks the
    /// fire-and-forget reboot frame: no response is expected and no
    /// watchdog is armed.
    fn send(&self, frame: Bytes, is_restart: bool);

    /// Transmit the previously sent frame again, verbatim. Bounded by
    /// the adapter's own resend ceiling.
    fn resend_last(&self);

    fn is_connected(&self) -> bool;

    /// Human-readable description of the last socket-level error.
    fn last_error(&self) -> String;
}
