//! Device state models
//!
//! [`AdjustState`] is both shapes of the workstation protocol: the request
//! handed to the mediator and the snapshot it emits back. Which one it is
//! at any moment is a matter of direction, not of type.

use serde::{Deserialize, Serialize};

/// What a request asks the mediator to do with the adjusting kit.
///
/// Discriminants are fixed by the workstation protocol: 0 writes the full
/// parameter set, 3 reboots the device, 4 refreshes state without writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestMode {
    /// Write the requested parameters, then read them back.
    #[default]
    Write = 0,
    /// Reboot the device.
    Restart = 3,
    /// Read-only state refresh.
    Read = 4,
}

impl From<u8> for RequestMode {
    fn from(raw: u8) -> Self {
        match raw {
            3 => RequestMode::Restart,
            4 => RequestMode::Read,
            _ => RequestMode::Write,
        }
    }
}

/// Terminal condition attached to an emitted snapshot.
///
/// Exactly one variant holds for any snapshot the mediator emits;
/// `TimedOut` and `NotConnected` override whatever fields had been
/// collected before the session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// The snapshot carries real device data.
    #[default]
    Normal,
    /// The device stopped answering mid-session.
    TimedOut,
    /// The link was down when the request arrived.
    NotConnected,
}

/// One full set of adjusting-kit parameters.
///
/// Frequencies in Hz, distances in meters, gains and attenuation in dB.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AdjustState {
    pub mode: RequestMode,
    /// VCO target frequency programmed into the PLL.
    pub vco_frequency: f64,
    pub doppler_frequency: f64,
    pub distance: f64,
    /// Fixed locator-to-target offset.
    pub distance_to_locator: f64,
    pub gain_tx: f64,
    pub gain_rx: f64,
    pub attenuator_db: f64,
    pub work_mode: u8,
    #[serde(default)]
    pub status: LinkStatus,
}

impl AdjustState {
    /// A read-only state refresh request.
    pub fn read_request() -> Self {
        Self {
            mode: RequestMode::Read,
            ..Self::default()
        }
    }

    /// A device reboot request.
    pub fn restart_request() -> Self {
        Self {
            mode: RequestMode::Restart,
            ..Self::default()
        }
    }
}

/// What the mediator reports outward to the workstation consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum MediatorEvent {
    /// The finished state snapshot for a request, or its timed-out /
    /// not-connected variant.
    Snapshot(AdjustState),
    /// A keepalive round-trip completed while idle.
    LinkHealthy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_discriminants() {
        assert_eq!(RequestMode::from(0), RequestMode::Write);
        assert_eq!(RequestMode::from(3), RequestMode::Restart);
        assert_eq!(RequestMode::from(4), RequestMode::Read);
        // Anything unrecognized is a write, the protocol default
        assert_eq!(RequestMode::from(7), RequestMode::Write);
    }

    #[test]
    fn test_request_constructors() {
        assert_eq!(AdjustState::read_request().mode, RequestMode::Read);
        assert_eq!(AdjustState::restart_request().mode, RequestMode::Restart);
        assert_eq!(AdjustState::default().status, LinkStatus::Normal);
    }
}
