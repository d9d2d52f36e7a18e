//! Last-known device state

use adjustkit_core::{AdjustState, LinkStatus};

/// The mediator-owned record of the last values confirmed by the device.
///
/// Doubles as the accumulation target for an in-flight read batch: the
/// decoder overwrites it field by field as responses arrive. The cached
/// `fvco` and `distance_to_locator` feed differential command
/// suppression. Nobody but the mediator mutates it.
#[derive(Debug, Default)]
pub struct Repository {
    state: AdjustState,
}

impl Repository {
    /// Starts at the no-data sentinel (all fields zero, status normal).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fvco(&mut self, hz: f64) {
        self.state.vco_frequency = hz;
    }

    pub fn set_doppler(&mut self, hz: f64) {
        self.state.doppler_frequency = hz;
    }

    pub fn set_distance(&mut self, meters: f64) {
        self.state.distance = meters;
    }

    pub fn set_distance_to_locator(&mut self, meters: f64) {
        self.state.distance_to_locator = meters;
    }

    pub fn set_gain_tx(&mut self, db: f64) {
        self.state.gain_tx = db;
    }

    pub fn set_gain_rx(&mut self, db: f64) {
        self.state.gain_rx = db;
    }

    pub fn set_attenuator_db(&mut self, db: f64) {
        self.state.attenuator_db = db;
    }

    pub fn set_work_mode(&mut self, mode: u8) {
        self.state.work_mode = mode;
    }

    pub fn fvco(&self) -> f64 {
        self.state.vco_frequency
    }

    pub fn distance_to_locator(&self) -> f64 {
        self.state.distance_to_locator
    }

    /// Back to the no-data sentinel, flagged timed-out. Whatever partial
    /// data the failed session collected is not to be trusted.
    pub fn set_timeout_state(&mut self) {
        self.state = AdjustState {
            status: LinkStatus::TimedOut,
            ..AdjustState::default()
        };
    }

    /// Back to the no-data sentinel, flagged not-connected.
    pub fn set_no_connection_state(&mut self) {
        self.state = AdjustState {
            status: LinkStatus::NotConnected,
            ..AdjustState::default()
        };
    }

    /// Restore the normal variant at the start of a fresh session,
    /// keeping the cached field values.
    pub fn clear_status(&mut self) {
        self.state.status = LinkStatus::Normal;
    }

    /// The current record, as emitted outward.
    pub fn snapshot(&self) -> AdjustState {
        self.state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_override_data() {
        let mut repo = Repository::new();
        repo.set_fvco(30_300_000.0);
        repo.set_distance(500.0);

        repo.set_timeout_state();
        let snap = repo.snapshot();
        assert_eq!(snap.status, LinkStatus::TimedOut);
        assert_eq!(snap.vco_frequency, 0.0);
        assert_eq!(snap.distance, 0.0);

        repo.set_no_connection_state();
        assert_eq!(repo.snapshot().status, LinkStatus::NotConnected);
    }

    #[test]
    fn test_clear_status_keeps_fields() {
        let mut repo = Repository::new();
        repo.set_fvco(30_300_000.0);
        repo.set_distance_to_locator(68.0);
        repo.clear_status();
        assert_eq!(repo.fvco(), 30_300_000.0);
        assert_eq!(repo.distance_to_locator(), 68.0);
    }
}
