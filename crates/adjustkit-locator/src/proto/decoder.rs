//! Response decoding and batch accumulation
//!
//! Inbound frames are keyed by command id and decoded into the shared
//! [`Repository`]. A batch is complete once every one of the six
//! telemetry channels has been decoded at least once since the last
//! reset; repeats and out-of-order arrival do not fire completion early.

use super::encoder::{attenuator_db, distance_m, gain_db, velocity_to_doppler};
use super::{command_id, frame_len, Repository, FRACT_MODULUS};

const CHANNEL_COUNT: usize = 6;

/// Parses device responses and tracks batch completion.
#[derive(Debug)]
pub struct StateAccumulator {
    /// PLL reference frequency `fref`, Hz.
    reference_hz: f64,
    /// Which channel ids (1..=6) have been decoded since the last reset.
    seen: [bool; CHANNEL_COUNT],
    /// Completion already reported for this batch.
    fired: bool,
}

impl StateAccumulator {
    pub fn new(reference_hz: f64) -> Self {
        Self {
            reference_hz,
            seen: [false; CHANNEL_COUNT],
            fired: false,
        }
    }

    /// Forget everything collected; the next batch starts clean.
    pub fn reset(&mut self) {
        self.seen = [false; CHANNEL_COUNT];
        self.fired = false;
    }

    /// One-shot completion check: true on the first call after all six
    /// channel ids have been seen, false on every later call until the
    /// next [`reset`](Self::reset).
    pub fn take_all_collected(&mut self) -> bool {
        if self.fired {
            return false;
        }
        if self.seen.iter().all(|seen| *seen) {
            self.fired = true;
            return true;
        }
        false
    }

    /// Decode one inbound frame into the repository.
    ///
    /// Returns false for frames matching no expected shape (unknown id,
    /// wrong length, out-of-range payload) and leaves the repository
    /// untouched; the caller asks the link to resend instead of advancing
    /// the queue.
    pub fn try_fill_from_frame(&mut self, frame: &[u8], repo: &mut Repository) -> bool {
        let Some((&id, payload)) = frame.split_first() else {
            return false;
        };
        if frame_len(id) != Some(frame.len()) {
            return false;
        }

        match id {
            command_id::FIRST => {
                let int = u16::from_be_bytes([payload[0], payload[1]]);
                let fract = u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]);
                if payload[6] > 1 {
                    return false;
                }
                let fvco = (f64::from(int) + f64::from(fract) / FRACT_MODULUS) * self.reference_hz;
                repo.set_fvco(fvco);
            }
            command_id::SECOND => {
                let velocity =
                    i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                // Needs the programmed VCO; channel 1 decodes first in
                // every session the device runs.
                repo.set_doppler(velocity_to_doppler(repo.fvco(), velocity));
            }
            command_id::THIRD => {
                let distance = u16::from_be_bytes([payload[0], payload[1]]);
                let offset = u16::from_be_bytes([payload[2], payload[3]]);
                repo.set_distance(distance_m(distance));
                repo.set_distance_to_locator(distance_m(offset));
            }
            command_id::FOURTH => {
                repo.set_gain_tx(gain_db(payload[0]));
                repo.set_gain_rx(gain_db(payload[1]));
            }
            command_id::FIVE => {
                if payload[0] > 63 {
                    return false;
                }
                repo.set_attenuator_db(attenuator_db(payload[0]));
            }
            command_id::SIX => {
                repo.set_work_mode(payload[0]);
            }
            // ZERO, SEVEN and RESTART are never data-bearing responses
            _ => return false,
        }

        self.seen[usize::from(id) - 1] = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::CommandEncoder;
    use pretty_assertions::assert_eq;

    const F: f64 = 30_250_000.0;
    const FREF: f64 = 40_000_000.0;

    fn parts() -> (CommandEncoder, StateAccumulator, Repository) {
        (
            CommandEncoder::new(F, FREF),
            StateAccumulator::new(FREF),
            Repository::new(),
        )
    }

    #[test]
    fn test_first_command_round_trip() {
        let (enc, mut acc, mut repo) = parts();
        let frame = enc.first_command(30_300_000.0);
        assert!(acc.try_fill_from_frame(&frame, &mut repo));
        // Recovered frequency lands in the same PLL bucket
        assert!(enc.same_pll_words(repo.fvco(), 30_300_000.0));
        assert!((repo.fvco() - 30_300_000.0).abs() < 1.0);
    }

    #[test]
    fn test_doppler_round_trip_uses_cached_fvco() {
        let (enc, mut acc, mut repo) = parts();
        assert!(acc.try_fill_from_frame(&enc.first_command(30_300_000.0), &mut repo));
        let frame = enc.second_command(repo.fvco(), 1500.0);
        assert!(acc.try_fill_from_frame(&frame, &mut repo));
        // Velocity register quantizes to 1 cm/s, well under 1 Hz here
        assert!((repo.snapshot().doppler_frequency - 1500.0).abs() < 1.0);
    }

    #[test]
    fn test_field_decoding() {
        let (enc, mut acc, mut repo) = parts();
        assert!(acc.try_fill_from_frame(&enc.third_command(500.0, 68.0), &mut repo));
        assert!(acc.try_fill_from_frame(&enc.fourth_command(15.5, 20.0), &mut repo));
        assert!(acc.try_fill_from_frame(&enc.five_command(12.5), &mut repo));
        assert!(acc.try_fill_from_frame(&enc.six_command(2, 0.0), &mut repo));

        let snap = repo.snapshot();
        assert_eq!(snap.distance, 500.0);
        assert_eq!(snap.distance_to_locator, 68.0);
        assert_eq!(snap.gain_tx, 15.5);
        assert_eq!(snap.gain_rx, 20.0);
        assert_eq!(snap.attenuator_db, 12.5);
        assert_eq!(snap.work_mode, 2);
    }

    #[test]
    fn test_malformed_frames_rejected() {
        let (enc, mut acc, mut repo) = parts();

        // Unknown id
        assert!(!acc.try_fill_from_frame(&[0x09, 0x00], &mut repo));
        // Truncated payload
        assert!(!acc.try_fill_from_frame(&[0x01, 0x00, 0x01], &mut repo));
        // Oversized payload
        assert!(!acc.try_fill_from_frame(&[0x05, 0x10, 0x10], &mut repo));
        // DIV byte out of range
        let mut frame = enc.first_command(30_300_000.0).to_vec();
        frame[7] = 5;
        assert!(!acc.try_fill_from_frame(&frame, &mut repo));
        // Attenuator code beyond the 6-bit range
        assert!(!acc.try_fill_from_frame(&[0x05, 0x7F], &mut repo));
        // Empty frame
        assert!(!acc.try_fill_from_frame(&[], &mut repo));
        // Request-only ids are not data
        assert!(!acc.try_fill_from_frame(&[0x07, 0x01], &mut repo));
        assert!(!acc.try_fill_from_frame(&[0x00], &mut repo));

        // None of that touched the repository
        assert_eq!(repo.snapshot(), Default::default());
        assert!(!acc.take_all_collected());
    }

    #[test]
    fn test_completion_requires_every_channel() {
        let (enc, mut acc, mut repo) = parts();

        // Five of six channels, one of them repeatedly
        for _ in 0..3 {
            assert!(acc.try_fill_from_frame(&enc.third_command(1.0, 1.0), &mut repo));
        }
        assert!(acc.try_fill_from_frame(&enc.first_command(30_300_000.0), &mut repo));
        assert!(acc.try_fill_from_frame(&enc.second_command(30_300_000.0, 0.0), &mut repo));
        assert!(acc.try_fill_from_frame(&enc.fourth_command(1.0, 1.0), &mut repo));
        assert!(acc.try_fill_from_frame(&enc.five_command(1.0), &mut repo));
        assert!(!acc.take_all_collected());

        // The sixth completes the batch, exactly once
        assert!(acc.try_fill_from_frame(&enc.six_command(1, 0.0), &mut repo));
        assert!(acc.take_all_collected());
        assert!(!acc.take_all_collected());

        // Late repeats do not re-fire
        assert!(acc.try_fill_from_frame(&enc.six_command(1, 0.0), &mut repo));
        assert!(!acc.take_all_collected());

        // A reset starts the next batch clean
        acc.reset();
        assert!(!acc.take_all_collected());
    }
}
