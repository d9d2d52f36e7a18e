//! Command frame constructors
//!
//! Pure transforms from physical parameters to wire frames. The only
//! state is the pair of frequencies read from settings at construction;
//! same inputs always produce the same bytes.

use bytes::{BufMut, Bytes, BytesMut};

use super::{command_id, FRACT_MODULUS, SPEED_OF_LIGHT};

/// Builds the fixed-layout binary command frames the device firmware
/// expects.
#[derive(Debug, Clone)]
pub struct CommandEncoder {
    /// Carrier frequency `f`, Hz.
    carrier_hz: f64,
    /// PLL reference frequency `fref`, Hz.
    reference_hz: f64,
}

impl CommandEncoder {
    pub fn new(carrier_hz: f64, reference_hz: f64) -> Self {
        Self {
            carrier_hz,
            reference_hz,
        }
    }

    /// Keepalive probe; also the device's no-op.
    pub fn zero_command(&self) -> Bytes {
        Bytes::from_static(&[command_id::ZERO])
    }

    /// Programs the PLL for `fvco`.
    pub fn first_command(&self, fvco: f64) -> Bytes {
        let mut frame = BytesMut::with_capacity(8);
        frame.put_u8(command_id::FIRST);
        frame.put_u16(self.pll_int(fvco));
        frame.put_u32(self.pll_fract(fvco));
        frame.put_u8(self.pll_div(fvco) as u8);
        frame.freeze()
    }

    /// Doppler shift encoded as radial velocity (cm/s) relative to the
    /// programmed VCO.
    pub fn second_command(&self, fvco: f64, doppler_hz: f64) -> Bytes {
        let mut frame = BytesMut::with_capacity(5);
        frame.put_u8(command_id::SECOND);
        frame.put_i32(doppler_to_velocity(fvco, doppler_hz));
        frame.freeze()
    }

    /// Target distance and the fixed locator-to-target offset, both in
    /// decimeters.
    pub fn third_command(&self, distance_m: f64, distance_to_locator_m: f64) -> Bytes {
        let mut frame = BytesMut::with_capacity(5);
        frame.put_u8(command_id::THIRD);
        frame.put_u16(distance_dm(distance_m));
        frame.put_u16(distance_dm(distance_to_locator_m));
        frame.freeze()
    }

    /// TX and RX gains as half-dB codes.
    pub fn fourth_command(&self, gain_tx_db: f64, gain_rx_db: f64) -> Bytes {
        let mut frame = BytesMut::with_capacity(3);
        frame.put_u8(command_id::FOURTH);
        frame.put_u8(gain_code(gain_tx_db));
        frame.put_u8(gain_code(gain_rx_db));
        frame.freeze()
    }

    /// Attenuation quantized to the device's half-dB step attenuator.
    pub fn five_command(&self, attenuator_db: f64) -> Bytes {
        let mut frame = BytesMut::with_capacity(2);
        frame.put_u8(command_id::FIVE);
        frame.put_u8(attenuator_code(attenuator_db));
        frame.freeze()
    }

    /// Noise configuration. `(0, 0.0)` is the harmless warm-up frame sent
    /// ahead of a write session; `(work_mode, value)` is the final write.
    pub fn six_command(&self, noise_type: u8, noise_value: f64) -> Bytes {
        let mut frame = BytesMut::with_capacity(4);
        frame.put_u8(command_id::SIX);
        frame.put_u8(noise_type);
        frame.put_u16(noise_value.round().clamp(0.0, f64::from(u16::MAX)) as u16);
        frame.freeze()
    }

    /// Read request for one telemetry channel (1..=6).
    pub fn seven_command(&self, param: u8) -> Bytes {
        let mut frame = BytesMut::with_capacity(2);
        frame.put_u8(command_id::SEVEN);
        frame.put_u8(param);
        frame.freeze()
    }

    /// Device reboot request.
    pub fn restart_command(&self) -> Bytes {
        Bytes::from_static(&[command_id::RESTART])
    }

    /// Whether two VCO frequencies program identical PLL words. The
    /// mediator skips the relock when they do.
    pub fn same_pll_words(&self, a: f64, b: f64) -> bool {
        self.pll_int(a) == self.pll_int(b)
            && self.pll_fract(a) == self.pll_fract(b)
            && self.pll_div(a) == self.pll_div(b)
    }

    // Truncation toward zero, as the firmware expects.
    fn pll_int(&self, fvco: f64) -> u16 {
        (fvco / self.reference_hz).trunc() as u16
    }

    fn pll_fract(&self, fvco: f64) -> u32 {
        let ratio = fvco / self.reference_hz;
        ((ratio - ratio.trunc()) * FRACT_MODULUS).round() as u32
    }

    // Divide-by-2 once the VCO runs above the carrier.
    fn pll_div(&self, fvco: f64) -> bool {
        fvco > self.carrier_hz
    }
}

pub(crate) fn doppler_to_velocity(fvco: f64, doppler_hz: f64) -> i32 {
    (doppler_hz * SPEED_OF_LIGHT / (2.0 * fvco) * 100.0).round() as i32
}

pub(crate) fn velocity_to_doppler(fvco: f64, velocity_cm_s: i32) -> f64 {
    f64::from(velocity_cm_s) / 100.0 * 2.0 * fvco / SPEED_OF_LIGHT
}

pub(crate) fn gain_code(gain_db: f64) -> u8 {
    (gain_db * 2.0).round().clamp(0.0, 255.0) as u8
}

pub(crate) fn gain_db(code: u8) -> f64 {
    f64::from(code) / 2.0
}

pub(crate) fn attenuator_code(attenuator_db: f64) -> u8 {
    (attenuator_db * 2.0).round().clamp(0.0, 63.0) as u8
}

pub(crate) fn attenuator_db(code: u8) -> f64 {
    f64::from(code) / 2.0
}

pub(crate) fn distance_dm(meters: f64) -> u16 {
    (meters * 10.0).trunc().clamp(0.0, f64::from(u16::MAX)) as u16
}

pub(crate) fn distance_m(decimeters: u16) -> f64 {
    f64::from(decimeters) / 10.0
}
