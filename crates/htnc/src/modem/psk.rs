// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! QPSK (V.26) and 8PSK (V.27) demodulation.
//!
//! Differential detection: mix against a local 1800 Hz oscillator,
//! lowpass the I/Q pair, and compare the carrier phase at successive
//! symbol instants. The phase change, gray-decoded, yields two or three
//! bits per symbol. Symbol timing locks onto the amplitude dips the
//! vector sweeps through at phase transitions.

use crate::config::{ChannelConfig, ModemType, V26Variant};
use crate::core::ALevel;
use crate::hdlc::repair::{RetryLevel, SanityCheck};
use crate::modem::tx::{PSK8_GRAY_DEGREES, QPSK_GRAY_DEGREES};
use crate::modem::{SliceDecoder, SliceEvent, PLL_INERTIA};

const DCD_ON: f32 = 0.04;
const DCD_OFF: f32 = 0.015;
const CARRIER_HZ: f32 = 1800.0;

/// PSK demodulator for one subchannel. PSK runs a single slice point;
/// the parallelism knob for these modes is the subchannel profile.
pub struct PskDemod {
    bits_per_symbol: usize,
    v26: V26Variant,
    step: f32,
    lp_coeff: f32,
    osc_phase: f32,
    osc_step: f32,
    i_lp: f32,
    q_lp: f32,
    clock: f32,
    prev_phase: f32,
    mag_avg: f32,
    in_dip: bool,
    decoder: SliceDecoder,
    carrier: bool,
    carrier_changed: bool,
    input_peak: f32,
}

impl PskDemod {
    pub fn new(cfg: &ChannelConfig, subchan: usize, retry: RetryLevel, sanity: SanityCheck) -> Self {
        let rate = cfg.sample_rate as f32;
        let bits_per_symbol = if cfg.modem_type == ModemType::Psk8 { 3 } else { 2 };
        let sym_rate = cfg.baud as f32 / bits_per_symbol as f32;
        let profile_scale = [1.0f32, 0.6, 1.5][subchan % 3];
        Self {
            bits_per_symbol,
            v26: cfg.v26,
            step: sym_rate / rate,
            lp_coeff: (2.0 * sym_rate / rate).min(1.0) * profile_scale,
            osc_phase: 0.0,
            osc_step: 2.0 * std::f32::consts::PI * CARRIER_HZ / rate,
            i_lp: 0.0,
            q_lp: 0.0,
            clock: 0.0,
            prev_phase: 0.0,
            mag_avg: 0.0,
            in_dip: false,
            decoder: SliceDecoder::new(cfg, retry, sanity),
            carrier: false,
            carrier_changed: false,
            input_peak: 0.0,
        }
    }

    pub fn process_sample(&mut self, sample: i16) -> Vec<(usize, SliceEvent)> {
        let x = f32::from(sample) / 32768.0;
        self.input_peak = self.input_peak.max(x.abs()) * 0.99999 + 1e-9;

        self.osc_phase = (self.osc_phase + self.osc_step) % (2.0 * std::f32::consts::PI);
        self.i_lp += self.lp_coeff * (x * self.osc_phase.cos() - self.i_lp);
        self.q_lp += self.lp_coeff * (x * self.osc_phase.sin() - self.q_lp);

        let mag = (self.i_lp * self.i_lp + self.q_lp * self.q_lp).sqrt();
        self.mag_avg += 0.01 * (mag - self.mag_avg);

        let new_carrier = if self.carrier {
            self.mag_avg > DCD_OFF
        } else {
            self.mag_avg > DCD_ON
        };
        if new_carrier != self.carrier {
            self.carrier = new_carrier;
            self.carrier_changed = true;
        }

        // Symbol sync: a phase jump drags the vector through a magnitude
        // dip; pull the sampling clock half a symbol away from it.
        if mag < 0.5 * self.mag_avg {
            if !self.in_dip {
                self.in_dip = true;
                self.clock += PLL_INERTIA * (0.5 - self.clock);
            }
        } else {
            self.in_dip = false;
        }

        self.clock += self.step;
        if self.clock < 1.0 {
            return Vec::new();
        }
        self.clock -= 1.0;

        // With a sine transmit carrier, I carries sin(phi) and Q carries
        // cos(phi); atan2(I, Q) recovers phi with the right rotation sense.
        let phase = self.i_lp.atan2(self.q_lp);
        let mut delta = (phase - self.prev_phase).to_degrees();
        self.prev_phase = phase;
        if self.v26 == V26Variant::B && self.bits_per_symbol == 2 {
            delta -= 45.0;
        }
        while delta < 0.0 {
            delta += 360.0;
        }

        let value = if self.bits_per_symbol == 2 {
            let sector = ((delta / 90.0).round() as usize) % 4;
            QPSK_GRAY_DEGREES
                .iter()
                .position(|&d| usize::from(d) == sector * 90)
                .unwrap_or(0)
        } else {
            let sector = ((delta / 45.0).round() as usize) % 8;
            PSK8_GRAY_DEGREES
                .iter()
                .position(|&d| usize::from(d) == sector * 45)
                .unwrap_or(0)
        };

        let mut out = Vec::new();
        for k in (0..self.bits_per_symbol).rev() {
            let bit = ((value >> k) & 1) as u8;
            for ev in self.decoder.rx_line_bit(bit) {
                out.push((0usize, ev));
            }
        }
        out
    }

    pub fn carrier_change(&mut self) -> (bool, bool) {
        let changed = self.carrier_changed;
        self.carrier_changed = false;
        (self.carrier, changed)
    }

    pub fn fx25_busy(&self) -> bool {
        self.decoder.fx25_busy()
    }

    pub fn alevel(&self) -> ALevel {
        ALevel {
            rec: (self.input_peak * 100.0).min(100.0) as i32,
            mark: -1,
            space: -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelConfig, ModemType};
    use crate::core::SampleSink;
    use crate::error::Result;
    use crate::hdlc::send::{flag_bits, frame_bits};
    use crate::modem::tx::{LineCoding, Modulator};
    use crate::protocol::Frame;

    struct VecSink(Vec<i16>);
    impl SampleSink for VecSink {
        fn put(&mut self, s: i16) -> Result<()> {
            self.0.push(s);
            Ok(())
        }
        fn drain(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn loopback(modem_type: ModemType, baud: u32) {
        let cfg = ChannelConfig { modem_type, baud, ..ChannelConfig::default() };
        let f = Frame::from_monitor("W1ABC>APRS:>psk loopback", true).unwrap();
        let mut m = Modulator::new(&cfg);
        let mut sink = VecSink(Vec::new());
        let mut bits = flag_bits(60);
        bits.extend(frame_bits(&f, false));
        bits.extend(flag_bits(8));
        m.send_bits(&bits, LineCoding::Ax25, &mut sink).unwrap();
        m.flush(&mut sink).unwrap();

        let mut d = PskDemod::new(&cfg, 0, RetryLevel::None, SanityCheck::Aprs);
        let mut got = Vec::new();
        for s in sink.0 {
            for (_slicer, ev) in d.process_sample(s) {
                got.push(ev.frame);
            }
        }
        assert_eq!(got.len(), 1, "{:?} {}", modem_type, baud);
        assert_eq!(got[0], f);
    }

    #[test]
    fn test_qpsk_loopback() {
        loopback(ModemType::Qpsk, 2400);
    }

    #[test]
    fn test_8psk_loopback() {
        loopback(ModemType::Psk8, 4800);
    }

    #[test]
    fn test_gray_tables_are_inverses() {
        for v in 0..4usize {
            let deg = usize::from(QPSK_GRAY_DEGREES[v]);
            let back = QPSK_GRAY_DEGREES.iter().position(|&d| usize::from(d) == deg).unwrap();
            assert_eq!(back, v);
        }
        for v in 0..8usize {
            let deg = usize::from(PSK8_GRAY_DEGREES[v]);
            let back = PSK8_GRAY_DEGREES.iter().position(|&d| usize::from(d) == deg).unwrap();
            assert_eq!(back, v);
        }
    }
}
