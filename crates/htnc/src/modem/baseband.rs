// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! G3RUH 9600 baseband: the x^17 + x^12 + 1 scrambler pair and the
//! direct-conversion demodulator.
//!
//! The scrambler is multiplicative on transmit (feeds back its own
//! output) and divisive on receive (feeds forward the received bits), so
//! the receiver self-synchronizes within 17 bits no matter where it
//! starts listening. IL2P skips it entirely; classic AX.25 and FX.25 at
//! 9600 go through it. The demodulator itself is just a lowpass, a set
//! of slicers around the tracked center, and the shared bit-clock PLL.

use crate::config::ChannelConfig;
use crate::core::ALevel;
use crate::hdlc::repair::{RetryLevel, SanityCheck};
use crate::modem::{SliceEvent, Slicer};

const DCD_ON: f32 = 0.05;
const DCD_OFF: f32 = 0.02;

/// Transmit scrambler, taps x^17 + x^12 + 1.
#[derive(Debug, Default)]
pub struct G3ruhScrambler {
    state: u32,
}

impl G3ruhScrambler {
    pub fn new() -> Self {
        Self { state: 0 }
    }

    #[inline]
    pub fn bit(&mut self, b: u8) -> u8 {
        let out = b ^ ((self.state >> 16) as u8 & 1) ^ ((self.state >> 11) as u8 & 1);
        self.state = (self.state << 1) | u32::from(out);
        out
    }
}

/// Receive descrambler; self-synchronizing inverse of the scrambler.
#[derive(Debug, Default)]
pub struct G3ruhDescrambler {
    state: u32,
}

impl G3ruhDescrambler {
    pub fn new() -> Self {
        Self { state: 0 }
    }

    #[inline]
    pub fn bit(&mut self, b: u8) -> u8 {
        let out = b ^ ((self.state >> 16) as u8 & 1) ^ ((self.state >> 11) as u8 & 1);
        self.state = (self.state << 1) | u32::from(b);
        out
    }
}

/// Direct baseband demodulator for 9600 (and other high-rate) channels.
pub struct BasebandDemod {
    step: f32,
    lp_coeff: f32,
    lp: f32,
    /// Tracked amplitude envelope, for DCD and slicer scaling.
    envelope: f32,
    slicers: Vec<Slicer>,
    carrier: bool,
    carrier_changed: bool,
    input_peak: f32,
}

impl BasebandDemod {
    pub fn new(cfg: &ChannelConfig, subchan: usize, retry: RetryLevel, sanity: SanityCheck) -> Self {
        let rate = cfg.sample_rate as f32;
        let baud = cfg.baud as f32;
        let profile_scale = [1.0f32, 0.6, 1.5][subchan % 3];
        let slicers = Slicer::spread(cfg.num_slicers)
            .map(|t| Slicer::new(t, cfg, retry, sanity))
            .collect();
        Self {
            step: baud / rate,
            lp_coeff: (2.0 * baud / rate).min(1.0) * profile_scale,
            lp: 0.0,
            envelope: 0.0,
            slicers,
            carrier: false,
            carrier_changed: false,
            input_peak: 0.0,
        }
    }

    pub fn process_sample(&mut self, sample: i16) -> Vec<(usize, SliceEvent)> {
        let x = f32::from(sample) / 32768.0;
        self.input_peak = self.input_peak.max(x.abs()) * 0.99999 + 1e-9;

        self.lp += self.lp_coeff * (x - self.lp);
        self.envelope += 0.005 * (self.lp.abs() - self.envelope);

        let new_carrier = if self.carrier {
            self.envelope > DCD_OFF
        } else {
            self.envelope > DCD_ON
        };
        if new_carrier != self.carrier {
            self.carrier = new_carrier;
            self.carrier_changed = true;
        }

        // Normalize the eye so slicer offsets stay meaningful across
        // signal levels.
        let eye = self.lp / self.envelope.max(1e-6) * 0.5;

        let mut out = Vec::new();
        let step = self.step;
        for (idx, slicer) in self.slicers.iter_mut().enumerate() {
            if let Some(events) = slicer.tick(eye, step) {
                for ev in events {
                    out.push((idx, ev));
                }
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
        self.slicers.iter().any(|s| s.decoder.fx25_busy())
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

    fn cfg_9600() -> ChannelConfig {
        ChannelConfig {
            modem_type: ModemType::Scramble,
            baud: 9600,
            sample_rate: 44100,
            ..ChannelConfig::default()
        }
    }

    #[test]
    fn test_scrambler_pair_inverts() {
        let mut tx = G3ruhScrambler::new();
        let mut rx = G3ruhDescrambler::new();
        let data: Vec<u8> = (0..200).map(|i| ((i * 7 + 3) % 2) as u8).collect();
        let out: Vec<u8> = data.iter().map(|&b| rx.bit(tx.bit(b))).collect();
        assert_eq!(out, data);
    }

    #[test]
    fn test_descrambler_self_synchronizes() {
        let mut tx = G3ruhScrambler::new();
        let scrambled: Vec<u8> = (0..300).map(|i| tx.bit(((i / 3) % 2) as u8)).collect();
        // Start the descrambler 40 bits late; after 17 bits of state
        // fill it must track exactly.
        let mut rx = G3ruhDescrambler::new();
        let decoded: Vec<u8> = scrambled[40..].iter().map(|&b| rx.bit(b)).collect();
        let expect: Vec<u8> = (40..300).map(|i| ((i / 3) % 2) as u8).collect();
        assert_eq!(&decoded[17..], &expect[17..]);
    }

    #[test]
    fn test_loopback_9600_scrambled() {
        let cfg = cfg_9600();
        let f = Frame::from_monitor("W1ABC-7>APRS:>g3ruh loopback", true).unwrap();
        let mut m = Modulator::new(&cfg);
        let mut sink = VecSink(Vec::new());
        let mut bits = flag_bits(80);
        bits.extend(frame_bits(&f, false));
        bits.extend(flag_bits(8));
        m.send_bits(&bits, LineCoding::Ax25, &mut sink).unwrap();

        let mut d = BasebandDemod::new(&cfg, 0, RetryLevel::None, SanityCheck::Aprs);
        let mut got = Vec::new();
        for s in sink.0 {
            for (_slicer, ev) in d.process_sample(s) {
                got.push(ev.frame);
            }
        }
        assert_eq!(got.len(), 1);
        assert_eq!(got[0], f);
    }
}
