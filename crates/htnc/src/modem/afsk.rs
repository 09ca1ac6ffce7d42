// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! AFSK demodulator: quadrature tone correlators, multiple slicers, a
//! per-slicer digital PLL for bit timing.
//!
//! Each incoming sample is mixed against local mark and space
//! oscillators; the lowpassed I/Q magnitudes give per-tone strengths and
//! their normalized difference is the demodulated "eye". Slicers cut
//! that eye at evenly spaced thresholds and each runs its own clock
//! recovery, so an off-center signal that fools one slice point is often
//! caught by a neighbor. This is the "best of N" strategy: all slicers
//! decode in parallel and the first valid frame wins upstream.

use crate::config::ChannelConfig;
use crate::core::ALevel;
use crate::hdlc::repair::{RetryLevel, SanityCheck};
use crate::modem::{SliceEvent, Slicer};

/// Carrier hysteresis: on above, off below (tone magnitude sum).
const DCD_ON: f32 = 0.06;
const DCD_OFF: f32 = 0.02;

/// One demodulator profile (subchannel) over one audio channel.
pub struct AfskDemod {
    sample_rate: f32,
    step: f32,
    mark_phase: f32,
    mark_step: f32,
    space_phase: f32,
    space_step: f32,
    /// Lowpass coefficient; profiles differ here.
    lp: f32,
    mi: f32,
    mq: f32,
    si: f32,
    sq: f32,
    slicers: Vec<Slicer>,
    carrier: bool,
    carrier_changed: bool,
    tone_level: f32,
    input_peak: f32,
    mark_peak: f32,
    space_peak: f32,
}

impl AfskDemod {
    pub fn new(cfg: &ChannelConfig, subchan: usize, retry: RetryLevel, sanity: SanityCheck) -> Self {
        let rate = cfg.sample_rate as f32;
        let baud = cfg.baud as f32;
        // Profile spread: each subchannel uses a different correlator
        // bandwidth so marginal signals get more than one chance.
        let profile_scale = [1.0f32, 0.62, 1.6, 0.8, 1.25][subchan % 5];
        let slicers = Slicer::spread(cfg.num_slicers)
            .map(|t| Slicer::new(t, cfg, retry, sanity))
            .collect();
        Self {
            sample_rate: rate,
            step: baud / rate,
            mark_phase: 0.0,
            mark_step: 2.0 * std::f32::consts::PI * cfg.mark_freq as f32 / rate,
            space_phase: 0.0,
            space_step: 2.0 * std::f32::consts::PI * cfg.space_freq as f32 / rate,
            lp: (baud / rate) * profile_scale,
            mi: 0.0,
            mq: 0.0,
            si: 0.0,
            sq: 0.0,
            slicers,
            carrier: false,
            carrier_changed: false,
            tone_level: 0.0,
            input_peak: 0.0,
            mark_peak: 0.0,
            space_peak: 0.0,
        }
    }

    pub fn process_sample(&mut self, sample: i16) -> Vec<(usize, SliceEvent)> {
        let x = f32::from(sample) / 32768.0;
        self.input_peak = self.input_peak.max(x.abs()) * 0.99999 + 1e-9;

        self.mark_phase = (self.mark_phase + self.mark_step) % (2.0 * std::f32::consts::PI);
        self.space_phase = (self.space_phase + self.space_step) % (2.0 * std::f32::consts::PI);

        self.mi += self.lp * (x * self.mark_phase.cos() - self.mi);
        self.mq += self.lp * (x * self.mark_phase.sin() - self.mq);
        self.si += self.lp * (x * self.space_phase.cos() - self.si);
        self.sq += self.lp * (x * self.space_phase.sin() - self.sq);

        let mark = (self.mi * self.mi + self.mq * self.mq).sqrt();
        let space = (self.si * self.si + self.sq * self.sq).sqrt();
        self.mark_peak = self.mark_peak.max(mark);
        self.space_peak = self.space_peak.max(space);
        let demod = (mark - space) / (mark + space + 1e-9);

        // Carrier tracking with hysteresis on total tone energy.
        self.tone_level += 0.01 * ((mark + space) - self.tone_level);
        let new_carrier = if self.carrier {
            self.tone_level > DCD_OFF
        } else {
            self.tone_level > DCD_ON
        };
        if new_carrier != self.carrier {
            self.carrier = new_carrier;
            self.carrier_changed = true;
        }

        let mut out = Vec::new();
        let step = self.step;
        for (idx, slicer) in self.slicers.iter_mut().enumerate() {
            if let Some(events) = slicer.tick(demod, step) {
                for ev in events {
                    out.push((idx, ev));
                }
            }
        }
        out
    }

    /// (carrier state, state-change pending). Clears the pending flag.
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
            mark: (self.mark_peak * 200.0).min(100.0) as i32,
            space: (self.space_peak * 200.0).min(100.0) as i32,
        }
    }

    /// Samples per second this demodulator expects.
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }
}
