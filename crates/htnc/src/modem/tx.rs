// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transmit modulator: turns framed bits into audio samples.
//!
//! One instance per channel, owned by the transmit scheduler. The
//! scheduler feeds preamble flags, frame bits and postamble flags in
//! separate calls; PSK symbol buffering persists across calls and is
//! padded out by [`Modulator::flush`] at the end of the transmission.

use crate::config::{ChannelConfig, ModemType, V26Variant};
use crate::core::SampleSink;
use crate::error::Result;
use crate::hdlc::NrziEncoder;
use crate::modem::baseband::G3ruhScrambler;
use crate::modem::dds::{clip, ToneGen};

/// Line coding applied between framing and tone generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineCoding {
    /// Classic AX.25: G3RUH scramble (9600 only) then NRZI.
    Ax25,
    /// FX.25: scramble at 9600, never NRZI.
    Fx25,
    /// IL2P: raw bits; it carries its own scrambler.
    Raw,
}

/// Bit-to-audio converter for one channel.
pub struct Modulator {
    modem_type: ModemType,
    v26: V26Variant,
    baud: u32,
    sample_rate: u32,
    mark_freq: f64,
    space_freq: f64,
    tone: ToneGen,
    /// Fractional samples-per-bit accumulator.
    acc: u32,
    nrzi: NrziEncoder,
    scram: G3ruhScrambler,
    /// Baseband: previous line bit, for the phase-reset rule.
    bb_prev: Option<u8>,
    /// PSK: bits waiting to complete a symbol.
    psk_pending: Vec<u8>,
    psk_started: bool,
    clip_count: u64,
}

impl Modulator {
    pub fn new(cfg: &ChannelConfig) -> Self {
        let mut tone = ToneGen::new(cfg.sample_rate, 100);
        match cfg.modem_type {
            ModemType::Qpsk | ModemType::Psk8 => tone.set_freq(1800.0),
            ModemType::Baseband | ModemType::Scramble => {
                tone.set_freq(f64::from(cfg.baud) / 2.0);
            }
            _ => {}
        }
        Self {
            modem_type: cfg.modem_type,
            v26: cfg.v26,
            baud: cfg.baud,
            sample_rate: cfg.sample_rate,
            mark_freq: f64::from(cfg.mark_freq),
            space_freq: f64::from(cfg.space_freq),
            tone,
            acc: 0,
            nrzi: NrziEncoder::new(),
            scram: G3ruhScrambler::new(),
            bb_prev: None,
            psk_pending: Vec::new(),
            psk_started: false,
            clip_count: 0,
        }
    }

    /// Bits per second on the air.
    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// How many samples have been clipped so far (logged, not fatal).
    pub fn clip_count(&self) -> u64 {
        self.clip_count
    }

    /// Modulate a bit sequence. Returns the number of samples emitted.
    pub fn send_bits(
        &mut self,
        bits: &[u8],
        coding: LineCoding,
        sink: &mut dyn SampleSink,
    ) -> Result<usize> {
        let mut emitted = 0;
        for &bit in bits {
            let line = self.line_code(bit, coding);
            emitted += match self.modem_type {
                ModemType::Afsk | ModemType::Ais | ModemType::Eas => {
                    self.send_afsk_bit(line, sink)?
                }
                ModemType::Baseband | ModemType::Scramble => self.send_bb_bit(line, sink)?,
                ModemType::Qpsk => self.send_psk_bit(line, 2, sink)?,
                ModemType::Psk8 => self.send_psk_bit(line, 3, sink)?,
            };
        }
        Ok(emitted)
    }

    /// Finish the transmission: pad any partial PSK symbol.
    pub fn flush(&mut self, sink: &mut dyn SampleSink) -> Result<usize> {
        let mut emitted = 0;
        if matches!(self.modem_type, ModemType::Qpsk | ModemType::Psk8) {
            let symbol = if self.modem_type == ModemType::Qpsk { 2 } else { 3 };
            while !self.psk_pending.is_empty() {
                emitted += self.send_psk_bit(0, symbol, sink)?;
            }
        }
        self.bb_prev = None;
        self.psk_started = false;
        Ok(emitted)
    }

    fn line_code(&mut self, bit: u8, coding: LineCoding) -> u8 {
        let scrambled = if self.modem_type == ModemType::Scramble
            && matches!(coding, LineCoding::Ax25 | LineCoding::Fx25)
        {
            self.scram.bit(bit)
        } else {
            bit
        };
        match coding {
            LineCoding::Ax25 => self.nrzi.encode(scrambled),
            LineCoding::Fx25 | LineCoding::Raw => scrambled,
        }
    }

    /// Emit one bit worth of samples, tracking the fractional rate/baud
    /// ratio so long frames stay on clock.
    fn bit_samples(&mut self) -> u32 {
        self.acc += self.sample_rate;
        let n = self.acc / self.baud;
        self.acc -= n * self.baud;
        n
    }

    fn send_afsk_bit(&mut self, line: u8, sink: &mut dyn SampleSink) -> Result<usize> {
        // Mark on 1, space on 0, decided by the line bit; the mapping is
        // fixed so IL2P's unscrambled bits keep their polarity.
        self.tone
            .set_freq(if line == 1 { self.mark_freq } else { self.space_freq });
        let n = self.bit_samples();
        for _ in 0..n {
            let s = i32::from(self.tone.next());
            sink.put(clip(s, &mut self.clip_count))?;
        }
        Ok(n as usize)
    }

    fn send_bb_bit(&mut self, line: u8, sink: &mut dyn SampleSink) -> Result<usize> {
        // Half-baud sine: a bit change rides the natural peak-to-peak
        // swing; a repeated bit pins the phase at the peak so the level
        // holds without ringing.
        match self.bb_prev {
            Some(prev) if prev != line => {} // let the phase run
            _ => self.tone.set_phase(if line == 1 { 90.0 } else { 270.0 }),
        }
        self.bb_prev = Some(line);
        let n = self.bit_samples();
        for _ in 0..n {
            let s = i32::from(self.tone.next());
            sink.put(clip(s, &mut self.clip_count))?;
        }
        Ok(n as usize)
    }

    fn send_psk_bit(
        &mut self,
        line: u8,
        symbol_bits: usize,
        sink: &mut dyn SampleSink,
    ) -> Result<usize> {
        self.psk_pending.push(line);
        if self.psk_pending.len() < symbol_bits {
            return Ok(0);
        }
        let value = self
            .psk_pending
            .drain(..)
            .fold(0usize, |acc, b| (acc << 1) | usize::from(b));

        let delta = if symbol_bits == 2 {
            f64::from(QPSK_GRAY_DEGREES[value])
        } else {
            f64::from(PSK8_GRAY_DEGREES[value])
        };
        self.tone.shift_phase(delta);
        if self.v26 == V26Variant::B && symbol_bits == 2 {
            self.tone.shift_phase(45.0);
        }
        self.psk_started = true;

        // One symbol spans `symbol_bits` bit times.
        let mut n = 0;
        for _ in 0..symbol_bits {
            n += self.bit_samples();
        }
        for _ in 0..n {
            let s = i32::from(self.tone.next());
            sink.put(clip(s, &mut self.clip_count))?;
        }
        Ok(n as usize)
    }
}

/// Gray-coded dibit to phase change, V.26: 00 01 11 10 -> 0 90 180 270.
pub const QPSK_GRAY_DEGREES: [u16; 4] = [0, 90, 270, 180];

/// Gray-coded tribit to phase change, V.27.
pub const PSK8_GRAY_DEGREES: [u16; 8] = [0, 45, 135, 90, 315, 270, 180, 225];
