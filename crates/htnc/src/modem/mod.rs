// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Modulators and demodulators.
//!
//! # Architecture
//!
//! ```text
//!  transmit                           receive (per channel)
//!  --------                           ---------------------
//!  bits -> Modulator -> samples       samples -> Demodulator
//!                                        |-> subchan 0 (profile A)
//!                                        |     |-> slicer 0 -> SliceDecoder
//!                                        |     `-> slicer 1 -> SliceDecoder
//!                                        |-> subchan 1 (profile B) ...
//!                                        `-> DTMF detector
//! ```
//!
//! Every slicer owns a full [`SliceDecoder`]: an HDLC deframer, an FX.25
//! receiver and an IL2P receiver all chewing the same bit stream in
//! parallel. Whichever produces a valid frame first wins; copies of the
//! same frame from sibling slicers are suppressed within a short window,
//! which is held open while any FX.25 receiver is still mid-block
//! (codeblocks finish many byte times after the plain frame would).

pub mod afsk;
pub mod baseband;
pub mod dcd;
pub mod dds;
pub mod dtmf;
pub mod morse;
pub mod psk;
pub mod tx;

pub use dcd::{DcdMonitor, DCD_SOURCE_DTMF};
pub use dds::ToneGen;
pub use dtmf::DtmfDetector;
pub use tx::Modulator;

use std::sync::Arc;

use crate::config::{ChannelConfig, ModemType};
use crate::core::ALevel;
use crate::fec::fx25::Fx25Receiver;
use crate::fec::il2p::Il2pReceiver;
use crate::hdlc::repair::{try_repair, RetryLevel, SanityCheck};
use crate::hdlc::{DeframeEvent, HdlcDeframer, NrziDecoder};
use crate::protocol::Frame;
use crate::Chan;

use baseband::G3ruhDescrambler;

/// How a received frame was framed on the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FecMode {
    None,
    Fx25,
    Il2p,
}

/// One decoded frame with its provenance.
#[derive(Debug)]
pub struct RxFrame {
    pub chan: Chan,
    pub subchan: usize,
    pub slicer: usize,
    pub frame: Frame,
    pub alevel: ALevel,
    pub fec: FecMode,
    /// Byte errors fixed by Reed-Solomon, if any.
    pub corrected: usize,
    /// True when the FCS retry-repair stage produced this frame.
    pub repaired: bool,
}

/// Everything one call to [`Demodulator::process`] produced.
#[derive(Debug, Default)]
pub struct DemodOutput {
    pub frames: Vec<RxFrame>,
    /// DTMF button presses, including the `$` inactivity marker.
    pub buttons: Vec<char>,
}

// ============================================================================
// Per-slicer decoder stack
// ============================================================================

pub(crate) struct SliceEvent {
    pub frame: Frame,
    pub fec: FecMode,
    pub corrected: usize,
    pub repaired: bool,
}

/// HDLC + FX.25 + IL2P decoders fed by a single slicer's bit decisions.
pub(crate) struct SliceDecoder {
    descramble: bool,
    nrzi: NrziDecoder,
    /// Descrambler for the classic AX.25 path (after NRZI undo).
    g3ruh_ax25: G3ruhDescrambler,
    /// Separate descrambler state for the FX.25 path (no NRZI there).
    g3ruh_fx25: G3ruhDescrambler,
    hdlc: HdlcDeframer,
    fx25: Fx25Receiver,
    il2p: Il2pReceiver,
    retry: RetryLevel,
    sanity: SanityCheck,
}

impl SliceDecoder {
    pub fn new(cfg: &ChannelConfig, retry: RetryLevel, sanity: SanityCheck) -> Self {
        Self {
            descramble: cfg.modem_type == ModemType::Scramble,
            nrzi: NrziDecoder::new(),
            g3ruh_ax25: G3ruhDescrambler::new(),
            g3ruh_fx25: G3ruhDescrambler::new(),
            hdlc: HdlcDeframer::new(),
            fx25: Fx25Receiver::new(),
            il2p: Il2pReceiver::new(cfg.il2p_crc),
            retry,
            sanity,
        }
    }

    pub fn fx25_busy(&self) -> bool {
        self.fx25.busy()
    }

    /// Feed one line bit (the slicer's raw decision).
    pub fn rx_line_bit(&mut self, bit: u8) -> Vec<SliceEvent> {
        let mut events = Vec::new();

        // IL2P carries its own scrambler; raw line bits go straight in.
        if let Some(d) = self.il2p.rx_bit(bit) {
            events.push(SliceEvent {
                frame: d.frame,
                fec: FecMode::Il2p,
                corrected: d.corrected,
                repaired: false,
            });
        }

        // FX.25: no NRZI; the G3RUH descrambler still applies at 9600.
        let fx_bit = if self.descramble { self.g3ruh_fx25.bit(bit) } else { bit };
        if let Some(d) = self.fx25.rx_bit(fx_bit) {
            events.push(SliceEvent {
                frame: d.frame,
                fec: FecMode::Fx25,
                corrected: d.corrected,
                repaired: false,
            });
        }

        // Classic AX.25: NRZI undo first, then descramble.
        let mut data_bit = self.nrzi.decode(bit);
        if self.descramble {
            data_bit = self.g3ruh_ax25.bit(data_bit);
        }
        match self.hdlc.rx_bit(data_bit) {
            Some(DeframeEvent::Frame(bytes)) => {
                if let Ok(frame) = Frame::from_wire(&bytes) {
                    events.push(SliceEvent {
                        frame,
                        fec: FecMode::None,
                        corrected: 0,
                        repaired: false,
                    });
                }
            }
            Some(DeframeEvent::BadFcs(bytes)) => {
                if let Some(fixed) = try_repair(&bytes, self.retry, self.sanity) {
                    if let Ok(frame) = Frame::from_wire(&fixed) {
                        events.push(SliceEvent {
                            frame,
                            fec: FecMode::None,
                            corrected: 0,
                            repaired: true,
                        });
                    }
                }
            }
            None => {}
        }
        events
    }
}

// ============================================================================
// Shared slicer: threshold + bit-clock PLL + decoder stack
// ============================================================================

/// PLL nudge strength toward mid-bit on each transition.
pub(crate) const PLL_INERTIA: f32 = 0.3;

pub(crate) struct Slicer {
    threshold: f32,
    clock: f32,
    prev_bit: u8,
    pub(crate) decoder: SliceDecoder,
}

impl Slicer {
    pub(crate) fn new(
        threshold: f32,
        cfg: &ChannelConfig,
        retry: RetryLevel,
        sanity: SanityCheck,
    ) -> Self {
        Self { threshold, clock: 0.0, prev_bit: 0, decoder: SliceDecoder::new(cfg, retry, sanity) }
    }

    /// Evenly spaced thresholds in (-0.5, 0.5) for `n` slicers.
    pub(crate) fn spread(n: usize) -> impl Iterator<Item = f32> {
        let n = n.max(1);
        (0..n).map(move |k| ((2 * k + 1) as f32 - n as f32) / (2 * n) as f32)
    }

    /// Advance the bit clock with the current eye value; on wrap, sample
    /// the line bit and run the decoders.
    pub(crate) fn tick(&mut self, demod: f32, step: f32) -> Option<Vec<SliceEvent>> {
        let bit = u8::from(demod > self.threshold);
        if bit != self.prev_bit {
            // Transitions belong at clock 0.5, half a bit before the
            // sample point at the wrap.
            self.clock += PLL_INERTIA * (0.5 - self.clock);
        }
        self.prev_bit = bit;
        self.clock += step;
        if self.clock >= 1.0 {
            self.clock -= 1.0;
            Some(self.decoder.rx_line_bit(bit))
        } else {
            None
        }
    }
}

// ============================================================================
// Per-channel demodulator front end
// ============================================================================

enum SubDemod {
    Afsk(afsk::AfskDemod),
    Baseband(baseband::BasebandDemod),
    Psk(psk::PskDemod),
}

/// Receive side of one radio channel: all subchannels, all slicers, the
/// DTMF detector, and the cross-slicer duplicate suppression.
pub struct Demodulator {
    chan: Chan,
    subs: Vec<SubDemod>,
    dtmf: Option<DtmfDetector>,
    dcd: Arc<DcdMonitor>,
    /// (dedupe CRC, sample clock) of recently emitted frames.
    recent: Vec<(u16, u64)>,
    sample_clock: u64,
    /// Duplicate window in samples.
    dup_window: u64,
}

impl Demodulator {
    pub fn new(
        chan: Chan,
        cfg: &ChannelConfig,
        dcd: Arc<DcdMonitor>,
        retry: RetryLevel,
        sanity: SanityCheck,
    ) -> Self {
        let mut subs = Vec::with_capacity(cfg.num_subchans);
        for subchan in 0..cfg.num_subchans {
            subs.push(match cfg.modem_type {
                ModemType::Afsk | ModemType::Ais | ModemType::Eas => {
                    SubDemod::Afsk(afsk::AfskDemod::new(cfg, subchan, retry, sanity))
                }
                ModemType::Baseband | ModemType::Scramble => {
                    SubDemod::Baseband(baseband::BasebandDemod::new(cfg, subchan, retry, sanity))
                }
                ModemType::Qpsk | ModemType::Psk8 => {
                    SubDemod::Psk(psk::PskDemod::new(cfg, subchan, retry, sanity))
                }
            });
        }
        let dtmf = cfg.dtmf_decode.then(|| DtmfDetector::new(cfg.sample_rate));
        Self {
            chan,
            subs,
            dtmf,
            dcd,
            recent: Vec::new(),
            sample_clock: 0,
            // Half a second covers the longest FX.25 block at 1200 baud.
            dup_window: u64::from(cfg.sample_rate) / 2,
        }
    }

    /// Demodulate a block of received audio.
    pub fn process(&mut self, samples: &[i16]) -> DemodOutput {
        let mut out = DemodOutput::default();

        let mut pending: Vec<(usize, usize, SliceEvent)> = Vec::new();
        for &s in samples {
            self.sample_clock += 1;

            for (subchan, sub) in self.subs.iter_mut().enumerate() {
                let produced = match sub {
                    SubDemod::Afsk(d) => d.process_sample(s),
                    SubDemod::Baseband(d) => d.process_sample(s),
                    SubDemod::Psk(d) => d.process_sample(s),
                };
                for (slicer, ev) in produced {
                    pending.push((subchan, slicer, ev));
                }
                let (carrier, known) = match sub {
                    SubDemod::Afsk(d) => d.carrier_change(),
                    SubDemod::Baseband(d) => d.carrier_change(),
                    SubDemod::Psk(d) => d.carrier_change(),
                };
                if known {
                    self.dcd.set(self.chan, subchan, carrier);
                }
            }
            for (subchan, slicer, ev) in pending.drain(..) {
                self.emit(subchan, slicer, ev, &mut out.frames);
            }

            if let Some(dtmf) = &mut self.dtmf {
                if let Some(button) = dtmf.process_sample(s) {
                    out.buttons.push(button);
                }
                self.dcd.set(self.chan, DCD_SOURCE_DTMF, dtmf.active());
            }
        }
        out
    }

    fn emit(&mut self, subchan: usize, slicer: usize, ev: SliceEvent, frames: &mut Vec<RxFrame>) {
        let crc = ev.frame.dedupe_crc();
        let now = self.sample_clock;
        let window = self.dup_window;
        self.recent.retain(|&(_, t)| now.saturating_sub(t) <= window * 4);

        let fx25_busy = self.subs.iter().any(|s| match s {
            SubDemod::Afsk(d) => d.fx25_busy(),
            SubDemod::Baseband(d) => d.fx25_busy(),
            SubDemod::Psk(d) => d.fx25_busy(),
        });
        let dup = self
            .recent
            .iter()
            .any(|&(c, t)| c == crc && (now.saturating_sub(t) <= window || fx25_busy));
        if dup {
            log::debug!(
                "[Demod] chan {} subchan {} slicer {} duplicate suppressed",
                self.chan,
                subchan,
                slicer
            );
            return;
        }
        self.recent.push((crc, now));

        let alevel = match self.subs.get(subchan) {
            Some(SubDemod::Afsk(d)) => d.alevel(),
            Some(SubDemod::Baseband(d)) => d.alevel(),
            Some(SubDemod::Psk(d)) => d.alevel(),
            None => ALevel::default(),
        };
        frames.push(RxFrame {
            chan: self.chan,
            subchan,
            slicer,
            frame: ev.frame,
            alevel,
            fec: ev.fec,
            corrected: ev.corrected,
            repaired: ev.repaired,
        });
    }
}
