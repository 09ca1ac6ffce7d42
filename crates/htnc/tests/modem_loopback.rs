// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Audio loopback: modulate a frame, demodulate the samples, get the
//! frame back. This exercises the whole physical layer the way a real
//! radio channel would, minus the noise.

use std::sync::Arc;

use htnc::config::{ChannelConfig, Fx25Strength, ModemType};
use htnc::core::SampleSink;
use htnc::error::Result;
use htnc::fec::{fx25, il2p};
use htnc::hdlc::repair::{RetryLevel, SanityCheck};
use htnc::hdlc::{flag_bits, frame_bits};
use htnc::modem::tx::LineCoding;
use htnc::modem::{DcdMonitor, Demodulator, FecMode, Modulator};
use htnc::protocol::Frame;

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

fn demodulate(cfg: &ChannelConfig, audio: &[i16]) -> Vec<(Frame, FecMode, usize)> {
    let dcd = Arc::new(DcdMonitor::new(1));
    let mut demod = Demodulator::new(0, cfg, dcd, RetryLevel::None, SanityCheck::Aprs);
    let mut out = Vec::new();
    for chunk in audio.chunks(441) {
        for rx in demod.process(chunk).frames {
            out.push((rx.frame, rx.fec, rx.corrected));
        }
    }
    out
}

#[test]
fn afsk1200_plain_ax25() {
    let cfg = ChannelConfig::default();
    let frame = Frame::from_monitor("W1ABC-7>APRS,WIDE2-2:!4237.14N/07120.83W>car", true).unwrap();

    let mut m = Modulator::new(&cfg);
    let mut sink = VecSink(Vec::new());
    let mut bits = flag_bits(32);
    bits.extend(frame_bits(&frame, false));
    bits.extend(flag_bits(4));
    m.send_bits(&bits, LineCoding::Ax25, &mut sink).unwrap();

    let got = demodulate(&cfg, &sink.0);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].0, frame);
    assert_eq!(got[0].1, FecMode::None);
}

#[test]
fn afsk1200_fx25_with_byte_errors() {
    let cfg = ChannelConfig::default();
    let frame = Frame::from_monitor("W1ABC>APRS:>fx25 over audio", true).unwrap();

    let mut wire = fx25::encode(&frame, Fx25Strength::Check32, false).unwrap();
    // Corrupt three wire bytes after the tag; RS fixes them.
    wire[20] ^= 0x81;
    wire[30] ^= 0x18;
    wire[40] ^= 0x7E;

    let mut m = Modulator::new(&cfg);
    let mut sink = VecSink(Vec::new());
    // Bit-sync preamble then the codeblock, no NRZI.
    let preamble: Vec<u8> = (0..128).map(|i| (i & 1) as u8).collect();
    m.send_bits(&preamble, LineCoding::Raw, &mut sink).unwrap();
    let wire_bits: Vec<u8> =
        wire.iter().flat_map(|&b| (0..8).map(move |i| (b >> i) & 1)).collect();
    m.send_bits(&wire_bits, LineCoding::Fx25, &mut sink).unwrap();

    let got = demodulate(&cfg, &sink.0);
    let fx: Vec<_> = got.iter().filter(|(_, fec, _)| *fec == FecMode::Fx25).collect();
    assert_eq!(fx.len(), 1);
    assert_eq!(fx[0].0, frame);
    assert_eq!(fx[0].2, 3);
}

#[test]
fn afsk1200_il2p() {
    let cfg = ChannelConfig::default();
    let frame = Frame::from_monitor("W1ABC>APRS-1:>il2p over audio", true).unwrap();

    let wire = il2p::encode(&frame, true, false).unwrap();
    let mut m = Modulator::new(&cfg);
    let mut sink = VecSink(Vec::new());
    let preamble: Vec<u8> = (0..128).map(|i| (i & 1) as u8).collect();
    m.send_bits(&preamble, LineCoding::Raw, &mut sink).unwrap();
    let wire_bits: Vec<u8> =
        wire.iter().flat_map(|&b| (0..8).rev().map(move |i| (b >> i) & 1)).collect();
    m.send_bits(&wire_bits, LineCoding::Raw, &mut sink).unwrap();

    let got = demodulate(&cfg, &sink.0);
    let il: Vec<_> = got.iter().filter(|(_, fec, _)| *fec == FecMode::Il2p).collect();
    assert_eq!(il.len(), 1);
    assert_eq!(il[0].0, frame);
}

#[test]
fn g3ruh9600_scrambled() {
    let cfg = ChannelConfig {
        modem_type: ModemType::Scramble,
        baud: 9600,
        ..ChannelConfig::default()
    };
    let frame = Frame::from_monitor("W1ABC>APRS:>nine six hundred", true).unwrap();

    let mut m = Modulator::new(&cfg);
    let mut sink = VecSink(Vec::new());
    let mut bits = flag_bits(100);
    bits.extend(frame_bits(&frame, false));
    bits.extend(flag_bits(8));
    m.send_bits(&bits, LineCoding::Ax25, &mut sink).unwrap();

    let got = demodulate(&cfg, &sink.0);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].0, frame);
}

#[test]
fn qpsk2400() {
    let cfg = ChannelConfig { modem_type: ModemType::Qpsk, baud: 2400, ..ChannelConfig::default() };
    let frame = Frame::from_monitor("W1ABC>APRS:>phase shift", true).unwrap();

    let mut m = Modulator::new(&cfg);
    let mut sink = VecSink(Vec::new());
    let mut bits = flag_bits(60);
    bits.extend(frame_bits(&frame, false));
    bits.extend(flag_bits(8));
    m.send_bits(&bits, LineCoding::Ax25, &mut sink).unwrap();
    m.flush(&mut sink).unwrap();

    let got = demodulate(&cfg, &sink.0);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].0, frame);
}

#[test]
fn three_slicers_suppress_duplicates() {
    let cfg = ChannelConfig { num_slicers: 3, ..ChannelConfig::default() };
    let frame = Frame::from_monitor("W1ABC>APRS:>one copy only", true).unwrap();

    let mut m = Modulator::new(&cfg);
    let mut sink = VecSink(Vec::new());
    let mut bits = flag_bits(32);
    bits.extend(frame_bits(&frame, false));
    bits.extend(flag_bits(4));
    m.send_bits(&bits, LineCoding::Ax25, &mut sink).unwrap();

    // All three slicers decode the clean signal, but the demodulator
    // must deliver the frame exactly once.
    let got = demodulate(&cfg, &sink.0);
    assert_eq!(got.len(), 1);
}
