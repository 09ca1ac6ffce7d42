// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The transmit scheduler: one thread per radio channel deciding when
//! the transmitter keys up and what rides each PTT interval.
//!
//! The half-duplex loop, in order: wait for work; take the shared
//! audio-device lock; wait for DCD to clear (60 s limit, then the frame
//! is discarded with an error); DWAIT squelch recovery; p-persistence
//! slots (HIGH traffic skips the dice); PTT on; TXDELAY of flags; seize
//! confirm plus a 10 ms join window; frames, HIGH first, bundling only
//! the ordinary flavors; TXTAIL; drain the sink; sleep out any timing
//! remainder; PTT off. Digipeated, Morse, DTMF and speech frames always
//! get a PTT interval to themselves.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::{ChannelConfig, Layer2};
use crate::core::{Clock, PttControl, SampleSink, SpeechSynth, TransmitObserver};
use crate::error::{Error, Result};
use crate::fec::{fx25, il2p};
use crate::hdlc::{flag_bits, frame_bits};
use crate::modem::dcd::DcdMonitor;
use crate::modem::tx::{LineCoding, Modulator};
use crate::modem::{dtmf, morse};
use crate::protocol::Frame;
use crate::xmit::queue::{Flavor, TxQueue, TxRequest};
use crate::Chan;

/// Give up on a clear channel after this long and drop the frame.
pub const CHANNEL_BUSY_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything one channel's scheduler thread needs.
pub struct SchedulerContext {
    pub chan: Chan,
    pub cfg: ChannelConfig,
    pub queue: Arc<TxQueue>,
    pub dcd: Arc<DcdMonitor>,
    pub ptt: Arc<dyn PttControl>,
    pub clock: Arc<dyn Clock>,
    /// Transmit audio sink for this channel.
    pub sink: Arc<Mutex<Box<dyn SampleSink>>>,
    /// Shared with every channel on the same audio device.
    pub device_lock: Arc<Mutex<()>>,
    pub observers: Vec<Arc<dyn TransmitObserver>>,
    pub speech: Option<Arc<dyn SpeechSynth>>,
    /// Data-link machine notification: we own the channel, preamble is
    /// running, new frames may still join.
    pub seize_confirm: Option<crossbeam::channel::Sender<Chan>>,
    pub running: Arc<AtomicBool>,
    /// Test override for [`CHANNEL_BUSY_TIMEOUT`].
    pub busy_timeout: Duration,
}

/// Handle type; the scheduler itself is all free functions on the context.
pub struct TxScheduler;

impl TxScheduler {
    /// Start the scheduler thread for one channel.
    pub fn spawn(ctx: SchedulerContext) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(format!("htnc-xmit-{}", ctx.chan))
            .spawn(move || run(ctx))
    }
}

fn run(ctx: SchedulerContext) {
    log::info!("[TxScheduler] chan {} up ({} baud)", ctx.chan, ctx.cfg.baud);
    let mut modulator = Modulator::new(&ctx.cfg);

    while ctx.running.load(Ordering::Acquire) {
        if !ctx.queue.wait_nonempty(ctx.chan, Duration::from_millis(500)) {
            continue;
        }
        // Cross-channel exclusion: both halves of a stereo device go
        // through one lock.
        let device = ctx.device_lock.lock();

        if !ctx.cfg.fulldup {
            if let Err(e) = wait_clear_channel(&ctx) {
                if let Some(req) = ctx.queue.remove_next(ctx.chan) {
                    log::error!(
                        "[TxScheduler] {}: discarding {}",
                        e,
                        req.frame.to_monitor()
                    );
                }
                drop(device);
                continue;
            }
        }

        if let Err(e) = transmit(&ctx, &mut modulator) {
            log::error!("[TxScheduler] chan {} transmit failed: {}", ctx.chan, e);
        }
        drop(device);
    }
    log::info!("[TxScheduler] chan {} down", ctx.chan);
}

/// The channel-clear phase: DCD wait, DWAIT, p-persistence slots.
fn wait_clear_channel(ctx: &SchedulerContext) -> Result<()> {
    let slot = Duration::from_millis(u64::from(ctx.cfg.slottime) * 10);
    let dwait = Duration::from_millis(u64::from(ctx.cfg.dwait) * 10);
    let start = ctx.clock.now();

    loop {
        let waited = ctx.clock.now().saturating_sub(start);
        let remaining = ctx.busy_timeout.saturating_sub(waited);
        if remaining.is_zero() || !ctx.dcd.wait_clear(ctx.chan, remaining) {
            return Err(Error::ChannelBusyTimeout(ctx.chan));
        }
        if !dwait.is_zero() {
            ctx.clock.sleep(dwait);
            if ctx.dcd.is_asserted(ctx.chan) {
                continue;
            }
        }
        loop {
            // Digipeated traffic is time-critical; skip the dice.
            if ctx.queue.has_high(ctx.chan) {
                return Ok(());
            }
            if !slot.is_zero() {
                ctx.clock.sleep(slot);
            }
            if ctx.dcd.is_asserted(ctx.chan) {
                break;
            }
            if fastrand::u8(..) <= ctx.cfg.persist {
                return Ok(());
            }
        }
    }
}

/// One complete PTT interval.
fn transmit(ctx: &SchedulerContext, modulator: &mut Modulator) -> Result<()> {
    let mut sink_guard = ctx.sink.lock();
    let sink: &mut dyn SampleSink = &mut **sink_guard;
    let tone_first = matches!(
        ctx.queue.peek_next_flavor(ctx.chan),
        Some(Flavor::Speech | Flavor::Morse | Flavor::Dtmf)
    );

    ctx.ptt.set(ctx.chan, true);
    let t_on = ctx.clock.now();

    let result = (|| -> Result<usize> {
        let mut samples = send_idle(ctx, modulator, sink, ctx.cfg.txdelay, tone_first)?;

        if let Some(tx) = &ctx.seize_confirm {
            let _ = tx.send(ctx.chan);
        }
        // Let a frame triggered by the seize join this transmission.
        ctx.clock.sleep(Duration::from_millis(10));

        let Some(first) = ctx.queue.remove_next(ctx.chan) else {
            return Ok(samples);
        };
        let bundling = first.flavor.bundles();
        samples += render_request(ctx, modulator, sink, &first)?;
        let mut nframes = 1;

        while bundling && nframes < ctx.cfg.max_bundle {
            match ctx.queue.peek_next_flavor(ctx.chan) {
                Some(f) if f.bundles() => {
                    let Some(req) = ctx.queue.remove_next(ctx.chan) else { break };
                    samples += modulator.send_bits(&flag_bits(2), LineCoding::Ax25, sink)?;
                    samples += render_request(ctx, modulator, sink, &req)?;
                    nframes += 1;
                }
                _ => break,
            }
        }

        samples += send_idle(ctx, modulator, sink, ctx.cfg.txtail, tone_first)?;
        samples += modulator.flush(sink)?;
        Ok(samples)
    })();

    // Whatever happened above, the drain/timing/PTT-off ordering is
    // not negotiable: PTT off strictly after the sink is empty.
    let drain_result = sink.drain();
    if let Ok(samples) = result {
        let expected = Duration::from_secs_f64(samples as f64 / f64::from(ctx.cfg.sample_rate));
        let elapsed = ctx.clock.now().saturating_sub(t_on);
        if elapsed < expected {
            ctx.clock.sleep(expected - elapsed);
        } else if elapsed > expected + Duration::from_millis(100) {
            log::warn!(
                "[TxScheduler] chan {} transmit overran by {} ms",
                ctx.chan,
                (elapsed - expected).as_millis()
            );
        }
    }
    ctx.ptt.set(ctx.chan, false);

    result.and(drain_result.map(|()| ())).map(|_| ())
}

/// Preamble/postamble: flags for packet modes, a clock run for IL2P,
/// plain key-up silence ahead of tone flavors.
fn send_idle(
    ctx: &SchedulerContext,
    modulator: &mut Modulator,
    sink: &mut dyn SampleSink,
    units_10ms: u32,
    tone: bool,
) -> Result<usize> {
    let bits = (u64::from(ctx.cfg.baud) * u64::from(units_10ms) / 100).max(16) as usize;
    if tone {
        let samples =
            (u64::from(ctx.cfg.sample_rate) * u64::from(units_10ms) / 100) as usize;
        for _ in 0..samples {
            sink.put(0)?;
        }
        return Ok(samples);
    }
    match ctx.cfg.layer2 {
        Layer2::Il2p => {
            // IL2P idles on a 01 clock run rather than HDLC flags.
            let pattern: Vec<u8> = (0..bits).map(|i| (i & 1) as u8).collect();
            modulator.send_bits(&pattern, LineCoding::Raw, sink)
        }
        _ => modulator.send_bits(&flag_bits((bits / 8).max(2)), LineCoding::Ax25, sink),
    }
}

fn render_request(
    ctx: &SchedulerContext,
    modulator: &mut Modulator,
    sink: &mut dyn SampleSink,
    req: &TxRequest,
) -> Result<usize> {
    let info_text = String::from_utf8_lossy(req.frame.info()).to_string();
    let mut clips = 0u64;
    let samples = match req.flavor {
        Flavor::Speech => {
            match &ctx.speech {
                Some(synth) => synth.speak(ctx.chan, &info_text),
                None => log::warn!(
                    "[TxScheduler] chan {} SPEECH frame dropped, no synthesizer",
                    ctx.chan
                ),
            }
            0
        }
        Flavor::Morse => {
            let ssid = req.frame.destination().ssid();
            let wpm = if ssid == 0 { 10 } else { u32::from(ssid) * 2 };
            morse::render(&info_text, wpm, ctx.cfg.sample_rate, sink, &mut clips)?
        }
        Flavor::Dtmf => {
            let ssid = req.frame.destination().ssid();
            let speed = if ssid == 0 { 5 } else { u32::from(ssid).min(10) };
            dtmf::render(&info_text, speed, ctx.cfg.sample_rate, sink, &mut clips)?
        }
        Flavor::AprsDigi | Flavor::AprsNew | Flavor::Other => {
            let n = render_frame(ctx, modulator, sink, &req.frame)?;
            for o in &ctx.observers {
                o.frame_transmitted(ctx.chan, &req.frame);
            }
            log::info!("[Tx] chan {} {}", ctx.chan, req.frame.to_monitor());
            n
        }
    };
    if clips > 0 {
        log::warn!("[TxScheduler] chan {} clipped {} samples", ctx.chan, clips);
    }
    Ok(samples)
}

fn render_frame(
    ctx: &SchedulerContext,
    modulator: &mut Modulator,
    sink: &mut dyn SampleSink,
    frame: &Frame,
) -> Result<usize> {
    let corrupt = ctx.cfg.fcs_corrupt_rate > 0.0 && fastrand::f64() < ctx.cfg.fcs_corrupt_rate;
    if corrupt {
        log::warn!("[TxScheduler] chan {} transmitting deliberately bad FCS", ctx.chan);
    }
    match ctx.cfg.layer2 {
        Layer2::Ax25 => modulator.send_bits(&frame_bits(frame, corrupt), LineCoding::Ax25, sink),
        Layer2::Fx25 => match fx25::encode(frame, ctx.cfg.fx25_strength, corrupt) {
            Some(bytes) => modulator.send_bits(&bits_lsb(&bytes), LineCoding::Fx25, sink),
            None => {
                // Too big for any correlation tag; plain AX.25 still works.
                modulator.send_bits(&frame_bits(frame, corrupt), LineCoding::Ax25, sink)
            }
        },
        Layer2::Il2p => match il2p::encode(frame, ctx.cfg.il2p_max_fec, ctx.cfg.il2p_crc) {
            Some(bytes) => modulator.send_bits(&bits_msb(&bytes), LineCoding::Raw, sink),
            None => modulator.send_bits(&frame_bits(frame, corrupt), LineCoding::Ax25, sink),
        },
    }
}

fn bits_lsb(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().flat_map(|&b| (0..8).map(move |i| (b >> i) & 1)).collect()
}

fn bits_msb(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().flat_map(|&b| (0..8).rev().map(move |i| (b >> i) & 1)).collect()
}
