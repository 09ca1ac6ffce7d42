// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The engine: one struct owning every per-channel subsystem.
//!
//! There is no global state anywhere in this crate; the [`Engine`] is
//! the single root. Construction wires the receive dispatch (demodulator
//! output fanning out to the digipeaters, the IGate, the heard-stations
//! table, the activity log and the application), spawns the transmit
//! scheduler threads, the beacon thread and the IGate client, and hands
//! back handles. Dropping or stopping the engine winds it all down.
//!
//! ```text
//!   audio in -> Demodulator -> RxDispatcher -> ApsrDigipeater -> TxQueue
//!                                |-> ConnDigipeater -> TxQueue
//!                                |-> IGate (RF->IS)
//!                                |-> Mheard / ActivityLog
//!                                `-> application FrameSink
//!   TxQueue -> TxScheduler -> Modulator -> SampleSink (+ PTT)
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::beacon::{self, BeaconContext};
use crate::config::EngineConfig;
use crate::core::{
    ALevel, Clock, FrameSink, GpsSource, NullPtt, PttControl, SampleSink, SpeechSynth,
    SystemClock, TransmitObserver,
};
use crate::digipeater::{AprsDigipeater, ConnDigipeater};
use crate::error::Result;
use crate::igate::{client as igate_client, Igate};
use crate::logging::ActivityLog;
use crate::mheard::Mheard;
use crate::modem::{DcdMonitor, DemodOutput, Demodulator};
use crate::protocol::Frame;
use crate::xmit::{Dedupe, SchedulerContext, TxQueue, TxScheduler};
use crate::Chan;

/// Receive-side fan-out shared by the demodulators, the beacon
/// loopback target and the IGate virtual channel.
pub(crate) struct RxDispatcher {
    mheard: Arc<Mheard>,
    digi: AprsDigipeater,
    cdigi: ConnDigipeater,
    igate: Option<Arc<Igate>>,
    activity: Option<ActivityLog>,
    app: Mutex<Option<Arc<dyn FrameSink>>>,
}

impl RxDispatcher {
    fn dispatch(&self, chan: Chan, subchan: usize, slicer: usize, frame: &Frame, alevel: ALevel) {
        log::info!(
            "[Rx] chan {}.{}.{} {}",
            chan,
            subchan,
            slicer,
            frame.to_monitor()
        );
        self.mheard.save_rf(chan, frame, alevel, 0);
        if let Some(log) = &self.activity {
            if let Err(e) = log.log(chan, frame, alevel, 0) {
                log::error!("[Engine] activity log write failed: {}", e);
            }
        }

        if frame.is_aprs() {
            self.digi.process(chan, frame);
            if let Some(ig) = &self.igate {
                ig.send_rec_packet(Some(chan), frame);
            }
        } else {
            self.cdigi.process(chan, frame);
        }

        if let Some(app) = self.app.lock().clone() {
            app.deliver(chan, subchan, slicer, frame, alevel);
        }
    }
}

impl FrameSink for RxDispatcher {
    fn deliver(&self, chan: Chan, subchan: usize, slicer: usize, frame: &Frame, alevel: ALevel) {
        self.dispatch(chan, subchan, slicer, frame, alevel);
    }
}

/// Builder for [`Engine`]. Collaborators default to inert stand-ins so
/// a receive-only or test engine needs nothing external.
pub struct EngineBuilder {
    cfg: EngineConfig,
    ptt: Arc<dyn PttControl>,
    clock: Arc<dyn Clock>,
    gps: Option<Arc<dyn GpsSource>>,
    speech: Option<Arc<dyn SpeechSynth>>,
    app: Option<Arc<dyn FrameSink>>,
    sinks: HashMap<Chan, Box<dyn SampleSink>>,
}

impl EngineBuilder {
    pub fn ptt(mut self, ptt: Arc<dyn PttControl>) -> Self {
        self.ptt = ptt;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn gps(mut self, gps: Arc<dyn GpsSource>) -> Self {
        self.gps = Some(gps);
        self
    }

    pub fn speech(mut self, speech: Arc<dyn SpeechSynth>) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Application delivery (the KISS server side).
    pub fn frame_sink(mut self, sink: Arc<dyn FrameSink>) -> Self {
        self.app = Some(sink);
        self
    }

    /// Transmit audio sink for one channel.
    pub fn sample_sink(mut self, chan: Chan, sink: Box<dyn SampleSink>) -> Self {
        self.sinks.insert(chan, sink);
        self
    }

    pub fn build(self) -> Result<Engine> {
        Engine::start(self)
    }
}

/// The assembled TNC engine.
pub struct Engine {
    cfg: EngineConfig,
    running: Arc<AtomicBool>,
    queue: Arc<TxQueue>,
    dcd: Arc<DcdMonitor>,
    dedupe: Arc<Dedupe>,
    mheard: Arc<Mheard>,
    igate: Option<Arc<Igate>>,
    dispatcher: Arc<RxDispatcher>,
    demodulators: Vec<Mutex<Demodulator>>,
    handles: Vec<JoinHandle<()>>,
}

impl Engine {
    pub fn builder(cfg: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            cfg,
            ptt: Arc::new(NullPtt),
            clock: Arc::new(SystemClock::new()),
            gps: None,
            speech: None,
            app: None,
            sinks: HashMap::new(),
        }
    }

    fn start(mut b: EngineBuilder) -> Result<Engine> {
        let nchans = b.cfg.chans.len();
        let running = Arc::new(AtomicBool::new(true));
        let clock = Arc::clone(&b.clock);
        let queue = Arc::new(TxQueue::new(nchans));
        let dcd = Arc::new(DcdMonitor::new(nchans));
        let dedupe = Arc::new(Dedupe::new(b.cfg.dedupe_ttl(), Arc::clone(&clock)));
        let mheard = Arc::new(Mheard::new(Arc::clone(&clock)));
        let mycalls: Vec<String> = b.cfg.chans.iter().map(|c| c.mycall.clone()).collect();

        let igate = match b.cfg.igate.clone() {
            Some(cfg) => Some(Arc::new(Igate::new(
                cfg,
                Arc::clone(&clock),
                Arc::clone(&mheard),
                Arc::clone(&queue),
            )?)),
            None => None,
        };

        let digi = AprsDigipeater::new(
            b.cfg.digi.clone(),
            mycalls.clone(),
            Arc::clone(&dedupe),
            Arc::clone(&queue),
        )?;
        let cdigi = ConnDigipeater::new(b.cfg.cdigi.clone(), mycalls.clone(), Arc::clone(&queue))?;
        let activity = b.cfg.log_dir.as_ref().map(|p| ActivityLog::new(p, b.cfg.log_daily));

        let dispatcher = Arc::new(RxDispatcher {
            mheard: Arc::clone(&mheard),
            digi,
            cdigi,
            igate: igate.clone(),
            activity,
            app: Mutex::new(b.app.take()),
        });

        // Per-channel demodulators.
        let demodulators = b
            .cfg
            .chans
            .iter()
            .enumerate()
            .map(|(chan, ccfg)| {
                Mutex::new(Demodulator::new(
                    chan,
                    ccfg,
                    Arc::clone(&dcd),
                    b.cfg.retry,
                    b.cfg.sanity,
                ))
            })
            .collect();

        // Transmit observers: the dedupe window and, when gating, the
        // IGate IG->TX history.
        let mut observers: Vec<Arc<dyn TransmitObserver>> =
            vec![Arc::clone(&dedupe) as Arc<dyn TransmitObserver>];
        if let Some(ig) = &igate {
            observers.push(Arc::clone(ig) as Arc<dyn TransmitObserver>);
        }

        // One scheduler thread per channel, one lock per audio device.
        let mut handles = Vec::new();
        let mut device_locks: HashMap<usize, Arc<Mutex<()>>> = HashMap::new();
        for (chan, ccfg) in b.cfg.chans.iter().enumerate() {
            let device_lock = Arc::clone(
                device_locks
                    .entry(ccfg.audio_device)
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            );
            let sink: Box<dyn SampleSink> =
                b.sinks.remove(&chan).unwrap_or_else(|| Box::new(DiscardSink));
            let ctx = SchedulerContext {
                chan,
                cfg: ccfg.clone(),
                queue: Arc::clone(&queue),
                dcd: Arc::clone(&dcd),
                ptt: Arc::clone(&b.ptt),
                clock: Arc::clone(&clock),
                sink: Arc::new(Mutex::new(sink)),
                device_lock,
                observers: observers.clone(),
                speech: b.speech.clone(),
                seize_confirm: None,
                running: Arc::clone(&running),
                busy_timeout: crate::xmit::scheduler::CHANNEL_BUSY_TIMEOUT,
            };
            handles.push(TxScheduler::spawn(ctx)?);
        }

        // Beacons.
        if !b.cfg.beacons.is_empty() {
            let ctx = BeaconContext {
                beacons: b.cfg.beacons.clone(),
                smart: b.cfg.smart_beaconing.clone(),
                mycalls,
                queue: Arc::clone(&queue),
                igate: igate.clone(),
                mheard: Some(Arc::clone(&mheard)),
                gps: b.gps.clone(),
                recv_sink: Some(Arc::clone(&dispatcher) as Arc<dyn FrameSink>),
                clock: Arc::clone(&clock),
                running: Arc::clone(&running),
            };
            handles.push(beacon::spawn(ctx)?);
        }

        // IGate client threads.
        if let Some(ig) = &igate {
            ig.set_ichannel_sink(Arc::clone(&dispatcher) as Arc<dyn FrameSink>);
            handles.extend(igate_client::spawn(Arc::clone(ig))?);
        }

        log::info!("[Engine] up with {} channels", nchans);
        Ok(Engine {
            cfg: b.cfg,
            running,
            queue,
            dcd,
            dedupe,
            mheard,
            igate,
            dispatcher,
            demodulators,
            handles,
        })
    }

    // ========================================================================
    // Receive path entry points
    // ========================================================================

    /// Feed received audio for one channel; called from the audio
    /// collaborator's sample-processing task.
    pub fn process_samples(&self, chan: Chan, samples: &[i16]) {
        let Some(demod) = self.demodulators.get(chan) else { return };
        let output: DemodOutput = demod.lock().process(samples);
        for rx in output.frames {
            self.dispatcher
                .dispatch(rx.chan, rx.subchan, rx.slicer, &rx.frame, rx.alevel);
        }
        for button in output.buttons {
            log::info!("[Engine] chan {} DTMF {}", chan, button);
        }
    }

    /// Inject a frame as if it had been received on `chan` (loopback
    /// and testing).
    pub fn simulate_receive(&self, chan: Chan, frame: &Frame) {
        self.dispatcher.dispatch(chan, 0, 0, frame, ALevel::default());
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn queue(&self) -> &Arc<TxQueue> {
        &self.queue
    }

    pub fn dcd(&self) -> &Arc<DcdMonitor> {
        &self.dcd
    }

    pub fn dedupe(&self) -> &Arc<Dedupe> {
        &self.dedupe
    }

    pub fn mheard(&self) -> &Arc<Mheard> {
        &self.mheard
    }

    pub fn igate(&self) -> Option<&Arc<Igate>> {
        self.igate.as_ref()
    }

    /// Stop every worker thread and wait for them.
    pub fn shutdown(mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(ig) = &self.igate {
            ig.shutdown();
        }
        for h in self.handles.drain(..) {
            let _ = h.join();
        }
        log::info!("[Engine] down");
    }
}

/// Stand-in sink for channels without a configured audio device.
struct DiscardSink;

impl SampleSink for DiscardSink {
    fn put(&mut self, _sample: i16) -> Result<()> {
        Ok(())
    }
    fn drain(&mut self) -> Result<()> {
        Ok(())
    }
}
