// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scheduled transmissions: position, object, tracker, custom and
//! IGate-statistics beacons.
//!
//! Descriptors are validated once at startup; a descriptor missing what
//! its type requires is downgraded to IGNORE with an error log and the
//! rest of the system comes up anyway. The scheduler thread runs on the
//! monotonic clock; only slotted beacons (a fixed second past each
//! hour) consult the wall clock, through `chrono`, at the moment the
//! next fire time is computed.

pub mod smart;

pub use smart::SmartBeaconConfig;

use chrono::{Timelike, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::aprs::encode::{ObjectReport, PositionReport};
use crate::core::{ALevel, Clock, FrameSink, GpsSource};
use crate::igate::Igate;
use crate::mheard::Mheard;
use crate::protocol::Frame;
use crate::xmit::queue::{Priority, TxQueue, TxRequest};
use crate::Chan;

/// What a beacon descriptor announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconKind {
    /// Fixed-station position report.
    Position,
    /// Object report (something other than this station).
    Object,
    /// GPS tracker position, SmartBeaconing-capable.
    Tracker,
    /// Literal info text.
    Custom,
    /// IGate statistics report.
    Igate,
    /// Disabled (validation failures land here).
    Ignore,
}

/// Where a beacon goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTo {
    /// Transmit queue of a radio channel.
    Radio(Chan),
    /// Straight to APRS-IS, never RF.
    Igate,
    /// Simulated reception on a channel (loopback for testing).
    Recv(Chan),
}

/// One beacon descriptor.
#[derive(Debug, Clone)]
pub struct BeaconConfig {
    pub kind: BeaconKind,
    pub sendto: SendTo,
    /// Interval between transmissions.
    pub every: Duration,
    /// Fixed second past each hour instead of free-running. Must
    /// divide 3600; rounded to the nearest divisor otherwise.
    pub slot: Option<u32>,
    /// Delay before the first transmission.
    pub delay: Duration,
    /// Source callsign; empty means the channel's (or IGate's) own.
    pub source: String,
    /// Destination tocall; empty means the application default.
    pub dest: String,
    pub via: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt_ft: Option<i32>,
    pub symbol_table: char,
    pub symbol: char,
    pub power: Option<u32>,
    pub height: Option<u32>,
    pub gain: Option<u32>,
    pub dir: Option<String>,
    pub freq_mhz: Option<f64>,
    pub tone_hz: Option<f64>,
    pub offset_khz: Option<i32>,
    pub comment: String,
    pub compress: bool,
    pub messaging: bool,
    pub objname: Option<String>,
    /// CUSTOM beacons: the literal info field.
    pub info: Option<String>,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            kind: BeaconKind::Ignore,
            sendto: SendTo::Radio(0),
            every: Duration::from_secs(600),
            slot: None,
            delay: Duration::from_secs(60),
            source: String::new(),
            dest: String::new(),
            via: None,
            lat: None,
            lon: None,
            alt_ft: None,
            symbol_table: '/',
            symbol: '-',
            power: None,
            height: None,
            gain: None,
            dir: None,
            freq_mhz: None,
            tone_hz: None,
            offset_khz: None,
            comment: String::new(),
            compress: false,
            messaging: false,
            objname: None,
            info: None,
        }
    }
}

/// Validate descriptors, downgrading the broken ones to IGNORE.
pub fn validate(beacons: &mut [BeaconConfig], has_gps: bool, has_igate: bool) {
    for (i, b) in beacons.iter_mut().enumerate() {
        let fail = |b: &mut BeaconConfig, why: &str| {
            log::error!("[Beacon] descriptor {} disabled: {}", i, why);
            b.kind = BeaconKind::Ignore;
        };
        match b.kind {
            BeaconKind::Position => {
                if b.lat.is_none() || b.lon.is_none() {
                    fail(b, "POSITION requires lat and lon");
                }
            }
            BeaconKind::Object => {
                if b.objname.is_none() {
                    fail(b, "OBJECT requires objname");
                } else if b.lat.is_none() || b.lon.is_none() {
                    fail(b, "OBJECT requires lat and lon");
                }
            }
            BeaconKind::Tracker => {
                if !has_gps {
                    fail(b, "TBEACON requires a configured GPS");
                }
            }
            BeaconKind::Custom => {
                if b.info.is_none() {
                    fail(b, "CUSTOM requires INFO or INFOCMD");
                }
            }
            BeaconKind::Igate => {
                if !has_igate {
                    fail(b, "IBEACON requires a configured APRS-IS connection");
                }
            }
            BeaconKind::Ignore => {}
        }
        if let Some(slot) = b.slot {
            let every = b.every.as_secs().max(1) as u32;
            if 3600 % every != 0 {
                let rounded = nearest_divisor_of_3600(every);
                log::warn!(
                    "[Beacon] descriptor {}: every {} does not divide 3600, using {}",
                    i,
                    every,
                    rounded
                );
                b.every = Duration::from_secs(u64::from(rounded));
            }
            if slot >= 3600 {
                fail(b, "slot must be below 3600 seconds");
            }
        }
    }
}

fn nearest_divisor_of_3600(n: u32) -> u32 {
    (1u32..=3600)
        .filter(|d| 3600 % d == 0)
        .min_by_key(|d| d.abs_diff(n))
        .unwrap_or(3600)
}

/// Seconds until the next occurrence of `slot` seconds past the hour on
/// an `every` cadence.
fn next_slot_delay(every: Duration, slot: u32) -> Duration {
    let past_hour = {
        let now = Utc::now();
        now.minute() * 60 + now.second()
    };
    let every = every.as_secs().max(1) as u32;
    let mut t = slot % every;
    while t <= past_hour {
        t += every;
    }
    Duration::from_secs(u64::from(t - past_hour))
}

// ============================================================================
// Scheduler
// ============================================================================

/// Collaborators the beacon thread needs.
pub struct BeaconContext {
    pub beacons: Vec<BeaconConfig>,
    pub smart: Option<SmartBeaconConfig>,
    pub mycalls: Vec<String>,
    pub queue: Arc<TxQueue>,
    pub igate: Option<Arc<Igate>>,
    pub mheard: Option<Arc<Mheard>>,
    pub gps: Option<Arc<dyn GpsSource>>,
    pub recv_sink: Option<Arc<dyn FrameSink>>,
    pub clock: Arc<dyn Clock>,
    pub running: Arc<AtomicBool>,
}

struct BeaconState {
    cfg: BeaconConfig,
    next: Duration,
    last_fire: Duration,
    prev_course: Option<f64>,
}

/// Start the beacon thread.
pub fn spawn(mut ctx: BeaconContext) -> std::io::Result<JoinHandle<()>> {
    validate(&mut ctx.beacons, ctx.gps.is_some(), ctx.igate.is_some());
    std::thread::Builder::new()
        .name("htnc-beacon".to_string())
        .spawn(move || run(ctx))
}

fn run(ctx: BeaconContext) {
    let now = ctx.clock.now();
    let mut states: Vec<BeaconState> = ctx
        .beacons
        .iter()
        .filter(|b| b.kind != BeaconKind::Ignore)
        .map(|b| BeaconState {
            next: now
                + match b.slot {
                    Some(slot) => next_slot_delay(b.every, slot),
                    None => b.delay,
                },
            last_fire: Duration::ZERO,
            prev_course: None,
            cfg: b.clone(),
        })
        .collect();
    if states.is_empty() {
        log::info!("[Beacon] nothing to do");
        return;
    }
    log::info!("[Beacon] scheduler up with {} descriptors", states.len());
    let has_tracker = states.iter().any(|s| s.cfg.kind == BeaconKind::Tracker);

    while ctx.running.load(Ordering::Acquire) {
        let now = ctx.clock.now();
        let mut earliest = states.iter().map(|s| s.next).min().unwrap_or(now);
        if has_tracker && ctx.smart.is_some() {
            // Corner pegging needs to see the course between beacons.
            earliest = earliest.min(now + Duration::from_secs(1));
        }
        if earliest > now {
            ctx.clock.sleep((earliest - now).min(Duration::from_millis(500)));
            if ctx.clock.now() < earliest {
                continue;
            }
        }

        let now = ctx.clock.now();
        let fix = if has_tracker { ctx.gps.as_ref().and_then(|g| g.fix()) } else { None };

        for s in &mut states {
            let mut due = s.next <= now;

            if s.cfg.kind == BeaconKind::Tracker {
                if let (Some(smart), Some(fix)) = (&ctx.smart, fix) {
                    let mph = fix.speed_knots * 1.15078;
                    if let Some(prev) = s.prev_course {
                        let change = smart::heading_change(prev, fix.course);
                        if smart.corner_peg(mph, change, now.saturating_sub(s.last_fire)) {
                            log::debug!("[Beacon] corner peg at {:.0} degrees", change);
                            due = true;
                        }
                    }
                    s.next = s.next.min(s.last_fire + smart.rate(mph));
                    due |= s.next <= now;
                }
            }
            if !due {
                continue;
            }

            if fire(&ctx, &s.cfg, fix.as_ref()) {
                s.last_fire = now;
                s.prev_course = fix.map(|f| f.course);
            }
            s.next = now
                + match s.cfg.slot {
                    Some(slot) => next_slot_delay(s.cfg.every, slot),
                    None => s.cfg.every,
                };
        }
    }
    log::info!("[Beacon] scheduler down");
}

/// Build and dispatch one beacon. Returns true when something was sent.
fn fire(ctx: &BeaconContext, cfg: &BeaconConfig, fix: Option<&crate::core::GpsFix>) -> bool {
    let Some(frame) = build_frame(ctx, cfg, fix) else { return false };
    match cfg.sendto {
        SendTo::Radio(chan) => {
            ctx.queue.append(chan, Priority::Low, TxRequest::new(frame));
        }
        SendTo::Igate => {
            if let Some(ig) = &ctx.igate {
                ig.send_rec_packet(None, &frame);
            }
        }
        SendTo::Recv(chan) => {
            if let Some(sink) = &ctx.recv_sink {
                sink.deliver(chan, 0, 0, &frame, ALevel::default());
            }
        }
    }
    true
}

/// Build the monitor text for one beacon and parse it into a frame.
pub fn build_frame(
    ctx: &BeaconContext,
    cfg: &BeaconConfig,
    fix: Option<&crate::core::GpsFix>,
) -> Option<Frame> {
    let info = match cfg.kind {
        BeaconKind::Position => position_report(cfg, None).encode(),
        BeaconKind::Tracker => {
            let fix = fix?;
            position_report(cfg, Some(fix)).encode()
        }
        BeaconKind::Object => ObjectReport {
            name: cfg.objname.clone().unwrap_or_default(),
            live: true,
            time_dhm: Utc::now().format("%d%H%M").to_string(),
            position: position_report(cfg, None),
        }
        .encode(),
        BeaconKind::Custom => cfg.info.clone().unwrap_or_default(),
        BeaconKind::Igate => igate_stats_info(ctx),
        BeaconKind::Ignore => return None,
    };

    let source = if cfg.source.is_empty() {
        match cfg.sendto {
            SendTo::Radio(chan) | SendTo::Recv(chan) => ctx.mycalls.get(chan)?.clone(),
            SendTo::Igate => ctx.igate.as_ref()?.cfg.login_call.clone(),
        }
    } else {
        cfg.source.clone()
    };
    let dest = if cfg.dest.is_empty() { crate::app_tocall() } else { cfg.dest.clone() };
    let path = match &cfg.via {
        Some(via) => format!("{}>{},{}:", source, dest, via),
        None => format!("{}>{}:", source, dest),
    };
    let mut text = path.into_bytes();
    text.extend_from_slice(info.as_bytes());
    match Frame::from_monitor_bytes(&text, true) {
        Ok(f) => Some(f),
        Err(e) => {
            log::error!("[Beacon] cannot build frame: {}", e);
            None
        }
    }
}

fn position_report(cfg: &BeaconConfig, fix: Option<&crate::core::GpsFix>) -> PositionReport {
    let (lat, lon, course, speed, alt) = match fix {
        Some(f) => (
            f.lat,
            f.lon,
            Some(f.course.round() as u32 % 360),
            Some(f.speed_knots.round() as u32),
            Some((f.alt_m * 3.28084).round() as i32),
        ),
        None => (cfg.lat.unwrap_or(0.0), cfg.lon.unwrap_or(0.0), None, None, cfg.alt_ft),
    };
    PositionReport {
        messaging: cfg.messaging,
        compressed: cfg.compress,
        lat,
        lon,
        symbol_table: cfg.symbol_table,
        symbol: cfg.symbol,
        power: cfg.power,
        height: cfg.height,
        gain: cfg.gain,
        dir: cfg.dir.clone(),
        course,
        speed_knots: speed,
        freq_mhz: cfg.freq_mhz,
        tone_hz: cfg.tone_hz,
        offset_khz: cfg.offset_khz,
        alt_ft: alt,
        comment: cfg.comment.clone(),
        ..PositionReport::default()
    }
}

fn igate_stats_info(ctx: &BeaconContext) -> String {
    let (up, down) = ctx.igate.as_ref().map(|ig| ig.stats()).unwrap_or((0, 0));
    let (dir_cnt, loc_cnt) = match &ctx.mheard {
        Some(m) => (m.count(0, 60), m.count(2, 60)),
        None => (0, 0),
    };
    format!(
        "<IGATE,UPL_CNT={},DNL_CNT={},DIR_CNT={},LOC_CNT={}",
        up, down, dir_cnt, loc_cnt
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GpsFix, SystemClock};

    fn ctx(beacons: Vec<BeaconConfig>) -> BeaconContext {
        BeaconContext {
            beacons,
            smart: None,
            mycalls: vec!["N0CALL-1".into()],
            queue: Arc::new(TxQueue::new(1)),
            igate: None,
            mheard: None,
            gps: None,
            recv_sink: None,
            clock: Arc::new(SystemClock::new()),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    #[test]
    fn test_validation_downgrades() {
        let mut beacons = vec![
            BeaconConfig { kind: BeaconKind::Position, ..BeaconConfig::default() },
            BeaconConfig { kind: BeaconKind::Object, objname: Some("X".into()), ..BeaconConfig::default() },
            BeaconConfig { kind: BeaconKind::Tracker, ..BeaconConfig::default() },
            BeaconConfig { kind: BeaconKind::Custom, ..BeaconConfig::default() },
            BeaconConfig { kind: BeaconKind::Igate, ..BeaconConfig::default() },
        ];
        validate(&mut beacons, false, false);
        assert!(beacons.iter().all(|b| b.kind == BeaconKind::Ignore));

        let mut good = vec![BeaconConfig {
            kind: BeaconKind::Position,
            lat: Some(42.0),
            lon: Some(-71.0),
            ..BeaconConfig::default()
        }];
        validate(&mut good, false, false);
        assert_eq!(good[0].kind, BeaconKind::Position);
    }

    #[test]
    fn test_slot_rounds_to_divisor() {
        let mut beacons = vec![BeaconConfig {
            kind: BeaconKind::Custom,
            info: Some(">x".into()),
            every: Duration::from_secs(700),
            slot: Some(15),
            ..BeaconConfig::default()
        }];
        validate(&mut beacons, false, false);
        assert_eq!(beacons[0].every, Duration::from_secs(720));
        assert_eq!(beacons[0].kind, BeaconKind::Custom);
    }

    #[test]
    fn test_nearest_divisor() {
        assert_eq!(nearest_divisor_of_3600(600), 600);
        assert_eq!(nearest_divisor_of_3600(700), 720);
        assert_eq!(nearest_divisor_of_3600(7), 6);
    }

    #[test]
    fn test_build_position_frame() {
        let c = ctx(vec![]);
        let cfg = BeaconConfig {
            kind: BeaconKind::Position,
            lat: Some(42.61900),
            lon: Some(-71.34717),
            symbol: '>',
            comment: "hi".into(),
            via: Some("WIDE2-1".into()),
            ..BeaconConfig::default()
        };
        let f = build_frame(&c, &cfg, None).unwrap();
        assert_eq!(f.to_monitor(), "N0CALL-1>APDW18,WIDE2-1:!4237.14N/07120.83W>hi");
    }

    #[test]
    fn test_build_tracker_needs_fix() {
        let c = ctx(vec![]);
        let cfg = BeaconConfig { kind: BeaconKind::Tracker, ..BeaconConfig::default() };
        assert!(build_frame(&c, &cfg, None).is_none());
        let fix = GpsFix { lat: 42.0, lon: -71.0, speed_knots: 10.0, course: 90.0, alt_m: 100.0 };
        let f = build_frame(&c, &cfg, Some(&fix)).unwrap();
        assert!(f.to_monitor().contains("090/010"));
        assert!(f.to_monitor().contains("/A=000328"));
    }

    #[test]
    fn test_custom_and_object() {
        let c = ctx(vec![]);
        let custom = BeaconConfig {
            kind: BeaconKind::Custom,
            info: Some(">raw text".into()),
            ..BeaconConfig::default()
        };
        assert_eq!(build_frame(&c, &custom, None).unwrap().info(), b">raw text");

        let obj = BeaconConfig {
            kind: BeaconKind::Object,
            objname: Some("REPEATER".into()),
            lat: Some(42.0),
            lon: Some(-71.0),
            ..BeaconConfig::default()
        };
        let f = build_frame(&c, &obj, None).unwrap();
        assert!(f.info().starts_with(b";REPEATER *"));
    }

    #[test]
    fn test_scheduler_fires_into_queue() {
        let mut c = ctx(vec![BeaconConfig {
            kind: BeaconKind::Custom,
            info: Some(">tick".into()),
            delay: Duration::from_millis(50),
            every: Duration::from_secs(3600),
            ..BeaconConfig::default()
        }]);
        let queue = Arc::clone(&c.queue);
        let running = Arc::clone(&c.running);
        c.beacons[0].sendto = SendTo::Radio(0);
        let handle = spawn(c).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while queue.is_empty(0) {
            assert!(std::time::Instant::now() < deadline, "beacon never fired");
            std::thread::sleep(Duration::from_millis(10));
        }
        running.store(false, Ordering::Release);
        handle.join().unwrap();
        let req = queue.remove(0, Priority::Low).unwrap();
        assert_eq!(req.frame.info(), b">tick");
    }
}
