// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The "heard recently" station table.
//!
//! Shared by the IGate for its locality decisions: is this station
//! close enough, heard recently enough, and with few enough hops that
//! gating traffic for it makes sense? Keys are source callsign strings
//! (Internet-learned sources may be things no AX.25 address could be).
//! Entries are created on first hearing and never deleted; a concurrent
//! map gives writers fine-grained locking and readers a consistent
//! snapshot without any global lock.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::aprs::info::{classify, position_of, PacketType};
use crate::core::{ALevel, Clock};
use crate::filter::haversine_km;
use crate::protocol::Frame;
use crate::Chan;

/// Replace a larger hop count only after this much time has passed;
/// within the window the best (smallest) path wins.
const HOPS_IMPROVE_WINDOW: Duration = Duration::from_secs(15);

/// Everything known about one station.
#[derive(Debug, Clone)]
pub struct HeardStation {
    /// Total packets seen, RF and Internet combined.
    pub count: u64,
    /// Channel of the most recent RF sighting.
    pub chan: Chan,
    pub last_heard_rf: Option<Duration>,
    pub last_heard_is: Option<Duration>,
    /// Used digipeater hops on the most recent RF sighting.
    pub num_hops: u32,
    /// Last position from an actual position report. Object reports
    /// never land here: an object's coordinates say where the object
    /// is, not where its owner transmits from.
    pub position: Option<(f64, f64)>,
    /// Message-sender-position credits: how many courtesy posits may
    /// bypass the IS-to-RF filter.
    pub msp: u32,
}

impl HeardStation {
    fn new() -> Self {
        Self {
            count: 0,
            chan: 0,
            last_heard_rf: None,
            last_heard_is: None,
            num_hops: 0,
            position: None,
            msp: 0,
        }
    }
}

/// The table itself.
pub struct Mheard {
    map: DashMap<String, HeardStation>,
    clock: Arc<dyn Clock>,
}

impl Mheard {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { map: DashMap::new(), clock }
    }

    /// Record a frame heard over the radio.
    pub fn save_rf(&self, chan: Chan, frame: &Frame, alevel: ALevel, retries: usize) {
        let source = frame.source().to_text();
        let hops = used_hops(frame);
        let now = self.clock.now();

        let mut e = self.map.entry(source.clone()).or_insert_with(HeardStation::new);
        e.count += 1;
        e.chan = chan;
        // A smaller hop count is better information about how direct
        // this station is; a bigger one only counts once the last
        // sighting has gone stale.
        let stale = e
            .last_heard_rf
            .map_or(true, |t| now.saturating_sub(t) >= HOPS_IMPROVE_WINDOW);
        if hops < e.num_hops || stale || e.last_heard_rf.is_none() {
            e.num_hops = hops;
        }
        e.last_heard_rf = Some(now);

        if classify(frame.info()) == PacketType::Position {
            if let Some(p) = position_of(frame.info()) {
                e.position = Some((p.lat, p.lon));
            }
        }
        log::debug!(
            "[Mheard] rf chan {} {} hops {} level {} retries {}",
            chan,
            source,
            hops,
            alevel.to_text(),
            retries
        );
    }

    /// Record a monitor-format line received from APRS-IS. Positions
    /// are deliberately not stored: an IS-learned position must never
    /// feed decisions about what to put back on RF.
    pub fn save_is(&self, line: &str) {
        let Some((source, _)) = line.split_once('>') else {
            log::debug!("[Mheard] unparseable IS line ignored");
            return;
        };
        if source.is_empty() {
            return;
        }
        let now = self.clock.now();
        let mut e = self.map.entry(source.to_string()).or_insert_with(HeardStation::new);
        e.count += 1;
        e.last_heard_is = Some(now);
    }

    /// Stations heard over RF within `minutes` and `max_hops`.
    pub fn count(&self, max_hops: u32, minutes: u32) -> usize {
        let now = self.clock.now();
        let window = Duration::from_secs(u64::from(minutes) * 60);
        self.map
            .iter()
            .filter(|e| {
                e.num_hops <= max_hops
                    && e.last_heard_rf
                        .is_some_and(|t| now.saturating_sub(t) <= window)
            })
            .count()
    }

    /// Was `call` heard over RF recently, few enough hops away, with a
    /// known position within `km` of (lat, lon)?
    pub fn was_recently_nearby(
        &self,
        call: &str,
        minutes: u32,
        max_hops: u32,
        lat: f64,
        lon: f64,
        km: f64,
    ) -> bool {
        let now = self.clock.now();
        let window = Duration::from_secs(u64::from(minutes) * 60);
        let Some(e) = self.map.get(call) else { return false };
        let recent = e
            .last_heard_rf
            .is_some_and(|t| now.saturating_sub(t) <= window);
        let near = e
            .position
            .is_some_and(|(plat, plon)| haversine_km(lat, lon, plat, plon) <= km);
        recent && e.num_hops <= max_hops && near
    }

    pub fn get_msp(&self, call: &str) -> u32 {
        self.map.get(call).map_or(0, |e| e.msp)
    }

    pub fn set_msp(&self, call: &str, n: u32) {
        let mut e = self.map.entry(call.to_string()).or_insert_with(HeardStation::new);
        e.msp = n;
    }

    /// Spend one message-sender-position credit; returns true if one
    /// was available.
    pub fn take_msp(&self, call: &str) -> bool {
        match self.map.get_mut(call) {
            Some(mut e) if e.msp > 0 => {
                e.msp -= 1;
                true
            }
            _ => false,
        }
    }

    /// Snapshot for diagnostics, most recently RF-heard first.
    pub fn dump(&self) -> Vec<(String, HeardStation)> {
        let mut all: Vec<_> = self
            .map
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by(|a, b| b.1.last_heard_rf.cmp(&a.1.last_heard_rf));
        all
    }
}

/// Used digipeater hops, with the WIDEn-0 correction: a fully consumed
/// WIDEn in the path is a counter artifact, not a station that heard us.
fn used_hops(frame: &Frame) -> u32 {
    let mut hops = 0u32;
    for i in 2..frame.num_addrs() {
        if frame.h(i) {
            hops += 1;
            let a = frame.addr(i).map(|a| (a.call().to_string(), a.ssid()));
            if let Some((call, 0)) = a {
                if is_wide_name(&call) {
                    hops -= 1;
                }
            }
        }
    }
    hops
}

fn is_wide_name(call: &str) -> bool {
    for prefix in ["WIDE", "TRACE"] {
        if call.len() == prefix.len() + 1
            && call[..prefix.len()].eq_ignore_ascii_case(prefix)
            && call.as_bytes()[prefix.len()].is_ascii_digit()
        {
            return true;
        }
    }
    false
}
