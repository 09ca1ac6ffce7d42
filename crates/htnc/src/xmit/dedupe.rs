// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transmit duplicate suppression.
//!
//! A fixed ring of (time, dedupe CRC, channel) triples. The CRC covers
//! source, destination and info only, so the same logical packet heard
//! again through a different repeater path still matches. Entries age
//! out after the TTL (default 30 s); when the ring is full the oldest
//! entry is overwritten, which is fine because anything that old is far
//! outside any sane window anyway.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{Clock, TransmitObserver};
use crate::protocol::Frame;
use crate::Chan;

/// Ring capacity. At APRS rates even a busy channel cycles well inside
/// the TTL.
const SLOTS: usize = 64;

#[derive(Debug, Clone, Copy)]
struct Entry {
    time: Duration,
    crc: u16,
    chan: Chan,
}

/// Time-windowed set of recently transmitted packets.
pub struct Dedupe {
    entries: Mutex<(Vec<Entry>, usize)>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl Dedupe {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { entries: Mutex::new((Vec::with_capacity(SLOTS), 0)), ttl, clock }
    }

    /// Record that `frame` went (or is about to go) out on `chan`.
    pub fn remember(&self, frame: &Frame, chan: Chan) {
        let entry = Entry { time: self.clock.now(), crc: frame.dedupe_crc(), chan };
        let mut guard = self.entries.lock();
        let (ring, next) = &mut *guard;
        if ring.len() < SLOTS {
            ring.push(entry);
        } else {
            ring[*next] = entry;
            *next = (*next + 1) % SLOTS;
        }
    }

    /// Was an identical packet sent on `chan` within the TTL?
    pub fn check(&self, frame: &Frame, chan: Chan) -> bool {
        let now = self.clock.now();
        let crc = frame.dedupe_crc();
        let guard = self.entries.lock();
        guard.0.iter().any(|e| {
            e.crc == crc && e.chan == chan && now.saturating_sub(e.time) <= self.ttl
        })
    }
}

impl TransmitObserver for Dedupe {
    fn frame_transmitted(&self, chan: Chan, frame: &Frame) {
        self.remember(frame, chan);
    }
}
