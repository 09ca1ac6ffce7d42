// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data-carrier-detect aggregation and scheduler wakeup.
//!
//! Per channel, DCD is the logical OR of every subchannel's carrier
//! flag plus the DTMF activity flag. The transmit scheduler sleeps on a
//! condvar here instead of polling every 10 ms; demodulators signal on
//! every transition.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::Chan;

/// Bit index reserved for the DTMF activity flag.
pub const DCD_SOURCE_DTMF: usize = 31;

struct ChanDcd {
    /// One bit per source (subchannel or DTMF).
    sources: Mutex<u32>,
    /// OR of all source bits, readable without the lock.
    asserted: AtomicBool,
    cond: Condvar,
}

/// Carrier-detect state for every channel.
pub struct DcdMonitor {
    chans: Vec<ChanDcd>,
}

impl DcdMonitor {
    pub fn new(num_chans: usize) -> Self {
        Self {
            chans: (0..num_chans)
                .map(|_| ChanDcd {
                    sources: Mutex::new(0),
                    asserted: AtomicBool::new(false),
                    cond: Condvar::new(),
                })
                .collect(),
        }
    }

    /// Update one source's carrier flag. Signals waiters on any change
    /// of the aggregate.
    pub fn set(&self, chan: Chan, source: usize, on: bool) {
        let Some(c) = self.chans.get(chan) else { return };
        let mut sources = c.sources.lock();
        let before = *sources != 0;
        if on {
            *sources |= 1 << source;
        } else {
            *sources &= !(1 << source);
        }
        let after = *sources != 0;
        if before != after {
            c.asserted.store(after, Ordering::Release);
            log::debug!("[Dcd] chan {} carrier {}", chan, if after { "on" } else { "off" });
            c.cond.notify_all();
        }
    }

    pub fn is_asserted(&self, chan: Chan) -> bool {
        self.chans
            .get(chan)
            .is_some_and(|c| c.asserted.load(Ordering::Acquire))
    }

    /// Block until DCD is clear or the deadline passes. Returns true if
    /// the channel is clear.
    pub fn wait_clear(&self, chan: Chan, timeout: Duration) -> bool {
        let Some(c) = self.chans.get(chan) else { return true };
        let deadline = Instant::now() + timeout;
        let mut sources = c.sources.lock();
        while *sources != 0 {
            if c.cond.wait_until(&mut sources, deadline).timed_out() {
                return *sources == 0;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_aggregate_or() {
        let d = DcdMonitor::new(2);
        assert!(!d.is_asserted(0));
        d.set(0, 0, true);
        d.set(0, 1, true);
        assert!(d.is_asserted(0));
        assert!(!d.is_asserted(1));
        d.set(0, 0, false);
        assert!(d.is_asserted(0)); // source 1 still up
        d.set(0, 1, false);
        assert!(!d.is_asserted(0));
    }

    #[test]
    fn test_dtmf_flag_participates() {
        let d = DcdMonitor::new(1);
        d.set(0, DCD_SOURCE_DTMF, true);
        assert!(d.is_asserted(0));
        d.set(0, DCD_SOURCE_DTMF, false);
        assert!(!d.is_asserted(0));
    }

    #[test]
    fn test_wait_clear_wakes_on_transition() {
        let d = Arc::new(DcdMonitor::new(1));
        d.set(0, 0, true);
        let d2 = Arc::clone(&d);
        let h = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            d2.set(0, 0, false);
        });
        let start = Instant::now();
        assert!(d.wait_clear(0, Duration::from_secs(2)));
        assert!(start.elapsed() < Duration::from_secs(1));
        h.join().unwrap();
    }

    #[test]
    fn test_wait_clear_times_out() {
        let d = DcdMonitor::new(1);
        d.set(0, 0, true);
        assert!(!d.wait_clear(0, Duration::from_millis(10)));
    }
}
