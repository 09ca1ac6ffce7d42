// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-channel two-priority transmit queues.
//!
//! HIGH carries digipeated and otherwise expedited frames; everything
//! else rides LOW. Producers append from any thread; only the channel's
//! scheduler consumes. The flavor tag is assigned here, at enqueue time,
//! so the scheduler never re-parses destination callsigns mid-loop.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

use crate::protocol::Frame;
use crate::Chan;

/// Transmit priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Low,
}

/// What kind of transmission a frame requests, decided at enqueue.
///
/// The special flavors are never bundled with anything else in one
/// PTT interval; digipeated frames in particular always go out alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// Reserved destination "SPEECH": synthesized voice.
    Speech,
    /// Reserved destination "MORSE": CW at (dest SSID x 2) WPM.
    Morse,
    /// Reserved destination "DTMF": tone pad at (dest SSID) buttons/s.
    Dtmf,
    /// A frame we are digipeating (first repeater already marked used).
    AprsDigi,
    /// A UI/APRS frame originated here.
    AprsNew,
    /// Connected-mode and anything else.
    Other,
}

impl Flavor {
    /// Inspect the destination and path the way the transmit side
    /// expects them.
    pub fn classify(frame: &Frame) -> Flavor {
        match frame.destination().call() {
            "SPEECH" => Flavor::Speech,
            "MORSE" => Flavor::Morse,
            "DTMF" => Flavor::Dtmf,
            _ => {
                if frame.num_repeaters() > 0 && frame.h(2) {
                    Flavor::AprsDigi
                } else if frame.is_aprs() {
                    Flavor::AprsNew
                } else {
                    Flavor::Other
                }
            }
        }
    }

    /// May this flavor share a PTT interval with another frame?
    pub fn bundles(self) -> bool {
        matches!(self, Flavor::AprsNew | Flavor::Other)
    }
}

/// One queued transmission.
#[derive(Debug, Clone)]
pub struct TxRequest {
    pub frame: Frame,
    pub flavor: Flavor,
}

impl TxRequest {
    pub fn new(frame: Frame) -> Self {
        let flavor = Flavor::classify(&frame);
        Self { frame, flavor }
    }
}

struct ChanQueue {
    /// [HIGH, LOW].
    fifos: Mutex<[VecDeque<TxRequest>; 2]>,
    cond: Condvar,
}

/// All channels' transmit queues.
pub struct TxQueue {
    chans: Vec<ChanQueue>,
}

impl TxQueue {
    pub fn new(num_chans: usize) -> Self {
        Self {
            chans: (0..num_chans)
                .map(|_| ChanQueue { fifos: Mutex::new([VecDeque::new(), VecDeque::new()]), cond: Condvar::new() })
                .collect(),
        }
    }

    fn idx(prio: Priority) -> usize {
        match prio {
            Priority::High => 0,
            Priority::Low => 1,
        }
    }

    /// Enqueue and wake the channel's scheduler.
    pub fn append(&self, chan: Chan, prio: Priority, req: TxRequest) {
        let Some(c) = self.chans.get(chan) else {
            log::error!("[TxQueue] append to nonexistent channel {}", chan);
            return;
        };
        log::debug!(
            "[TxQueue] chan {} {:?} {:?} {}",
            chan,
            prio,
            req.flavor,
            req.frame.format_addresses()
        );
        c.fifos.lock()[Self::idx(prio)].push_back(req);
        c.cond.notify_all();
    }

    /// Non-destructive look at the head of one priority queue.
    pub fn peek_flavor(&self, chan: Chan, prio: Priority) -> Option<Flavor> {
        let c = self.chans.get(chan)?;
        let fifos = c.fifos.lock();
        fifos[Self::idx(prio)].front().map(|r| r.flavor)
    }

    /// Pop from one priority queue.
    pub fn remove(&self, chan: Chan, prio: Priority) -> Option<TxRequest> {
        let c = self.chans.get(chan)?;
        c.fifos.lock()[Self::idx(prio)].pop_front()
    }

    /// Pop the next frame, HIGH before LOW.
    pub fn remove_next(&self, chan: Chan) -> Option<TxRequest> {
        let c = self.chans.get(chan)?;
        let mut fifos = c.fifos.lock();
        fifos[0].pop_front().or_else(|| fifos[1].pop_front())
    }

    /// Head flavor considering both priorities, HIGH first.
    pub fn peek_next_flavor(&self, chan: Chan) -> Option<Flavor> {
        let c = self.chans.get(chan)?;
        let fifos = c.fifos.lock();
        fifos[0].front().or_else(|| fifos[1].front()).map(|r| r.flavor)
    }

    pub fn has_high(&self, chan: Chan) -> bool {
        self.chans
            .get(chan)
            .is_some_and(|c| !c.fifos.lock()[0].is_empty())
    }

    pub fn len(&self, chan: Chan) -> usize {
        self.chans
            .get(chan)
            .map_or(0, |c| c.fifos.lock().iter().map(VecDeque::len).sum())
    }

    pub fn is_empty(&self, chan: Chan) -> bool {
        self.len(chan) == 0
    }

    /// Block until the channel has work or the timeout passes. Returns
    /// true when work is available.
    pub fn wait_nonempty(&self, chan: Chan, timeout: Duration) -> bool {
        let Some(c) = self.chans.get(chan) else { return false };
        let mut fifos = c.fifos.lock();
        if fifos.iter().any(|f| !f.is_empty()) {
            return true;
        }
        let _ = c.cond.wait_for(&mut fifos, timeout);
        fifos.iter().any(|f| !f.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn req(text: &str) -> TxRequest {
        TxRequest::new(Frame::from_monitor(text, false).unwrap())
    }

    #[test]
    fn test_flavor_classification() {
        assert_eq!(req("A>SPEECH:hello there").flavor, Flavor::Speech);
        assert_eq!(req("A>MORSE-5:cq cq").flavor, Flavor::Morse);
        assert_eq!(req("A>DTMF-3:1234").flavor, Flavor::Dtmf);
        assert_eq!(req("A>APRS,N0CALL*,WIDE2-1:>x").flavor, Flavor::AprsDigi);
        assert_eq!(req("A>APRS:>x").flavor, Flavor::AprsNew);
        assert_eq!(req("A>APRS,WIDE1-1:>x").flavor, Flavor::AprsNew);
    }

    #[test]
    fn test_high_before_low() {
        let q = TxQueue::new(1);
        q.append(0, Priority::Low, req("L1>APRS:>a"));
        q.append(0, Priority::High, req("H1>APRS:>b"));
        q.append(0, Priority::Low, req("L2>APRS:>c"));
        q.append(0, Priority::High, req("H2>APRS:>d"));

        let order: Vec<String> = std::iter::from_fn(|| q.remove_next(0))
            .map(|r| r.frame.source().to_text())
            .collect();
        assert_eq!(order, vec!["H1", "H2", "L1", "L2"]);
    }

    #[test]
    fn test_fifo_within_priority() {
        let q = TxQueue::new(1);
        for i in 0..5 {
            q.append(0, Priority::Low, req(&format!("S{}>APRS:>x", i)));
        }
        for i in 0..5 {
            assert_eq!(q.remove(0, Priority::Low).unwrap().frame.source().to_text(), format!("S{}", i));
        }
    }

    #[test]
    fn test_wait_wakes_on_append() {
        let q = Arc::new(TxQueue::new(1));
        let q2 = Arc::clone(&q);
        let h = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            q2.append(0, Priority::Low, req("A>B:x"));
        });
        assert!(q.wait_nonempty(0, Duration::from_secs(2)));
        h.join().unwrap();
    }

    #[test]
    fn test_wait_times_out_empty() {
        let q = TxQueue::new(1);
        assert!(!q.wait_nonempty(0, Duration::from_millis(10)));
    }

    #[test]
    fn test_peek_is_nondestructive() {
        let q = TxQueue::new(1);
        q.append(0, Priority::Low, req("A>APRS:>x"));
        assert_eq!(q.peek_flavor(0, Priority::Low), Some(Flavor::AprsNew));
        assert_eq!(q.len(0), 1);
    }
}
