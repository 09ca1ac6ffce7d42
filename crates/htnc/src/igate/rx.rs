// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RF-to-IS direction: what we heard on the radio and pass upstream.

use std::time::Duration;

use crate::igate::{Igate, IgateState, RF_TO_IS_NEVER};
use crate::protocol::Frame;
use crate::Chan;

impl Igate {
    /// Forward a received packet to APRS-IS. `channel` is `None` for
    /// our own beacons, which bypass the receive filters.
    pub fn send_rec_packet(&self, channel: Option<Chan>, frame: &Frame) {
        if self.state() != IgateState::Ready {
            return;
        }

        // Per-channel filter; beacons and the virtual channel skip it.
        if let Some(chan) = channel {
            if Some(chan) != self.cfg.ichannel {
                if let Some((_, expr)) = self.rx_filters.iter().find(|(c, _)| *c == chan) {
                    if !expr.eval(frame) {
                        log::debug!("[IGate] rf->is filtered on chan {}", chan);
                        return;
                    }
                }
            }
        }

        // Unwrap nested third-party layers; the innermost packet is
        // the one that matters.
        let mut frame = frame.clone();
        while let Ok(inner) = frame.unwrap_third_party() {
            frame = inner;
        }

        if super::path_contains(&frame, &RF_TO_IS_NEVER) {
            log::debug!("[IGate] not gated, path says no: {}", frame.format_addresses());
            return;
        }
        if frame.info().first() == Some(&b'?') {
            // General queries stay local.
            log::debug!("[IGate] query not gated");
            return;
        }

        frame.cut_at_crlf();
        if frame.info().is_empty() {
            return;
        }

        // Optional RF->IS dedupe (off by default).
        if !self.cfg.rx2ig_dedupe.is_zero() {
            let crc = frame.dedupe_crc();
            let now = self.clock.now();
            let mut recent = self.rx2ig.lock();
            if let Some(&t) = recent.peek(&crc) {
                if now.saturating_sub(t) <= self.cfg.rx2ig_dedupe {
                    log::debug!("[IGate] rf->is duplicate dropped");
                    return;
                }
            }
            recent.put(crc, now);
        }

        // SATgate: packets heard directly that still carry a path get
        // parked so the digipeated copies reach the IS core first.
        if let Some(delay) = self.cfg.satgate_delay {
            if channel.is_some() && heard_direct(&frame) && frame.num_repeaters() >= 1 {
                let mut parked = frame;
                parked.release_time = Some(self.clock.now() + delay);
                log::debug!("[IGate] SATgate holding {}", parked.format_addresses());
                self.satgate.lock().push_back(parked);
                self.satgate_cond.notify_all();
                return;
            }
        }

        self.forward_to_is(&frame);
    }

    /// Format and upload one packet.
    pub(crate) fn forward_to_is(&self, frame: &Frame) {
        let mut line = Vec::with_capacity(96);
        line.extend_from_slice(frame.source().to_text().as_bytes());
        line.push(b'>');
        line.extend_from_slice(frame.destination().to_text().as_bytes());
        line.extend_from_slice(b",TCPIP*,");
        line.extend_from_slice(self.q_construct().as_bytes());
        line.push(b',');
        line.extend_from_slice(self.cfg.login_call.as_bytes());
        line.push(b':');
        line.extend_from_slice(frame.info());

        if self.send_line(&line).is_ok() {
            self.count_uplink();
        }
    }

    /// SATgate release loop: runs on its own thread, draining frames
    /// whose hold time has passed.
    pub(crate) fn satgate_run(&self) {
        log::info!("[IGate] SATgate delay task up");
        while self.running.load(std::sync::atomic::Ordering::Acquire) {
            let due = {
                let mut parked = self.satgate.lock();
                let now = self.clock.now();
                match parked.front().and_then(|f| f.release_time) {
                    Some(t) if t <= now => parked.pop_front(),
                    _ => {
                        self.satgate_cond
                            .wait_for(&mut parked, Duration::from_millis(250));
                        None
                    }
                }
            };
            if let Some(mut f) = due {
                f.release_time = None;
                log::debug!("[IGate] SATgate releasing {}", f.format_addresses());
                self.forward_to_is(&f);
            }
        }
    }
}

/// True when the frame shows no used digipeater: we heard the source
/// itself.
fn heard_direct(frame: &Frame) -> bool {
    (2..frame.num_addrs()).all(|i| !frame.h(i))
}
