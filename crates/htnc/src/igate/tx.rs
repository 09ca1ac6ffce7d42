// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IS-to-RF direction: candidate packets arriving from the server.

use crate::aprs::info::message_addressee;
use crate::core::ALevel;
use crate::igate::{is_retryable_message, Igate, IS_TO_RF_NEVER};
use crate::protocol::{Address, Frame};
use crate::xmit::queue::{Priority, TxRequest};
use crate::app_tocall;

/// Info prefixes whose senders earn the courtesy-posit bypass: the
/// position forms.
const POSITION_DTIS: &[u8] = b"!=/@'`";

impl Igate {
    /// Handle one packet line received from APRS-IS.
    pub fn process_is_line(&self, line: &[u8]) {
        self.count_downlink();
        self.mheard.save_is(&String::from_utf8_lossy(line));

        // Server pseudo-callsigns need the relaxed parser.
        let frame = match Frame::from_monitor_bytes(line, false) {
            Ok(f) => f,
            Err(e) => {
                log::debug!("[IGate] unparseable IS line: {}", e);
                return;
            }
        };

        // The ICHANNEL gets everything, before any transmit gating.
        self.deliver_ichannel(line);

        let Some(chan) = self.cfg.tx_chan else { return };
        if super::path_contains(&frame, &IS_TO_RF_NEVER) {
            log::debug!("[IGate] is->rf path says no: {}", frame.format_addresses());
            return;
        }

        // Filter, unless the sender just received a message from us and
        // this is their position: one courtesy posit goes through so
        // the operator can see who they are talking to.
        if let Some(expr) = &self.tx_filter {
            if !expr.eval(&frame) {
                let courtesy = frame
                    .info()
                    .first()
                    .is_some_and(|d| POSITION_DTIS.contains(d))
                    && self.mheard.take_msp(&frame.source().to_text());
                if !courtesy {
                    log::debug!("[IGate] is->rf filtered");
                    return;
                }
                log::info!(
                    "[IGate] courtesy posit for {} bypasses the filter",
                    frame.source().to_text()
                );
            }
        }

        let wrapped = match self.wrap_for_rf(&frame) {
            Ok(w) => w,
            Err(e) => {
                log::debug!("[IGate] cannot wrap for rf: {}", e);
                return;
            }
        };

        match self.ig_to_tx_allow(&frame, chan) {
            Ok(()) => {}
            Err(_) => return,
        }

        self.ig_to_tx_remember(&frame, chan, false);
        self.queue.append(chan, Priority::Low, TxRequest::new(wrapped));

        // A delivered message credits its addressee with courtesy
        // posits.
        if is_retryable_message(&frame) {
            if let Some(addressee) = message_addressee(frame.info()) {
                self.mheard.set_msp(&addressee, self.cfg.igmsp);
            }
        }
    }

    /// Build the third-party wrapper:
    /// `mycall>APDWnn[,via]:}src>dest,TCPIP,mycall*:info`.
    fn wrap_for_rf(&self, frame: &Frame) -> crate::error::Result<Frame> {
        let mycall = &self.cfg.login_call;
        let mut info = Vec::with_capacity(64 + frame.info().len());
        info.push(b'}');
        info.extend_from_slice(frame.source().to_text().as_bytes());
        info.push(b'>');
        info.extend_from_slice(frame.destination().to_text().as_bytes());
        info.extend_from_slice(b",TCPIP,");
        info.extend_from_slice(mycall.as_bytes());
        info.extend_from_slice(b"*:");
        info.extend_from_slice(frame.info());

        let source = parse_strict_call(mycall)?;
        let destination = parse_strict_call(&app_tocall())?;
        let vias = match &self.cfg.tx_via {
            Some(path) => path
                .split(',')
                .map(parse_strict_call)
                .collect::<crate::error::Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        Ok(Frame::new_ui(source, destination, vias, &info))
    }

    fn deliver_ichannel(&self, line: &[u8]) {
        let Some(ichan) = self.cfg.ichannel else { return };
        let sink = self.ichannel_sink.lock().clone();
        let Some(sink) = sink else { return };
        // The source may not be a valid AX.25 address, so the real
        // packet rides third-party inside an X>X dummy.
        let mut info = Vec::with_capacity(line.len() + 1);
        info.push(b'}');
        info.extend_from_slice(line);
        let x = Address::new("X", 0).expect("static address");
        let frame = Frame::new_ui(x.clone(), x, Vec::new(), &info);
        sink.deliver(ichan, 0, 0, &frame, ALevel::default());
    }
}

fn parse_strict_call(text: &str) -> crate::error::Result<Address> {
    match text.rsplit_once('-') {
        Some((call, ssid)) => Address::new(
            call,
            ssid.parse()
                .map_err(|_| crate::error::Error::InvalidAddress(text.to_string()))?,
        ),
        None => Address::new(text, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::igate::testutil::igate_with;
    use crate::igate::IgateConfig;
    use crate::xmit::queue::Flavor;
    use crate::xmit::TxQueue;
    use std::sync::Arc;

    fn cfg() -> IgateConfig {
        IgateConfig {
            server: "noam.aprs2.net".into(),
            login_call: "MYCALL".into(),
            tx_chan: Some(0),
            tx_via: Some("WIDE2-1".into()),
            ..IgateConfig::default()
        }
    }

    fn pop(queue: &Arc<TxQueue>) -> Option<TxRequest> {
        queue.remove(0, Priority::Low)
    }

    #[test]
    fn test_wrap_matches_wire_format() {
        let (ig, _, queue) = igate_with(cfg());
        ig.process_is_line(b"D>E,TCPIP,F:info");
        let req = pop(&queue).unwrap();
        assert_eq!(
            req.frame.to_monitor(),
            "MYCALL>APDW18,WIDE2-1:}D>E,TCPIP,MYCALL*:info"
        );
        assert_eq!(req.flavor, Flavor::AprsNew);
        assert_eq!(ig.stats().1, 1);
    }

    #[test]
    fn test_gating_keywords_block_rf() {
        let (_ig, _, queue) = {
            let (ig, buf, queue) = igate_with(cfg());
            for path in ["qAX", "TCPXX", "RFONLY", "NOGATE"] {
                ig.process_is_line(format!("A>B,{},C:x", path).as_bytes());
            }
            (ig, buf, queue)
        };
        assert!(pop(&queue).is_none());
    }

    #[test]
    fn test_receive_only_gateway_never_transmits() {
        let mut c = cfg();
        c.tx_chan = None;
        let (ig, _, queue) = igate_with(c);
        ig.process_is_line(b"A>B:x");
        assert!(pop(&queue).is_none());
        // But it still counts and still feeds mheard.
        assert_eq!(ig.stats().1, 1);
    }

    #[test]
    fn test_duplicate_window_with_message_exception() {
        let (ig, _, queue) = igate_with(cfg());
        ig.process_is_line(b"A>B:>status packet");
        assert!(pop(&queue).is_some());
        // Same again inside 60 s: dropped.
        ig.process_is_line(b"A>B:>status packet");
        assert!(pop(&queue).is_none());

        // Messages retry on purpose; they pass the window.
        ig.process_is_line(b"A>B::W1ABC    :hello{1");
        assert!(pop(&queue).is_some());
        ig.process_is_line(b"A>B::W1ABC    :hello{1");
        assert!(pop(&queue).is_some());
    }

    #[test]
    fn test_rate_limit_1min() {
        let mut c = cfg();
        c.tx_limit_1 = 3;
        let (ig, _, queue) = igate_with(c);
        for i in 0..5 {
            ig.process_is_line(format!("A{}>B:>packet {}", i, i).as_bytes());
        }
        let mut sent = 0;
        while pop(&queue).is_some() {
            sent += 1;
        }
        assert_eq!(sent, 3);
    }

    #[test]
    fn test_digipeater_transmissions_count_for_dup_but_not_rate() {
        let mut c = cfg();
        c.tx_limit_1 = 3;
        let (ig, _, queue) = igate_with(c);
        // The digipeater sent this to RF a moment ago (observer path).
        let f = Frame::from_monitor("A>B:>already on rf", false).unwrap();
        ig.ig_to_tx_remember(&f, 0, true);
        // The same packet arriving from IS is a duplicate.
        ig.process_is_line(b"A>B:>already on rf");
        assert!(pop(&queue).is_none());
        // But digipeater traffic does not eat the IGate rate budget.
        for i in 0..3 {
            ig.process_is_line(format!("C{}>B:>fresh {}", i, i).as_bytes());
        }
        let mut sent = 0;
        while pop(&queue).is_some() {
            sent += 1;
        }
        assert_eq!(sent, 3);
    }

    #[test]
    fn test_courtesy_posit_bypasses_filter() {
        let mut c = cfg();
        c.tx_filter = Some("t/m".into()); // messages only
        let (ig, _, queue) = igate_with(c);

        // A position from W9XYZ: filtered, no credit.
        ig.process_is_line(b"W9XYZ>APRS:!4237.14N/07120.83W>");
        assert!(pop(&queue).is_none());

        // A message to W9XYZ passes the filter and grants a credit.
        ig.process_is_line(b"SOMEONE>APRS::W9XYZ    :you there?{7");
        assert!(pop(&queue).is_some());

        // Now exactly one position from W9XYZ bypasses the filter.
        ig.process_is_line(b"W9XYZ>APRS:!4237.14N/07120.83W>");
        assert!(pop(&queue).is_some());
        ig.process_is_line(b"W9XYZ>APRS:!4237.15N/07120.84W>");
        assert!(pop(&queue).is_none());
    }

    #[test]
    fn test_message_credits_addressee_msp() {
        let (ig, _, queue) = igate_with(cfg());
        ig.process_is_line(b"SOMEONE>APRS::W1AW-9   :good morning{3");
        assert!(pop(&queue).is_some());
        assert_eq!(ig.mheard.get_msp("W1AW-9"), 1);
    }

    #[test]
    fn test_unparseable_line_is_ignored() {
        let (ig, _, queue) = igate_with(cfg());
        ig.process_is_line(b"complete garbage with no colon");
        assert!(pop(&queue).is_none());
        assert_eq!(ig.stats().1, 1); // still counted as downlink traffic
    }
}
