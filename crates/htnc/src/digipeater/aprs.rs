// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The APRS digipeater.
//!
//! For each enabled (from, to) channel pair, a received frame is
//! examined at its first unused repeater slot and, when the rules say
//! so, retransmitted with the path rewritten:
//!
//! - an exact match on our own callsign is always honored (that is how
//!   people test digipeaters), with no duplicate suppression;
//! - alias matches substitute our callsign;
//! - with preemption on, our callsign or an alias anywhere later in the
//!   path is pulled forward, with TRACE/DROP/MARK deciding what happens
//!   to the hops that were skipped;
//! - WIDEn-N decrements the remaining-hop SSID and, while there is
//!   room, inserts our callsign ahead of it so the path records who
//!   actually carried the packet.
//!
//! Same-channel digipeats go out HIGH so they ride the current channel
//! opening; cross-channel copies go LOW.

use std::collections::HashMap;
use std::sync::Arc;

use crate::digipeater::DigiRoute;
use crate::error::Result;
use crate::filter::{matches_any, Expr};
use crate::protocol::{Address, Frame, AX25_MAX_ADDRS, AX25_REPEATER_1};
use crate::xmit::queue::{Flavor, Priority, TxQueue, TxRequest};
use crate::xmit::Dedupe;
use crate::Chan;

/// What happens to the repeaters we jump over when preempting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preempt {
    /// No preemption.
    #[default]
    Off,
    /// Remove everything before our slot.
    Drop,
    /// Mark everything before our slot as used.
    Mark,
    /// Remove the unused entries before our slot, keep the used ones:
    /// the resulting path stays an honest record.
    Trace,
}

/// APRS digipeater configuration.
#[derive(Debug, Clone)]
pub struct AprsDigiConfig {
    pub routes: Vec<DigiRoute>,
    /// Alternate names answered as if they were our callsign
    /// (`*` suffix wildcards allowed).
    pub aliases: Vec<String>,
    /// WIDEn-N style prefixes: `<prefix><1-7>` with the remaining hop
    /// count in the SSID.
    pub wide_prefixes: Vec<String>,
    /// Alternate-topology prefix with its special path rewrite.
    pub atgp_prefix: Option<String>,
    pub preempt: Preempt,
    /// Channel pairs regenerating a clean copy of everything received.
    pub regen: Vec<(Chan, Chan)>,
}

impl Default for AprsDigiConfig {
    fn default() -> Self {
        Self {
            routes: Vec::new(),
            aliases: Vec::new(),
            wide_prefixes: vec!["WIDE".to_string(), "TRACE".to_string()],
            atgp_prefix: None,
            preempt: Preempt::Off,
            regen: Vec::new(),
        }
    }
}

/// The digipeater itself. One instance serves every channel pair.
pub struct AprsDigipeater {
    cfg: AprsDigiConfig,
    /// Our callsign per channel.
    mycalls: Vec<String>,
    filters: HashMap<(Chan, Chan), Expr>,
    dedupe: Arc<Dedupe>,
    queue: Arc<TxQueue>,
}

impl AprsDigipeater {
    pub fn new(
        cfg: AprsDigiConfig,
        mycalls: Vec<String>,
        dedupe: Arc<Dedupe>,
        queue: Arc<TxQueue>,
    ) -> Result<Self> {
        let mut filters = HashMap::new();
        for route in &cfg.routes {
            if let Some(text) = &route.filter {
                filters.insert((route.from, route.to), Expr::parse(text)?);
            }
        }
        Ok(Self { cfg, mycalls, filters, dedupe, queue })
    }

    /// Handle one received APRS frame.
    pub fn process(&self, from: Chan, frame: &Frame) {
        for route in &self.cfg.routes {
            if route.from != from {
                continue;
            }
            if let Some(out) = self.decide(from, route.to, frame) {
                self.dedupe.remember(&out, route.to);
                let prio = if from == route.to { Priority::High } else { Priority::Low };
                self.queue
                    .append(route.to, prio, TxRequest { frame: out, flavor: Flavor::AprsDigi });
            }
        }
        for &(rf, rt) in &self.cfg.regen {
            if rf == from {
                log::debug!("[Digi] regenerating chan {} -> {}", rf, rt);
                self.queue.append(rt, Priority::Low, TxRequest::new(frame.clone()));
            }
        }
    }

    /// The pure digipeating decision for one channel pair. `None` means
    /// no retransmission.
    pub fn decide(&self, from: Chan, to: Chan, frame: &Frame) -> Option<Frame> {
        if let Some(expr) = self.filters.get(&(from, to)) {
            if !expr.eval(frame) {
                log::debug!("[Digi] {}->{} filtered", from, to);
                return None;
            }
        }
        let r = frame.first_not_repeated()?;
        let mycall_from = self.mycalls.get(from)?.clone();
        let mycall_to = self.mycalls.get(to)?.clone();
        let r_text = frame.addr_with_ssid(r);

        // Directly addressed to us: always repeat, no dedupe. This is
        // how "can you hear me" tests are run.
        if r_text.eq_ignore_ascii_case(&mycall_from) {
            let mut out = frame.clone();
            out.set_addr(r, own_addr(&mycall_to));
            out.set_h(r);
            return Some(out);
        }

        if frame.source().to_text().eq_ignore_ascii_case(&mycall_from) {
            // Never digipeat our own transmissions.
            return None;
        }
        if self.dedupe.check(frame, to) {
            log::debug!("[Digi] duplicate dropped: {}", frame.format_addresses());
            return None;
        }

        if matches_any(&self.cfg.aliases, &r_text) {
            let mut out = frame.clone();
            out.set_addr(r, own_addr(&mycall_to));
            out.set_h(r);
            return Some(out);
        }

        if self.cfg.preempt != Preempt::Off {
            if let Some(out) = self.preempt(frame, r, &mycall_from, &mycall_to) {
                return Some(out);
            }
        }

        self.wide(frame, r, &mycall_to)
    }

    fn preempt(&self, frame: &Frame, r: usize, mycall_from: &str, mycall_to: &str) -> Option<Frame> {
        let i = ((r + 1)..frame.num_addrs()).find(|&i| {
            let text = frame.addr_with_ssid(i);
            text.eq_ignore_ascii_case(mycall_from) || matches_any(&self.cfg.aliases, &text)
        })?;

        let mut out = frame.clone();
        out.set_addr(i, own_addr(mycall_to));
        out.set_h(i);
        match self.cfg.preempt {
            Preempt::Drop => {
                // Remove every repeater before ours.
                for ix in (AX25_REPEATER_1..i).rev() {
                    out.remove_addr(ix);
                }
            }
            Preempt::Trace => {
                // Remove only the unused ones; used hops stay as the
                // honest record of where the packet has been.
                for ix in (AX25_REPEATER_1..i).rev() {
                    if !out.h(ix) {
                        out.remove_addr(ix);
                    }
                }
            }
            Preempt::Mark => {
                for ix in AX25_REPEATER_1..i {
                    out.set_h(ix);
                }
            }
            Preempt::Off => {}
        }
        Some(out)
    }

    fn wide(&self, frame: &Frame, r: usize, mycall_to: &str) -> Option<Frame> {
        let call = frame.addr(r)?.call();
        let ssid = frame.ssid(r);
        if !self.is_wide(call) {
            return None;
        }

        // Alternate-topology special case: scrub the used hops, step the
        // counter, and put ourselves up front.
        if let Some(prefix) = &self.cfg.atgp_prefix {
            if call.to_ascii_uppercase().starts_with(&prefix.to_ascii_uppercase())
                && (1..=7).contains(&ssid)
            {
                let mut out = frame.clone();
                let mut ix = AX25_REPEATER_1;
                while ix < out.num_addrs() {
                    if out.h(ix) {
                        out.remove_addr(ix);
                    } else {
                        ix += 1;
                    }
                }
                let r_now = out.first_not_repeated()?;
                if let Some(a) = out.addr_mut(r_now) {
                    a.set_ssid(ssid - 1);
                    if ssid - 1 == 0 {
                        a.set_h(true);
                    }
                }
                let mut own = own_addr(mycall_to);
                own.set_h(true);
                out.insert_addr(AX25_REPEATER_1, own);
                return Some(out);
            }
        }

        match ssid {
            1 => {
                // Last hop: substitute ourselves outright.
                let mut out = frame.clone();
                out.set_addr(r, own_addr(mycall_to));
                out.set_h(r);
                Some(out)
            }
            2..=7 => {
                let mut out = frame.clone();
                if let Some(a) = out.addr_mut(r) {
                    a.set_ssid(ssid - 1);
                }
                if out.num_addrs() < AX25_MAX_ADDRS {
                    let mut own = own_addr(mycall_to);
                    own.set_h(true);
                    out.insert_addr(r, own);
                }
                Some(out)
            }
            _ => None,
        }
    }

    fn is_wide(&self, call: &str) -> bool {
        self.cfg.wide_prefixes.iter().any(|p| {
            call.len() == p.len() + 1
                && call[..p.len()].eq_ignore_ascii_case(p)
                && matches!(call.as_bytes()[p.len()], b'1'..=b'7')
        })
    }
}

fn own_addr(mycall: &str) -> Address {
    let (call, ssid) = match mycall.rsplit_once('-') {
        Some((c, s)) => (c, s.parse().unwrap_or(0)),
        None => (mycall, 0),
    };
    Address::new(call, ssid)
        .unwrap_or_else(|_| Address::new("N0CALL", 0).expect("fallback callsign is valid"))
}
