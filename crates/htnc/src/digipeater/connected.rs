// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connected-mode digipeater.
//!
//! Same skeleton as the APRS digipeater but much less policy: only
//! exact-callsign and alias matches, no WIDEn-N arithmetic, and no
//! duplicate-suppression window, because connected-mode links carry
//! their own sequence numbers and retransmission logic. Everything
//! relayed here goes out HIGH: a connected session stalls on latency.

use std::collections::HashMap;
use std::sync::Arc;

use crate::digipeater::DigiRoute;
use crate::error::Result;
use crate::filter::{matches_any, Expr};
use crate::protocol::{Address, Frame};
use crate::xmit::queue::{Priority, TxQueue, TxRequest};
use crate::Chan;

/// Connected-mode digipeater configuration.
#[derive(Debug, Clone, Default)]
pub struct ConnDigiConfig {
    pub routes: Vec<DigiRoute>,
    /// Alternate names, `*` suffix wildcards allowed.
    pub aliases: Vec<String>,
}

/// The connected-mode digipeater.
pub struct ConnDigipeater {
    cfg: ConnDigiConfig,
    mycalls: Vec<String>,
    filters: HashMap<(Chan, Chan), Expr>,
    queue: Arc<TxQueue>,
}

impl ConnDigipeater {
    pub fn new(cfg: ConnDigiConfig, mycalls: Vec<String>, queue: Arc<TxQueue>) -> Result<Self> {
        let mut filters = HashMap::new();
        for route in &cfg.routes {
            if let Some(text) = &route.filter {
                filters.insert((route.from, route.to), Expr::parse(text)?);
            }
        }
        Ok(Self { cfg, mycalls, filters, queue })
    }

    /// Handle one received non-APRS frame.
    pub fn process(&self, from: Chan, frame: &Frame) {
        for route in &self.cfg.routes {
            if route.from != from {
                continue;
            }
            if let Some(out) = self.decide(from, route.to, frame) {
                self.queue.append(route.to, Priority::High, TxRequest::new(out));
            }
        }
    }

    /// Pure relay decision for one channel pair.
    pub fn decide(&self, from: Chan, to: Chan, frame: &Frame) -> Option<Frame> {
        if frame.is_aprs() {
            // APRS traffic belongs to the other digipeater.
            return None;
        }
        if let Some(expr) = self.filters.get(&(from, to)) {
            if !expr.eval(frame) {
                return None;
            }
        }
        let r = frame.first_not_repeated()?;
        let mycall_from = self.mycalls.get(from)?;
        let mycall_to = self.mycalls.get(to)?;
        let r_text = frame.addr_with_ssid(r);

        if frame.source().to_text().eq_ignore_ascii_case(mycall_from) {
            return None;
        }
        if !(r_text.eq_ignore_ascii_case(mycall_from) || matches_any(&self.cfg.aliases, &r_text)) {
            return None;
        }
        let mut out = frame.clone();
        out.set_addr(r, own_addr(mycall_to));
        out.set_h(r);
        Some(out)
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
