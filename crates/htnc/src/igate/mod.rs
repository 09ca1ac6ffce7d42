// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The APRS-IS Internet gateway.
//!
//! # Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                          Igate                               |
//! |  +----------------+   +----------------+   +-------------+  |
//! |  | connect thread |   |  recv thread   |   | SATgate     |  |
//! |  | login, beat    |   |  line reader   |   | delay queue |  |
//! |  +----------------+   +----------------+   +-------------+  |
//! |          |                    |                              |
//! |   RF->IS path           IS->RF path                          |
//! |   (filters, dedupe,     (filters, msp bypass, wrap,          |
//! |    keyword drops)        dup window, rate limits)            |
//! +--------------------------------------------------------------+
//! ```
//!
//! State machine: DISCONNECTED -> CONNECTING -> LOGGING_IN -> READY,
//! restarted by any write error. The published state snapshot swaps
//! atomically so observers never block the I/O threads.

pub mod client;
mod rx;
mod tx;

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io::Write;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{Clock, FrameSink, TransmitObserver};
use crate::error::Result;
use crate::filter::Expr;
use crate::mheard::Mheard;
use crate::protocol::Frame;
use crate::xmit::TxQueue;
use crate::Chan;

/// Default APRS-IS user port.
pub const DEFAULT_PORT: u16 = 14580;

/// Path keywords that must never cross from RF to the Internet.
const RF_TO_IS_NEVER: [&str; 4] = ["TCPIP", "TCPXX", "RFONLY", "NOGATE"];
/// Path keywords that must never cross from the Internet to RF.
const IS_TO_RF_NEVER: [&str; 4] = ["qAX", "TCPXX", "RFONLY", "NOGATE"];

/// IS-to-RF duplicate window.
const IG_TO_TX_DEDUPE: Duration = Duration::from_secs(60);

/// APRS-IS gateway configuration.
#[derive(Debug, Clone)]
pub struct IgateConfig {
    pub server: String,
    pub port: u16,
    /// Callsign for the login line and q construct.
    pub login_call: String,
    pub passcode: String,
    /// Server-side filter expression sent with the login.
    pub server_filter: Option<String>,
    /// Channel for IS-to-RF transmissions; `None` is a receive-only
    /// gateway (qAO instead of qAR).
    pub tx_chan: Option<Chan>,
    /// Via path for IS-to-RF third-party frames.
    pub tx_via: Option<String>,
    /// Per-channel RF-to-IS filter expressions.
    pub rx_filters: Vec<(Chan, String)>,
    /// IS-to-RF filter expression.
    pub tx_filter: Option<String>,
    /// Max IS-to-RF transmissions in 1 minute (tripled for messages).
    pub tx_limit_1: u32,
    /// Max IS-to-RF transmissions in 5 minutes (tripled for messages).
    pub tx_limit_5: u32,
    /// RF-to-IS duplicate window; zero disables the check.
    pub rx2ig_dedupe: Duration,
    /// Hold direct satellite hearings this long so digipeated copies
    /// go out first. `None` disables SATgate mode.
    pub satgate_delay: Option<Duration>,
    /// Virtual channel receiving every IS frame for local apps.
    pub ichannel: Option<Chan>,
    /// Courtesy-posit credits granted per delivered message.
    pub igmsp: u32,
}

impl Default for IgateConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: DEFAULT_PORT,
            login_call: String::new(),
            passcode: "-1".to_string(),
            server_filter: None,
            tx_chan: None,
            tx_via: None,
            rx_filters: Vec::new(),
            tx_filter: None,
            tx_limit_1: 6,
            tx_limit_5: 20,
            rx2ig_dedupe: Duration::ZERO,
            satgate_delay: None,
            ichannel: None,
            igmsp: 1,
        }
    }
}

/// Connection state, published atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgateState {
    Disconnected,
    Connecting,
    LoggingIn,
    Ready,
}

/// One IS-to-RF (or digipeater) transmission in the history window.
#[derive(Debug, Clone, Copy)]
struct TxHistoryEntry {
    time: Duration,
    crc: u16,
    chan: Chan,
    by_digipeater: bool,
}

/// The gateway. Shared by the engine's receive dispatch, the beacon
/// subsystem and its own I/O threads.
pub struct Igate {
    pub(crate) cfg: IgateConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) mheard: Arc<Mheard>,
    pub(crate) queue: Arc<TxQueue>,
    state: ArcSwap<IgateState>,
    /// Byte sink toward the server; the connect thread installs the
    /// TCP stream, tests install a buffer.
    pub(crate) uplink: Mutex<Option<Box<dyn Write + Send>>>,
    pub(crate) rx_filters: Vec<(Chan, Expr)>,
    pub(crate) tx_filter: Option<Expr>,
    /// RF-to-IS recent packets, fixed 30 slots.
    pub(crate) rx2ig: Mutex<lru::LruCache<u16, Duration>>,
    ig2tx: Mutex<VecDeque<TxHistoryEntry>>,
    /// SATgate parking lot, ordered by release time.
    pub(crate) satgate: Mutex<VecDeque<Frame>>,
    pub(crate) satgate_cond: Condvar,
    /// Sink for the ICHANNEL virtual channel.
    pub(crate) ichannel_sink: Mutex<Option<Arc<dyn FrameSink>>>,
    pub(crate) running: Arc<AtomicBool>,
    // Statistics.
    uplink_count: AtomicU64,
    downlink_count: AtomicU64,
}

impl Igate {
    pub fn new(
        cfg: IgateConfig,
        clock: Arc<dyn Clock>,
        mheard: Arc<Mheard>,
        queue: Arc<TxQueue>,
    ) -> Result<Self> {
        let mut rx_filters = Vec::new();
        for (chan, text) in &cfg.rx_filters {
            rx_filters.push((*chan, Expr::parse(text)?));
        }
        let tx_filter = cfg.tx_filter.as_deref().map(Expr::parse).transpose()?;
        Ok(Self {
            cfg,
            clock,
            mheard,
            queue,
            state: ArcSwap::from_pointee(IgateState::Disconnected),
            uplink: Mutex::new(None),
            rx_filters,
            tx_filter,
            rx2ig: Mutex::new(lru::LruCache::new(
                NonZeroUsize::new(30).expect("capacity > 0"),
            )),
            ig2tx: Mutex::new(VecDeque::new()),
            satgate: Mutex::new(VecDeque::new()),
            satgate_cond: Condvar::new(),
            ichannel_sink: Mutex::new(None),
            running: Arc::new(AtomicBool::new(true)),
            uplink_count: AtomicU64::new(0),
            downlink_count: AtomicU64::new(0),
        })
    }

    pub fn set_ichannel_sink(&self, sink: Arc<dyn FrameSink>) {
        *self.ichannel_sink.lock() = Some(sink);
    }

    pub fn state(&self) -> IgateState {
        **self.state.load()
    }

    pub(crate) fn set_state(&self, s: IgateState) {
        log::info!("[IGate] {:?}", s);
        self.state.store(Arc::new(s));
    }

    /// (packets RF->IS, packets IS->RF) so far.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.uplink_count.load(Ordering::Relaxed),
            self.downlink_count.load(Ordering::Relaxed),
        )
    }

    pub(crate) fn count_uplink(&self) {
        self.uplink_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_downlink(&self) {
        self.downlink_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Write one line (CR LF appended) toward the server. Any error
    /// drops the connection; the connect thread notices and restarts.
    pub(crate) fn send_line(&self, line: &[u8]) -> Result<()> {
        let mut guard = self.uplink.lock();
        let Some(w) = guard.as_mut() else {
            return Err(crate::error::Error::InvalidState("not connected".into()));
        };
        let mut buf = Vec::with_capacity(line.len() + 2);
        buf.extend_from_slice(line);
        buf.extend_from_slice(b"\r\n");
        if let Err(e) = w.write_all(&buf).and_then(|()| w.flush()) {
            log::error!("[IGate] write failed: {}", e);
            *guard = None;
            self.set_state(IgateState::Disconnected);
            return Err(e.into());
        }
        Ok(())
    }

    /// The q construct for our uploads: qAR when we can transmit,
    /// qAO for a receive-only gateway.
    pub(crate) fn q_construct(&self) -> &'static str {
        if self.cfg.tx_chan.is_some() {
            "qAR"
        } else {
            "qAO"
        }
    }

    // ========================================================================
    // IS->RF history: duplicates and rate limits
    // ========================================================================

    /// Record a frame sent to RF, ours or the digipeater's.
    pub(crate) fn ig_to_tx_remember(&self, frame: &Frame, chan: Chan, by_digipeater: bool) {
        let mut h = self.ig2tx.lock();
        let now = self.clock.now();
        h.push_back(TxHistoryEntry { time: now, crc: frame.dedupe_crc(), chan, by_digipeater });
        // Nothing looks back more than five minutes.
        while let Some(front) = h.front() {
            if now.saturating_sub(front.time) > Duration::from_secs(300) {
                h.pop_front();
            } else {
                break;
            }
        }
    }

    /// May this frame be transmitted on `chan`? Applies the 60 s
    /// duplicate window (messages exempt, to let retries work) and the
    /// 1/5 minute rate limits (tripled for messages).
    pub(crate) fn ig_to_tx_allow(&self, frame: &Frame, chan: Chan) -> Result<()> {
        let now = self.clock.now();
        let crc = frame.dedupe_crc();
        let message = is_retryable_message(frame);
        let h = self.ig2tx.lock();

        if !message {
            let dup = h.iter().any(|e| {
                e.crc == crc && e.chan == chan && now.saturating_sub(e.time) <= IG_TO_TX_DEDUPE
            });
            if dup {
                log::info!("[IGate] duplicate within 60 s not transmitted");
                return Err(crate::error::Error::Filtered);
            }
        }

        let ours = |e: &&TxHistoryEntry| !e.by_digipeater && e.chan == chan;
        let count_1 = h
            .iter()
            .filter(ours)
            .filter(|e| now.saturating_sub(e.time) <= Duration::from_secs(60))
            .count() as u32;
        let count_5 = h
            .iter()
            .filter(ours)
            .filter(|e| now.saturating_sub(e.time) <= Duration::from_secs(300))
            .count() as u32;

        let factor = if message { 3 } else { 1 };
        let limit_1 = self.cfg.tx_limit_1.min(20) * factor;
        let limit_5 = self.cfg.tx_limit_5.min(80) * factor;
        if count_1 >= limit_1 || count_5 >= limit_5 {
            log::error!(
                "[IGate] rate limited: {}/min {}/5min against {}/{}",
                count_1,
                count_5,
                limit_1,
                limit_5
            );
            return Err(crate::error::Error::RateLimited);
        }
        Ok(())
    }

    /// Stop the I/O threads; they notice within their timeouts.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.satgate_cond.notify_all();
    }
}

impl TransmitObserver for Igate {
    fn frame_transmitted(&self, chan: Chan, frame: &Frame) {
        // The scheduler tells us about every RF transmission so we do
        // not later push the same packet back out from the IS side.
        self.ig_to_tx_remember(frame, chan, true);
    }
}

/// A message that deserves the duplicate-window exemption: DTI `:`,
/// not a bulletin family, not telemetry metadata.
pub(crate) fn is_retryable_message(frame: &Frame) -> bool {
    let info = frame.info();
    if info.first() != Some(&b':') || info.len() < 11 || info[10] != b':' {
        return false;
    }
    let addressee = &info[1..10];
    for prefix in [&b"BLN"[..], b"NWS", b"SKY", b"CWA", b"BOM"] {
        if addressee.starts_with(prefix) {
            return false;
        }
    }
    let text = &info[11..];
    for prefix in [&b"PARM."[..], b"UNIT.", b"EQNS.", b"BITS."] {
        if text.starts_with(prefix) {
            return false;
        }
    }
    true
}

/// Keyword check against the used and unused path of a frame.
pub(crate) fn path_contains(frame: &Frame, keywords: &[&str]) -> bool {
    (2..frame.num_addrs()).any(|i| {
        let call = frame.addr(i).map(|a| a.call().to_string()).unwrap_or_default();
        keywords.iter().any(|k| call.eq_ignore_ascii_case(k))
    })
}
