// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # HTNC - Software Terminal Node Controller
//!
//! A pure Rust protocol engine for amateur-radio packet: it converts between
//! a stream of audio samples and framed AX.25/FX.25/IL2P packets, and owns
//! every decision about *when* to transmit on a shared half-duplex channel.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use htnc::{Engine, EngineConfig, Result};
//! use std::sync::Arc;
//!
//! fn main() -> Result<()> {
//!     let config = EngineConfig::default();
//!     let engine = Engine::builder(config)
//!         .ptt(Arc::new(htnc::core::NullPtt))
//!         .build()?;
//!
//!     // Feed received audio; decoded frames flow to the digipeater,
//!     // the IGate and the application sink.
//!     // engine.demodulator(0).process(&samples);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                         Application Layer                          |
//! |        FrameSink (KISS server, apps)  |  Beacon descriptors        |
//! +--------------------------------------------------------------------+
//! |                          Policy Layer                              |
//! |  ApsrDigipeater | ConnDigipeater | IGate | Mheard | Dedupe         |
//! +--------------------------------------------------------------------+
//! |                          Link Layer                                |
//! |  Frame codec | XID | HDLC framing | FX.25 | IL2P | TxScheduler     |
//! +--------------------------------------------------------------------+
//! |                         Physical Layer                             |
//! |  AFSK / G3RUH / PSK modems | DTMF | Morse | DCD | SampleSink/Src   |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Engine`] | Owns all per-channel state, factory for the worker threads |
//! | [`protocol::Frame`] | AX.25 frame object model (addresses, control, info) |
//! | [`xmit::TxScheduler`] | p-persistence CSMA transmit scheduler |
//! | [`igate::Igate`] | APRS-IS bidirectional gateway |
//! | [`mheard::Mheard`] | Concurrent "heard recently" station table |
//!
//! ## What stays outside
//!
//! The audio device, PTT transport, GPS, config-file parser and KISS server
//! are collaborators behind the traits in [`core`]; the engine never talks
//! to hardware directly.

/// APRS info-field builders (position, object, message) and classification.
pub mod aprs;
/// Scheduled and SmartBeaconing transmissions.
pub mod beacon;
/// Global configuration structures and per-channel parameters.
pub mod config;
/// Collaborator traits (audio, PTT, clock, GPS, frame delivery) and signal levels.
pub mod core;
/// APRS and connected-mode digipeaters.
pub mod digipeater;
/// Top-level engine wiring all subsystems together.
pub mod engine;
/// Error type shared by the whole crate.
pub mod error;
/// Forward-error-corrected transports: Reed-Solomon, FX.25, IL2P.
pub mod fec;
/// Packet filter expression language (`t/`, `b/`, `r/`, ...).
pub mod filter;
/// HDLC framing: flags, bit stuffing, FCS, retry-repair.
pub mod hdlc;
/// APRS-IS Internet gateway client.
pub mod igate;
/// Per-packet CSV activity log with daily rotation.
pub mod logging;
/// Concurrent heard-stations database.
pub mod mheard;
/// Modulators and demodulators (AFSK, G3RUH, PSK, DTMF, Morse).
pub mod modem;
/// AX.25/FX.25/IL2P frame object model and codecs.
pub mod protocol;
/// Transmit side: priority queues, dedupe, CSMA scheduler.
pub mod xmit;

pub use config::{ChannelConfig, EngineConfig, ModemType};
pub use engine::Engine;
pub use error::{Error, Result};
pub use protocol::Frame;

/// Radio channel index. Channels map onto audio devices in pairs
/// (left/right of a stereo device may be two different radios).
pub type Chan = usize;

/// Crate major version, used in the APRS-IS login line and the
/// third-party tocall.
pub const VERSION_MAJOR: u8 = 1;
/// Crate minor version.
pub const VERSION_MINOR: u8 = 8;

/// Application name sent to APRS-IS in the login line.
pub const APP_NAME: &str = "HTNC";

/// Destination tocall for frames this station originates onto APRS-IS.
/// The `APDW` prefix is what APRS-IS tooling expects from a soundcard TNC
/// gateway; the two digits are the version.
pub fn app_tocall() -> String {
    format!("APDW{}{}", VERSION_MAJOR, VERSION_MINOR)
}
