// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Collaborator traits and small shared types.
//!
//! Everything the engine needs from the outside world enters through the
//! traits here: audio in/out, PTT, time, GPS, speech, and frame delivery
//! to the application. The engine never opens a device or a serial port
//! itself, which keeps every subsystem testable with in-memory fakes.

mod alevel;
mod clock;
mod traits;

pub use alevel::ALevel;
pub use clock::{Clock, SystemClock};
pub use traits::{
    FrameSink, GpsFix, GpsSource, NullPtt, PttControl, SampleSink, SampleSource, SpeechSynth,
    TransmitObserver,
};

/// Upper bound on radio channels.
pub const MAX_CHANS: usize = 16;
/// Upper bound on parallel demodulator profiles per channel.
pub const MAX_SUBCHANS: usize = 9;
/// Upper bound on slice points per subchannel.
pub const MAX_SLICERS: usize = 9;
