// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Errors returned by HTNC operations.
//!
//! The propagation policy is asymmetric by design: failures inside a
//! receive path never kill the receiver (each bad frame is discarded and
//! processing resumes), transmit failures drop the offending frame and the
//! scheduler survives, and TCP write failures restart the IGate connect
//! state machine.

use crate::Chan;

/// Errors returned by HTNC operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Frame / codec errors
    // ========================================================================
    /// Address text does not satisfy the callsign/SSID rules in force.
    InvalidAddress(String),
    /// Bit unstuffer saw seven consecutive ones, a non-byte-aligned end,
    /// or a leading byte that is not a flag.
    MalformedFrame(&'static str),
    /// Computed FCS differs from the transmitted FCS.
    FcsMismatch,
    /// Info field does not wrap a third-party packet.
    MalformedThirdParty,
    /// Reed-Solomon decode failed; more errors than the code can correct.
    Uncorrectable,

    // ========================================================================
    // Configuration errors
    // ========================================================================
    /// A config value is missing or out of range. The offending subsystem
    /// is disabled at init and startup continues.
    InvalidConfig(String),
    /// Operation not valid in the current state.
    InvalidState(String),

    // ========================================================================
    // Transmit errors
    // ========================================================================
    /// Could not get a clear channel within the 60 s limit; the pending
    /// frame is discarded.
    ChannelBusyTimeout(Chan),
    /// Audio device overrun; recovery is attempted by the collaborator.
    AudioOverrun,
    /// Audio device underrun; recovery is attempted by the collaborator.
    AudioUnderrun,

    // ========================================================================
    // IGate errors
    // ========================================================================
    /// Could not establish the APRS-IS TCP session.
    ConnectFailed(String),
    /// I/O error with underlying cause.
    IoError(std::io::Error),
    /// IS-to-RF transmission suppressed by the 1/5 minute rate limits.
    RateLimited,
    /// Packet discarded by a filter expression.
    Filtered,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // Frame / codec
            Error::InvalidAddress(a) => write!(f, "Invalid address: {}", a),
            Error::MalformedFrame(why) => write!(f, "Malformed frame: {}", why),
            Error::FcsMismatch => write!(f, "FCS mismatch"),
            Error::MalformedThirdParty => write!(f, "Not a third-party packet"),
            Error::Uncorrectable => write!(f, "Uncorrectable Reed-Solomon block"),
            // Configuration
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            // Transmit
            Error::ChannelBusyTimeout(chan) => {
                write!(f, "Channel {} busy, could not transmit within 60 s", chan)
            }
            Error::AudioOverrun => write!(f, "Audio overrun"),
            Error::AudioUnderrun => write!(f, "Audio underrun"),
            // IGate
            Error::ConnectFailed(msg) => write!(f, "Connect failed: {}", msg),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::RateLimited => write!(f, "Rate limited"),
            Error::Filtered => write!(f, "Filtered"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}
