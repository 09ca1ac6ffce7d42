// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine and per-channel configuration.
//!
//! These are plain data structures; reading a configuration file and
//! turning it into an [`EngineConfig`] is the job of an external
//! collaborator. Defaults follow long-established packet practice:
//! SLOTTIME 10, PERSIST 63, TXDELAY 30, TXTAIL 10 (all in 10 ms units).

use std::path::PathBuf;
use std::time::Duration;

use crate::beacon::{BeaconConfig, SmartBeaconConfig};
use crate::digipeater::aprs::AprsDigiConfig;
use crate::digipeater::connected::ConnDigiConfig;
use crate::hdlc::repair::{RetryLevel, SanityCheck};
use crate::igate::IgateConfig;

/// Modulation scheme for one radio channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemType {
    /// Audio frequency shift keying (Bell 202 at 1200 baud on VHF).
    Afsk,
    /// Quadrature PSK, 2400 bps (V.26).
    Qpsk,
    /// 8-phase PSK, 4800 bps (V.27).
    Psk8,
    /// Direct baseband, G3RUH 9600 without the scrambler.
    Baseband,
    /// G3RUH 9600: baseband with the x^17+x^12+1 scrambler.
    Scramble,
    /// AIS reception variant of AFSK (non-standard shift).
    Ais,
    /// EAS/SAME variant of AFSK (non-standard shift).
    Eas,
}

/// QPSK phase mapping variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum V26Variant {
    /// CCITT V.26 alternative A: 0/90/180/270 degrees.
    #[default]
    A,
    /// Alternative B: adds a 45 degree offset every symbol.
    B,
}

/// Layer-2 framing used on transmit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layer2 {
    /// Classic HDLC-framed AX.25.
    #[default]
    Ax25,
    /// AX.25 inside FX.25 Reed-Solomon codeblocks.
    Fx25,
    /// IL2P: scrambled RS-protected frames with a sync word.
    Il2p,
}

/// FX.25 check-byte strength selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fx25Strength {
    /// Pick the smallest block that fits, strongest check that fits.
    #[default]
    Auto,
    /// 16 check bytes.
    Check16,
    /// 32 check bytes.
    Check32,
    /// 64 check bytes.
    Check64,
}

/// Configuration for one radio channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Station callsign-SSID used for digipeating and IGate on this channel.
    pub mycall: String,
    /// Modulation scheme.
    pub modem_type: ModemType,
    /// QPSK variant, only meaningful for `ModemType::Qpsk`.
    pub v26: V26Variant,
    /// Data rate in bits per second.
    pub baud: u32,
    /// Mark (data 1) tone in Hz, AFSK only.
    pub mark_freq: u32,
    /// Space (data 0) tone in Hz, AFSK only.
    pub space_freq: u32,
    /// Audio sample rate in Hz.
    pub sample_rate: u32,
    /// Number of demodulator profiles run in parallel.
    pub num_subchans: usize,
    /// Slice points per subchannel.
    pub num_slicers: usize,
    /// Index of the audio device this channel lives on. Two channels with
    /// the same device (stereo left/right) never transmit simultaneously.
    pub audio_device: usize,
    /// Layer-2 framing on transmit. Receive always tries all three.
    pub layer2: Layer2,
    /// FX.25 check strength when `layer2` is `Fx25`.
    pub fx25_strength: Fx25Strength,
    /// IL2P maximum-FEC mode (16 check bytes per payload block).
    pub il2p_max_fec: bool,
    /// Append a trailing CRC to IL2P payloads.
    pub il2p_crc: bool,

    /// Squelch-recovery delay before probing the channel, 10 ms units.
    pub dwait: u32,
    /// CSMA slot time, 10 ms units.
    pub slottime: u32,
    /// p-persistence: transmit when an 8-bit draw is <= this value.
    pub persist: u8,
    /// Preamble length, 10 ms units of flags.
    pub txdelay: u32,
    /// Postamble length, 10 ms units of flags.
    pub txtail: u32,
    /// Full duplex: skip the clear-channel wait entirely.
    pub fulldup: bool,
    /// Upper bound on frames joined into one PTT interval.
    pub max_bundle: usize,

    /// Run the DTMF detector on this channel.
    pub dtmf_decode: bool,
    /// Test knob: probability [0,1] of transmitting a deliberately wrong
    /// FCS. Always 0 in real use.
    pub fcs_corrupt_rate: f64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            mycall: String::new(),
            modem_type: ModemType::Afsk,
            v26: V26Variant::default(),
            baud: 1200,
            mark_freq: 1200,
            space_freq: 2200,
            sample_rate: 44100,
            num_subchans: 1,
            num_slicers: 1,
            audio_device: 0,
            layer2: Layer2::default(),
            fx25_strength: Fx25Strength::default(),
            il2p_max_fec: true,
            il2p_crc: false,
            dwait: 0,
            slottime: 10,
            persist: 63,
            txdelay: 30,
            txtail: 10,
            fulldup: false,
            max_bundle: 64,
            dtmf_decode: false,
            fcs_corrupt_rate: 0.0,
        }
    }
}

/// Whole-engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// One entry per radio channel.
    pub chans: Vec<ChannelConfig>,
    /// APRS digipeater rules.
    pub digi: AprsDigiConfig,
    /// Connected-mode digipeater rules.
    pub cdigi: ConnDigiConfig,
    /// APRS-IS gateway; `None` disables the IGate.
    pub igate: Option<IgateConfig>,
    /// Beacon descriptors.
    pub beacons: Vec<BeaconConfig>,
    /// SmartBeaconing parameters; `None` means fixed-rate only.
    pub smart_beaconing: Option<SmartBeaconConfig>,
    /// Transmit dedupe window.
    pub dedupe_ttl: Option<Duration>,
    /// FCS retry-repair effort on the plain HDLC path.
    pub retry: RetryLevel,
    /// Which repaired frames are believable.
    pub sanity: SanityCheck,
    /// Directory for the CSV activity log; `None` disables it.
    pub log_dir: Option<PathBuf>,
    /// Rotate the activity log daily by UTC date.
    pub log_daily: bool,
}

impl EngineConfig {
    /// Dedupe TTL with the 30 s default applied.
    pub fn dedupe_ttl(&self) -> Duration {
        self.dedupe_ttl.unwrap_or(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_defaults_match_packet_practice() {
        let c = ChannelConfig::default();
        assert_eq!(c.slottime, 10);
        assert_eq!(c.persist, 63);
        assert_eq!(c.txdelay, 30);
        assert_eq!(c.txtail, 10);
        assert_eq!(c.dwait, 0);
        assert!(!c.fulldup);
        assert_eq!((c.mark_freq, c.space_freq), (1200, 2200));
    }

    #[test]
    fn test_dedupe_default_window() {
        let c = EngineConfig::default();
        assert_eq!(c.dedupe_ttl(), Duration::from_secs(30));
    }
}
