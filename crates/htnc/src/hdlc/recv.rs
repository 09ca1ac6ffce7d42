// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receive-side deframing: flag hunt, bit unstuffing, FCS validation.
//!
//! Two consumers share the core logic here. The streaming
//! [`HdlcDeframer`] eats one demodulated bit at a time (one instance per
//! slicer). The one-shot [`unstuff_frame`] runs over a byte buffer after
//! FX.25 Reed-Solomon correction, where the whole stuffed frame is
//! already in hand.

use crate::error::{Error, Result};
use crate::hdlc::{HDLC_FLAG, MIN_FRAME_LEN};
use crate::protocol::fcs_check;

/// Upper bound on the unstuffed frame size, bytes. Anything longer is a
/// noise artifact, not a frame.
const MAX_FRAME_LEN: usize = 2100;

/// Unstuff a byte-packed stuffed stream that starts with at least one
/// byte-aligned flag. Returns the frame bytes with the verified FCS
/// stripped.
pub fn unstuff_frame(input: &[u8]) -> Result<Vec<u8>> {
    if input.first() != Some(&HDLC_FLAG) {
        return Err(Error::MalformedFrame("leading byte is not a flag"));
    }
    let mut start = 0;
    while start < input.len() && input[start] == HDLC_FLAG {
        start += 1;
    }

    let mut bits: Vec<u8> = Vec::with_capacity((input.len() - start) * 8);
    let mut ones = 0u32;
    for &byte in &input[start..] {
        for i in 0..8 {
            let bit = (byte >> i) & 1;
            if bit == 1 {
                ones += 1;
                if ones == 7 {
                    return Err(Error::MalformedFrame("seven consecutive ones"));
                }
                bits.push(1);
            } else if ones == 5 {
                // Stuffed zero; drop it.
                ones = 0;
            } else if ones == 6 {
                // Closing flag. Seven of the pushed bits belong to it.
                bits.truncate(bits.len() - 7);
                return finish(&bits);
            } else {
                ones = 0;
                bits.push(0);
            }
        }
    }
    Err(Error::MalformedFrame("no closing flag"))
}

fn finish(bits: &[u8]) -> Result<Vec<u8>> {
    if bits.len() % 8 != 0 {
        return Err(Error::MalformedFrame("frame not byte aligned"));
    }
    let bytes = pack(bits);
    if bytes.len() < MIN_FRAME_LEN {
        return Err(Error::MalformedFrame("frame too short"));
    }
    if !fcs_check(&bytes) {
        return Err(Error::FcsMismatch);
    }
    let mut out = bytes;
    out.truncate(out.len() - 2);
    Ok(out)
}

fn pack(bits: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; bits.len() / 8];
    for (i, &b) in bits.iter().enumerate() {
        out[i / 8] |= b << (i % 8);
    }
    out
}

/// What the streaming deframer produced for one closing flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeframeEvent {
    /// FCS verified; frame bytes with the FCS stripped.
    Frame(Vec<u8>),
    /// Byte-aligned frame whose FCS failed; bytes include the bad FCS so
    /// the retry-repair stage can try bit flips.
    BadFcs(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// No flag seen yet; discard everything.
    Hunt,
    /// Between flags, collecting data bits.
    Collect,
}

/// Streaming HDLC deframer, one per demodulator slicer.
///
/// Feed post-NRZI data bits with [`HdlcDeframer::rx_bit`]; each closing
/// flag yields at most one [`DeframeEvent`]. Malformed intervals (seven
/// ones, misalignment, runt frames) silently return the machine to flag
/// hunting, because on a radio channel that is just noise.
#[derive(Debug)]
pub struct HdlcDeframer {
    state: State,
    pattern: u8,
    ones: u32,
    bits: Vec<u8>,
}

impl HdlcDeframer {
    pub fn new() -> Self {
        Self { state: State::Hunt, pattern: 0, ones: 0, bits: Vec::new() }
    }

    /// Process one data bit. Returns an event when a closing flag
    /// completes a plausible frame.
    pub fn rx_bit(&mut self, bit: u8) -> Option<DeframeEvent> {
        self.pattern = (self.pattern >> 1) | (bit << 7);

        match self.state {
            State::Hunt => {
                if self.pattern == HDLC_FLAG {
                    self.enter_collect();
                }
                None
            }
            State::Collect => {
                if bit == 1 {
                    self.ones += 1;
                    if self.ones == 7 {
                        // Abort sequence or noise.
                        self.state = State::Hunt;
                        return None;
                    }
                    self.bits.push(1);
                    if self.bits.len() > MAX_FRAME_LEN * 8 {
                        self.state = State::Hunt;
                    }
                    None
                } else if self.ones == 5 {
                    self.ones = 0;
                    None
                } else if self.ones == 6 {
                    let event = self.take_frame();
                    // The flag also opens the next frame.
                    self.enter_collect();
                    event
                } else {
                    self.ones = 0;
                    self.bits.push(0);
                    None
                }
            }
        }
    }

    fn enter_collect(&mut self) {
        self.state = State::Collect;
        self.ones = 0;
        self.bits.clear();
    }

    fn take_frame(&mut self) -> Option<DeframeEvent> {
        if self.bits.len() < 7 {
            return None;
        }
        self.bits.truncate(self.bits.len() - 7);
        if self.bits.len() % 8 != 0 || self.bits.len() / 8 < MIN_FRAME_LEN {
            return None;
        }
        let bytes = pack(&self.bits);
        if fcs_check(&bytes) {
            let mut frame = bytes;
            frame.truncate(frame.len() - 2);
            Some(DeframeEvent::Frame(frame))
        } else {
            Some(DeframeEvent::BadFcs(bytes))
        }
    }
}

impl Default for HdlcDeframer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hdlc::send::{flag_bits, frame_bits};
    use crate::hdlc::{NrziDecoder, NrziEncoder};
    use crate::protocol::Frame;

    fn frame_stream(texts: &[&str]) -> Vec<u8> {
        let mut bits = flag_bits(4);
        for t in texts {
            let f = Frame::from_monitor(t, false).unwrap();
            bits.extend(frame_bits(&f, false));
            bits.extend(flag_bits(2));
        }
        bits
    }

    #[test]
    fn test_streaming_single_frame() {
        let bits = frame_stream(&["W1ABC>APRS:>streaming test"]);
        let mut d = HdlcDeframer::new();
        let mut frames = Vec::new();
        for b in bits {
            if let Some(DeframeEvent::Frame(f)) = d.rx_bit(b) {
                frames.push(f);
            }
        }
        assert_eq!(frames.len(), 1);
        let f = Frame::from_wire(&frames[0]).unwrap();
        assert_eq!(f.to_monitor(), "W1ABC>APRS:>streaming test");
    }

    #[test]
    fn test_streaming_back_to_back_frames() {
        let bits = frame_stream(&["A1A>B2B:first", "C3C>D4D,WIDE1-1:second"]);
        let mut d = HdlcDeframer::new();
        let mut n = 0;
        for b in bits {
            if let Some(DeframeEvent::Frame(_)) = d.rx_bit(b) {
                n += 1;
            }
        }
        assert_eq!(n, 2);
    }

    #[test]
    fn test_streaming_through_nrzi() {
        let bits = frame_stream(&["W1ABC>APRS:nrzi path"]);
        let mut enc = NrziEncoder::new();
        let mut dec = NrziDecoder::new();
        let mut d = HdlcDeframer::new();
        let mut n = 0;
        for b in bits {
            let level = enc.encode(b);
            let bit = dec.decode(level);
            if let Some(DeframeEvent::Frame(_)) = d.rx_bit(bit) {
                n += 1;
            }
        }
        assert_eq!(n, 1);
    }

    #[test]
    fn test_noise_between_frames_ignored() {
        let mut bits = vec![1u8, 0, 1, 1, 0, 1, 1, 1, 0, 0, 1];
        bits.extend(frame_stream(&["W1ABC>APRS:x"]));
        bits.extend([1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 1, 0]);
        let mut d = HdlcDeframer::new();
        let mut n = 0;
        for b in bits {
            if matches!(d.rx_bit(b), Some(DeframeEvent::Frame(_))) {
                n += 1;
            }
        }
        assert_eq!(n, 1);
    }

    #[test]
    fn test_bad_fcs_reported_for_repair() {
        let f = Frame::from_monitor("W1ABC>APRS:x", true).unwrap();
        let mut bits = flag_bits(2);
        bits.extend(frame_bits(&f, true)); // corrupted FCS
        bits.extend(flag_bits(1));
        let mut d = HdlcDeframer::new();
        let mut bad = 0;
        for b in bits {
            if matches!(d.rx_bit(b), Some(DeframeEvent::BadFcs(_))) {
                bad += 1;
            }
        }
        assert_eq!(bad, 1);
    }

    #[test]
    fn test_unstuff_rejects_missing_flag() {
        assert!(unstuff_frame(&[0x00, 0x7E]).is_err());
    }

    #[test]
    fn test_runt_between_flags_is_no_event() {
        let mut d = HdlcDeframer::new();
        let mut bits = flag_bits(1);
        bits.extend([1, 0, 1, 0]); // 4 bits of junk
        bits.extend(flag_bits(1));
        assert!(bits.into_iter().all(|b| d.rx_bit(b).is_none()));
    }
}
