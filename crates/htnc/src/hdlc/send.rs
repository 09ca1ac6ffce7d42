// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transmit-side framing: serialize, append FCS, bit-stuff.
//!
//! Everything here works in unpacked bits (one `u8` per bit, values 0/1)
//! because the modulator consumes bits one at a time and the scheduler
//! needs the exact count to time PTT release.

use crate::hdlc::HDLC_FLAG;
use crate::protocol::{fcs_calc, Frame};

/// Bit-stuff a byte sequence, LSB first: a 0 is inserted after every run
/// of five 1s. The output length is data-dependent.
pub fn stuff_bits(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() * 8 + bytes.len() / 4);
    let mut ones = 0u32;
    for &byte in bytes {
        for i in 0..8 {
            let bit = (byte >> i) & 1;
            out.push(bit);
            if bit == 1 {
                ones += 1;
                if ones == 5 {
                    out.push(0);
                    ones = 0;
                }
            } else {
                ones = 0;
            }
        }
    }
    out
}

/// `count` flags as a bit sequence, no stuffing.
pub fn flag_bits(count: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(count * 8);
    for _ in 0..count {
        for i in 0..8 {
            out.push((HDLC_FLAG >> i) & 1);
        }
    }
    out
}

/// Serialize a frame to its stuffed bit image: wire bytes, FCS low byte
/// first, then stuffing. Flags are not included; the scheduler brackets
/// the whole transmission with its own preamble and postamble flags.
///
/// `corrupt_fcs` deliberately breaks the FCS (test instrumentation for
/// exercising receivers; never set in normal operation).
pub fn frame_bits(frame: &Frame, corrupt_fcs: bool) -> Vec<u8> {
    let mut bytes = frame.to_wire();
    let mut fcs = fcs_calc(&bytes);
    if corrupt_fcs {
        fcs ^= 0x5A5A;
    }
    bytes.push((fcs & 0xFF) as u8);
    bytes.push((fcs >> 8) as u8);
    stuff_bits(&bytes)
}
