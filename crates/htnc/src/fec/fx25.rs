// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! FX.25: AX.25 frames inside Reed-Solomon codeblocks.
//!
//! # Wire Format
//!
//! ```text
//! +---------------------+----------------------+------------------+
//! | correlation tag     | data bytes           | RS check bytes   |
//! | 64 bits, LSB first  | HDLC frame + fill    | 16 / 32 / 64     |
//! +---------------------+----------------------+------------------+
//! ```
//!
//! The data region holds an ordinary flag-delimited, bit-stuffed AX.25
//! frame (so a plain HDLC receiver still hears it), topped up with flag
//! fill bits to the next byte and zero bytes to the tag's data size.
//! Nothing here is NRZI coded.
//!
//! The receiver slides a 64-bit accumulator along the bit stream and
//! accepts any of the eleven tags within Hamming distance 1, then
//! collects exactly one codeblock and hands it to the RS decoder.

use crate::config::Fx25Strength;
use crate::error::Result;
use crate::fec::rs::{decode_rs, encode_rs};
use crate::hdlc::{flag_bits, frame_bits, unstuff_frame, HDLC_FLAG};
use crate::protocol::Frame;

/// One correlation-tag parameter set: `data + check` bytes follow the
/// tag on the wire (shortened from RS(255)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagInfo {
    pub tag: u64,
    pub data_size: usize,
    pub check_size: usize,
}

impl TagInfo {
    pub fn block_size(&self) -> usize {
        self.data_size + self.check_size
    }
}

/// Lowest assigned correlation tag number.
pub const CTAG_MIN: u8 = 0x01;
/// Highest assigned correlation tag number.
pub const CTAG_MAX: u8 = 0x0B;

/// Correlation tag table from the FX.25 specification. Index 0 is the
/// reserved tag and never transmitted.
pub const TAGS: [TagInfo; 12] = [
    TagInfo { tag: 0x566ED2717946107E, data_size: 0, check_size: 0 },
    TagInfo { tag: 0xB74DB7DF8A532F3E, data_size: 239, check_size: 16 },
    TagInfo { tag: 0x26FF60A600CC8FDE, data_size: 128, check_size: 16 },
    TagInfo { tag: 0xC7DC0508F3D9B09E, data_size: 64, check_size: 16 },
    TagInfo { tag: 0x8F056EB4369660EE, data_size: 32, check_size: 16 },
    TagInfo { tag: 0x6E260B1AC5835FAE, data_size: 223, check_size: 32 },
    TagInfo { tag: 0xFF94DC634F1CFF4E, data_size: 128, check_size: 32 },
    TagInfo { tag: 0x1EB7B9CDBC09C00E, data_size: 64, check_size: 32 },
    TagInfo { tag: 0xDBF869BD2DBB1776, data_size: 191, check_size: 64 },
    TagInfo { tag: 0x3ADB0C13DEAE2836, data_size: 128, check_size: 64 },
    TagInfo { tag: 0xAB69DB6A543188D6, data_size: 64, check_size: 64 },
    TagInfo { tag: 0x4A4ABEC4A724B796, data_size: 32, check_size: 32 },
];

/// Pick the correlation tag for a stuffed frame image of `need` data
/// bytes, honoring the configured strength. `None` when nothing fits.
pub fn pick_tag(need: usize, strength: Fx25Strength) -> Option<u8> {
    let candidates: &[u8] = match strength {
        Fx25Strength::Check16 => &[0x04, 0x03, 0x02, 0x01],
        Fx25Strength::Check32 => &[0x0B, 0x07, 0x06, 0x05],
        Fx25Strength::Check64 => &[0x0A, 0x09, 0x08],
        // Auto: smallest block that fits, strongest check available at
        // that size.
        Fx25Strength::Auto => &[0x04, 0x0B, 0x0A, 0x09, 0x08, 0x05, 0x01],
    };
    candidates
        .iter()
        .copied()
        .find(|&id| TAGS[id as usize].data_size >= need)
}

/// Encode a frame as one FX.25 transmission: tag then codeblock.
/// Returns `None` when the stuffed frame exceeds every tag's capacity
/// (the caller falls back to plain AX.25).
pub fn encode(frame: &Frame, strength: Fx25Strength, corrupt_fcs: bool) -> Option<Vec<u8>> {
    // Flag, stuffed frame, flag; then flag-pattern fill bits to the next
    // byte boundary.
    let mut bits = flag_bits(1);
    bits.extend(frame_bits(frame, corrupt_fcs));
    bits.extend(flag_bits(1));
    while bits.len() % 8 != 0 {
        bits.push((HDLC_FLAG >> (bits.len() % 8)) & 1);
    }
    let mut data: Vec<u8> = vec![0u8; bits.len() / 8];
    for (i, &b) in bits.iter().enumerate() {
        data[i / 8] |= b << (i % 8);
    }

    let tag_id = pick_tag(data.len(), strength)?;
    let info = &TAGS[tag_id as usize];
    data.resize(info.data_size, 0);
    let check = encode_rs(&data, info.check_size);

    let mut out = Vec::with_capacity(8 + info.block_size());
    out.extend_from_slice(&info.tag.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&check);
    log::debug!(
        "[Fx25] encoded {} data + {} check bytes, tag 0x{:02x}",
        info.data_size,
        info.check_size,
        tag_id
    );
    Some(out)
}

#[derive(Debug)]
enum RxState {
    /// Sliding the 64-bit accumulator, looking for a tag.
    TagSearch,
    /// Collecting one codeblock.
    Collect { tag_id: u8, bytes: Vec<u8>, bit: u8, partial: u8 },
}

/// A decoded FX.25 frame plus how many byte errors the RS stage fixed.
#[derive(Debug)]
pub struct Fx25Decoded {
    pub frame: Frame,
    pub corrected: usize,
}

/// Streaming FX.25 receiver for one channel. Runs in parallel with the
/// plain HDLC deframers on the same bit stream.
#[derive(Debug)]
pub struct Fx25Receiver {
    accum: u64,
    state: RxState,
    /// Blocks that failed RS decode or FCS check, for diagnostics.
    rejects: u64,
}

impl Fx25Receiver {
    pub fn new() -> Self {
        Self { accum: 0, state: RxState::TagSearch, rejects: 0 }
    }

    /// True while a codeblock is being collected. The subchannel
    /// duplicate-suppression window must wait for this to go false,
    /// because a codeblock outlasts the plain-AX.25 copy of the same
    /// frame by many byte times.
    pub fn busy(&self) -> bool {
        matches!(self.state, RxState::Collect { .. })
    }

    /// Process one received bit (LSB-first within bytes, not NRZI).
    pub fn rx_bit(&mut self, bit: u8) -> Option<Fx25Decoded> {
        // Take ownership of the state; every path below either puts a
        // new one back or deliberately falls to TagSearch.
        match std::mem::replace(&mut self.state, RxState::TagSearch) {
            RxState::TagSearch => {
                self.accum = (self.accum >> 1) | (u64::from(bit) << 63);
                if let Some(tag_id) = match_tag(self.accum) {
                    self.state = RxState::Collect {
                        tag_id,
                        bytes: Vec::with_capacity(TAGS[tag_id as usize].block_size()),
                        bit: 0,
                        partial: 0,
                    };
                }
                None
            }
            RxState::Collect { tag_id, mut bytes, bit: mut nbit, mut partial } => {
                partial |= bit << nbit;
                nbit += 1;
                if nbit == 8 {
                    bytes.push(partial);
                    partial = 0;
                    nbit = 0;
                }
                let info = &TAGS[tag_id as usize];
                if bytes.len() < info.block_size() {
                    self.state = RxState::Collect { tag_id, bytes, bit: nbit, partial };
                    return None;
                }
                self.accum = 0;
                match decode_block(&mut bytes, info.check_size) {
                    Ok(decoded) => Some(decoded),
                    Err(_) => {
                        // Resume the tag search silently; failed blocks
                        // are ordinary channel noise.
                        self.rejects += 1;
                        log::debug!("[Fx25] block rejected ({} so far)", self.rejects);
                        None
                    }
                }
            }
        }
    }
}

impl Default for Fx25Receiver {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_block(block: &mut [u8], check: usize) -> Result<Fx25Decoded> {
    let corrected = decode_rs(block, check)?;
    let data_len = block.len() - check;
    let frame_bytes = unstuff_frame(&block[..data_len])?;
    let frame = Frame::from_wire(&frame_bytes)?;
    Ok(Fx25Decoded { frame, corrected })
}

/// Match the accumulator against every assigned tag, tolerating one
/// flipped bit.
fn match_tag(accum: u64) -> Option<u8> {
    for id in CTAG_MIN..=CTAG_MAX {
        if (accum ^ TAGS[id as usize].tag).count_ones() <= 1 {
            return Some(id);
        }
    }
    None
}
