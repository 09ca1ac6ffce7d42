// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IL2P: Improved Layer 2 Protocol.
//!
//! # Wire Format
//!
//! ```text
//! +-----------+---------------------+------------------------+-------+
//! | sync word | header 13B + 2B RS  | payload blocks, each   | CRC   |
//! | 0xF15E48  | (scrambled)         | scrambled + RS parity  | 4B opt|
//! +-----------+---------------------+------------------------+-------+
//! ```
//!
//! Bits travel MSB first and nothing is NRZI coded; the scrambler (a
//! multiplicative LFSR on transmit, the matching divisive LFSR on
//! receive, taps 0x108, seed 0x1F0) runs over the header and over each
//! payload block independently, restarting every time. The header packs
//! both callsigns in six-bit characters and scatters the control, PID
//! and payload-length fields across the spare top bits.
//!
//! Two header types exist. Type 1 translates simple UI frames into the
//! compact form; anything with repeaters or an exotic PID rides as a
//! type 0 "transparent" payload carrying the whole AX.25 frame image.
//! The optional trailing CRC (16 bits, each nibble Hamming(8,4) coded)
//! is enabled by configuration on both ends of the link.

use crate::error::{Error, Result};
use crate::fec::rs::{decode_rs, encode_rs};
use crate::protocol::{crc16, Address, Frame, AX25_PID_NO_LAYER_3, AX25_UI_FRAME};

/// 24-bit sync word preceding every IL2P frame.
pub const SYNC_WORD: u32 = 0xF15E48;

/// Header bytes before Reed-Solomon parity.
pub const HEADER_SIZE: usize = 13;
/// Reed-Solomon check bytes protecting the header.
pub const HEADER_PARITY: usize = 2;
/// Largest payload the 10-bit count field can describe.
pub const MAX_PAYLOAD: usize = 1023;

const LFSR_MASK: u64 = 0x108;
const LFSR_SEED: u64 = 0x1F0;

// ============================================================================
// Scrambler
// ============================================================================

/// Multiplicative (self-synchronizing) scrambler, transmit side.
struct TxScrambler {
    state: u64,
}

impl TxScrambler {
    fn new() -> Self {
        Self { state: LFSR_SEED }
    }

    #[inline]
    fn bit(&mut self, b: u8) -> u8 {
        let out = 1 & (b ^ self.state as u8);
        self.state = (self.state >> 1) ^ (LFSR_MASK * u64::from(out));
        out
    }
}

/// Divisive descrambler, receive side. Feeding it the transmit output
/// with the same seed reproduces the input exactly.
struct RxDescrambler {
    state: u64,
}

impl RxDescrambler {
    fn new() -> Self {
        Self { state: LFSR_SEED }
    }

    #[inline]
    fn bit(&mut self, b: u8) -> u8 {
        let out = 1 & (b ^ self.state as u8);
        self.state = (self.state >> 1) ^ (LFSR_MASK * u64::from(b));
        out
    }
}

fn scramble_block(data: &mut [u8]) {
    let mut s = TxScrambler::new();
    for byte in data {
        let mut out = 0u8;
        for i in (0..8).rev() {
            out |= s.bit((*byte >> i) & 1) << i;
        }
        *byte = out;
    }
}

fn descramble_block(data: &mut [u8]) {
    let mut s = RxDescrambler::new();
    for byte in data {
        let mut out = 0u8;
        for i in (0..8).rev() {
            out |= s.bit((*byte >> i) & 1) << i;
        }
        *byte = out;
    }
}

// ============================================================================
// PID translation
// ============================================================================

/// AX.25 PID values that fit the 4-bit IL2P code space.
const PID_MAP: [(u8, u8); 9] = [
    (0x01, 3),  // ISO 8208 / X.25 PLP
    (0x06, 4),  // compressed TCP/IP
    (0x07, 5),  // uncompressed TCP/IP
    (0x08, 6),  // segmentation fragment
    (0xCC, 11), // ARPA IP
    (0xCD, 12), // ARPA ARP
    (0xCE, 13), // FlexNet
    (0xCF, 14), // TheNET
    (AX25_PID_NO_LAYER_3, 15),
];

fn pid_to_il2p(pid: u8) -> Option<u8> {
    PID_MAP.iter().find(|&&(a, _)| a == pid).map(|&(_, n)| n)
}

fn pid_from_il2p(code: u8) -> Option<u8> {
    PID_MAP.iter().find(|&&(_, n)| n == code).map(|&(a, _)| a)
}

// ============================================================================
// Payload geometry
// ============================================================================

/// How a payload of a given length is cut into RS blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadParams {
    pub block_count: usize,
    /// Data bytes in a small block; large blocks carry one more.
    pub small_size: usize,
    pub large_count: usize,
    /// Check bytes per block.
    pub parity: usize,
}

impl PayloadParams {
    /// Data size of block `i`; large blocks come first.
    pub fn block_data_size(&self, i: usize) -> usize {
        if i < self.large_count {
            self.small_size + 1
        } else {
            self.small_size
        }
    }
}

/// Geometry for `len` payload bytes. `None` above the 10-bit limit.
pub fn payload_params(len: usize, max_fec: bool) -> Option<PayloadParams> {
    if len > MAX_PAYLOAD {
        return None;
    }
    if len == 0 {
        return Some(PayloadParams { block_count: 0, small_size: 0, large_count: 0, parity: 0 });
    }
    let max_data = if max_fec { 239 } else { 247 };
    let block_count = len.div_ceil(max_data);
    let small_size = len / block_count;
    let large_count = len - small_size * block_count;
    let parity = if max_fec {
        16
    } else {
        // Light FEC scales with block size, bounded to stay decodable.
        (small_size / 32 + 2).min(16)
    };
    Some(PayloadParams { block_count, small_size, large_count, parity })
}

// ============================================================================
// Hamming(8,4) for the optional trailing CRC
// ============================================================================

fn hamming84(nibble: u8) -> u8 {
    let d = [nibble & 1, (nibble >> 1) & 1, (nibble >> 2) & 1, (nibble >> 3) & 1];
    let p0 = d[0] ^ d[1] ^ d[3];
    let p1 = d[0] ^ d[2] ^ d[3];
    let p2 = d[1] ^ d[2] ^ d[3];
    let mut code = (nibble << 4) | (p2 << 2) | (p1 << 1) | p0;
    // Overall parity in bit 3.
    code |= (code.count_ones() as u8 & 1) << 3;
    code
}

fn unhamming84(byte: u8) -> Option<u8> {
    // Sixteen codewords; accept at Hamming distance <= 1.
    (0u8..16).find(|&n| (hamming84(n) ^ byte).count_ones() <= 1)
}

// ============================================================================
// Header codec
// ============================================================================

struct Header {
    dst: Address,
    src: Address,
    hdr_type1: bool,
    ui: bool,
    max_fec: bool,
    pid: u8,
    control: u8,
    payload_size: usize,
}

fn sixbit_compatible(call: &str) -> bool {
    call.len() <= 6 && call.bytes().all(|b| (0x20..0x60).contains(&b))
}

fn sixbit_encode(call: &str, out: &mut [u8]) -> bool {
    if call.len() > 6 {
        return false;
    }
    for (i, b) in call.bytes().enumerate() {
        if !(0x20..0x60).contains(&b) {
            return false;
        }
        out[i] = (b - 0x20) & 0x3F;
    }
    true
}

fn sixbit_decode(data: &[u8]) -> String {
    data.iter()
        .map(|&c| c & 0x3F)
        .filter(|&c| c > 0)
        .map(|c| (c + 0x20) as char)
        .collect()
}

fn header_encode(h: &Header) -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    sixbit_encode(h.dst.call(), &mut out[0..6]);
    sixbit_encode(h.src.call(), &mut out[6..12]);
    out[12] = (h.dst.ssid() << 4) | h.src.ssid();

    out[0] |= u8::from(h.max_fec) << 7;
    out[0] |= u8::from(h.ui) << 6;
    out[1] |= u8::from(h.hdr_type1) << 7;
    for i in 0..4 {
        out[1 + i] |= ((h.pid >> (3 - i)) & 1) << 6;
    }
    for i in 0..7 {
        out[5 + i] |= ((h.control >> (6 - i)) & 1) << 6;
    }
    for i in 0..10 {
        out[2 + i] |= (((h.payload_size >> (9 - i)) & 1) as u8) << 7;
    }
    out
}

fn header_decode(data: &[u8; HEADER_SIZE]) -> Result<Header> {
    let max_fec = data[0] & 0x80 != 0;
    let ui = data[0] & 0x40 != 0;
    let hdr_type1 = data[1] & 0x80 != 0;
    let pid = (0..4).fold(0u8, |acc, i| (acc << 1) | ((data[1 + i] >> 6) & 1));
    let control = (0..7).fold(0u8, |acc, i| (acc << 1) | ((data[5 + i] >> 6) & 1));
    let payload_size =
        (0..10).fold(0usize, |acc, i| (acc << 1) | usize::from((data[2 + i] >> 7) & 1));

    let dst_call = sixbit_decode(&data[0..6]);
    let src_call = sixbit_decode(&data[6..12]);
    let (dst, src) = if hdr_type1 {
        (
            Address::new(&dst_call, data[12] >> 4)
                .map_err(|_| Error::MalformedFrame("bad IL2P destination"))?,
            Address::new(&src_call, data[12] & 0x0F)
                .map_err(|_| Error::MalformedFrame("bad IL2P source"))?,
        )
    } else {
        // Type 0 carries the real addresses in the payload; these
        // placeholders are never surfaced.
        let placeholder = Address::new("N0CALL", 0).expect("placeholder callsign is valid");
        (placeholder.clone(), placeholder)
    };
    Ok(Header { dst, src, hdr_type1, ui, max_fec, pid, control, payload_size })
}

// ============================================================================
// Encoder
// ============================================================================

/// A decoded IL2P frame plus total RS byte corrections across the
/// header and payload blocks.
#[derive(Debug)]
pub struct Il2pDecoded {
    pub frame: Frame,
    pub corrected: usize,
}

/// Encode a frame for IL2P transmission: sync word through last parity
/// (and the optional CRC tail). `None` when the payload cannot fit.
pub fn encode(frame: &Frame, max_fec: bool, append_crc: bool) -> Option<Vec<u8>> {
    // Decide header type. Type 1 handles plain two-address UI frames
    // with a translatable PID; everything else is transparent type 0.
    let type1 = frame.frame_type() == crate::protocol::FrameType::Ui
        && frame.num_repeaters() == 0
        && frame.pid().and_then(pid_to_il2p).is_some()
        && sixbit_compatible(frame.source().call())
        && sixbit_compatible(frame.destination().call());

    let (header, payload) = if type1 {
        let h = Header {
            dst: frame.destination().clone(),
            src: frame.source().clone(),
            hdr_type1: true,
            ui: true,
            max_fec,
            pid: pid_to_il2p(frame.pid().unwrap_or(AX25_PID_NO_LAYER_3))?,
            control: ((frame.control() >> 4) & 1) << 6,
            payload_size: frame.info().len(),
        };
        (h, frame.info().to_vec())
    } else {
        let wire = frame.to_wire();
        let h = Header {
            dst: frame.destination().clone(),
            src: frame.source().clone(),
            hdr_type1: false,
            ui: false,
            max_fec,
            pid: 0,
            control: 0,
            payload_size: wire.len(),
        };
        (h, wire)
    };

    let params = payload_params(payload.len(), max_fec)?;

    let mut out = Vec::with_capacity(
        3 + HEADER_SIZE + HEADER_PARITY + payload.len() + params.block_count * params.parity + 4,
    );
    out.extend_from_slice(&SYNC_WORD.to_be_bytes()[1..]);

    let mut hdr = header_encode(&header);
    scramble_block(&mut hdr);
    let hdr_parity = encode_rs(&hdr, HEADER_PARITY);
    out.extend_from_slice(&hdr);
    out.extend_from_slice(&hdr_parity);

    let mut offset = 0;
    for i in 0..params.block_count {
        let size = params.block_data_size(i);
        let mut block = payload[offset..offset + size].to_vec();
        offset += size;
        scramble_block(&mut block);
        let parity = encode_rs(&block, params.parity);
        out.extend_from_slice(&block);
        out.extend_from_slice(&parity);
    }

    if append_crc {
        let crc = crc16(&payload);
        out.push(hamming84((crc >> 12) as u8 & 0x0F));
        out.push(hamming84((crc >> 8) as u8 & 0x0F));
        out.push(hamming84((crc >> 4) as u8 & 0x0F));
        out.push(hamming84(crc as u8 & 0x0F));
    }
    Some(out)
}

// ============================================================================
// Receiver
// ============================================================================

#[derive(Default)]
enum RxState {
    #[default]
    SyncSearch,
    Header {
        bytes: Vec<u8>,
    },
    Payload {
        header: Header,
        params: PayloadParams,
        block_index: usize,
        block: Vec<u8>,
        payload: Vec<u8>,
        corrected: usize,
    },
    Crc {
        header: Header,
        payload: Vec<u8>,
        corrected: usize,
        bytes: Vec<u8>,
    },
}

/// Streaming IL2P receiver for one channel.
pub struct Il2pReceiver {
    expect_crc: bool,
    accum: u32,
    state: RxState,
    partial: u8,
    nbits: u8,
}

impl Il2pReceiver {
    pub fn new(expect_crc: bool) -> Self {
        Self { expect_crc, accum: 0, state: RxState::SyncSearch, partial: 0, nbits: 0 }
    }

    /// Process one received bit, MSB first. No NRZI anywhere in IL2P.
    pub fn rx_bit(&mut self, bit: u8) -> Option<Il2pDecoded> {
        if matches!(self.state, RxState::SyncSearch) {
            self.accum = ((self.accum << 1) | u32::from(bit)) & 0x00FF_FFFF;
            if (self.accum ^ SYNC_WORD).count_ones() <= 1 {
                self.state = RxState::Header { bytes: Vec::with_capacity(HEADER_SIZE + HEADER_PARITY) };
                self.partial = 0;
                self.nbits = 0;
            }
            return None;
        }

        self.partial = (self.partial << 1) | bit;
        self.nbits += 1;
        if self.nbits < 8 {
            return None;
        }
        let byte = self.partial;
        self.partial = 0;
        self.nbits = 0;
        self.rx_byte(byte)
    }

    fn rx_byte(&mut self, byte: u8) -> Option<Il2pDecoded> {
        match std::mem::take(&mut self.state) {
            RxState::SyncSearch => None,
            RxState::Header { mut bytes } => {
                bytes.push(byte);
                if bytes.len() < HEADER_SIZE + HEADER_PARITY {
                    self.state = RxState::Header { bytes };
                    return None;
                }
                match decode_header(&mut bytes) {
                    Ok((header, corrected)) => self.begin_payload(header, corrected),
                    Err(_) => {
                        self.reset();
                        None
                    }
                }
            }
            RxState::Payload { header, params, block_index, mut block, mut payload, mut corrected } => {
                block.push(byte);
                let want = params.block_data_size(block_index) + params.parity;
                if block.len() < want {
                    self.state =
                        RxState::Payload { header, params, block_index, block, payload, corrected };
                    return None;
                }
                match decode_rs(&mut block, params.parity) {
                    Ok(n) => corrected += n,
                    Err(_) => {
                        self.reset();
                        return None;
                    }
                }
                let data_len = block.len() - params.parity;
                block.truncate(data_len);
                descramble_block(&mut block);
                payload.extend_from_slice(&block);

                if block_index + 1 < params.block_count {
                    self.state = RxState::Payload {
                        header,
                        params,
                        block_index: block_index + 1,
                        block: Vec::new(),
                        payload,
                        corrected,
                    };
                    None
                } else if self.expect_crc {
                    self.state = RxState::Crc { header, payload, corrected, bytes: Vec::new() };
                    None
                } else {
                    self.finish(&header, payload, corrected)
                }
            }
            RxState::Crc { header, payload, corrected, mut bytes } => {
                bytes.push(byte);
                if bytes.len() < 4 {
                    self.state = RxState::Crc { header, payload, corrected, bytes };
                    return None;
                }
                let nibbles: Option<Vec<u8>> = bytes.iter().map(|&b| unhamming84(b)).collect();
                let ok = nibbles.is_some_and(|n| {
                    let rx_crc = (u16::from(n[0]) << 12)
                        | (u16::from(n[1]) << 8)
                        | (u16::from(n[2]) << 4)
                        | u16::from(n[3]);
                    rx_crc == crc16(&payload)
                });
                if ok {
                    self.finish(&header, payload, corrected)
                } else {
                    log::debug!("[Il2p] trailing CRC mismatch, frame dropped");
                    self.reset();
                    None
                }
            }
        }
    }

    fn begin_payload(&mut self, header: Header, corrected: usize) -> Option<Il2pDecoded> {
        let Some(params) = payload_params(header.payload_size, header.max_fec) else {
            self.reset();
            return None;
        };
        if header.payload_size == 0 {
            if self.expect_crc {
                self.state = RxState::Crc { header, payload: Vec::new(), corrected, bytes: Vec::new() };
                return None;
            }
            return self.finish(&header, Vec::new(), corrected);
        }
        self.state = RxState::Payload {
            header,
            params,
            block_index: 0,
            block: Vec::new(),
            payload: Vec::new(),
            corrected,
        };
        None
    }

    fn finish(&mut self, header: &Header, payload: Vec<u8>, corrected: usize) -> Option<Il2pDecoded> {
        self.reset();
        let frame = if header.hdr_type1 {
            let control = AX25_UI_FRAME | (((header.control >> 6) & 1) << 4);
            let pid = pid_from_il2p(header.pid)?;
            Frame::from_parts(
                vec![header.dst.clone(), header.src.clone()],
                control,
                Some(pid),
                payload,
            )
        } else {
            match Frame::from_wire(&payload) {
                Ok(f) => f,
                Err(_) => {
                    log::debug!("[Il2p] transparent payload is not a valid frame");
                    return None;
                }
            }
        };
        Some(Il2pDecoded { frame, corrected })
    }

    fn reset(&mut self) {
        self.state = RxState::SyncSearch;
        self.accum = 0;
        self.partial = 0;
        self.nbits = 0;
    }
}

fn decode_header(bytes: &mut [u8]) -> Result<(Header, usize)> {
    let corrected = decode_rs(bytes, HEADER_PARITY)?;
    let mut hdr = [0u8; HEADER_SIZE];
    hdr.copy_from_slice(&bytes[..HEADER_SIZE]);
    descramble_block(&mut hdr);
    let header = header_decode(&hdr)?;
    Ok((header, corrected))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits_msb(bytes: &[u8]) -> impl Iterator<Item = u8> + '_ {
        bytes.iter().flat_map(|&b| (0..8).rev().map(move |i| (b >> i) & 1))
    }

    fn receive(wire: &[u8], expect_crc: bool) -> Vec<Il2pDecoded> {
        let mut rx = Il2pReceiver::new(expect_crc);
        let mut out = Vec::new();
        for bit in bits_msb(wire) {
            if let Some(d) = rx.rx_bit(bit) {
                out.push(d);
            }
        }
        out
    }

    #[test]
    fn test_scrambler_inverts() {
        let mut data: Vec<u8> = (0u16..64).map(|i| (i * 13 + 5) as u8).collect();
        let original = data.clone();
        scramble_block(&mut data);
        assert_ne!(data, original);
        descramble_block(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_type1_roundtrip() {
        let f = Frame::from_monitor("W1ABC-7>APRS-2:>il2p type one", true).unwrap();
        let wire = encode(&f, true, false).unwrap();
        assert_eq!(&wire[..3], &[0xF1, 0x5E, 0x48]);
        let got = receive(&wire, false);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].frame, f);
        assert_eq!(got[0].corrected, 0);
    }

    #[test]
    fn test_type0_roundtrip_with_path() {
        // Repeaters force the transparent encapsulation.
        let f = Frame::from_monitor("W1ABC>APRS,WIDE1-1,WIDE2-1:>via path", true).unwrap();
        let wire = encode(&f, true, false).unwrap();
        let got = receive(&wire, false);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].frame, f);
    }

    #[test]
    fn test_corrects_errors_in_header_and_payload() {
        let f = Frame::from_monitor("W1ABC>APRS:some payload to protect", true).unwrap();
        let mut wire = encode(&f, true, false).unwrap();
        wire[4] ^= 0x42; // header byte
        wire[3 + 15 + 3] ^= 0x99; // payload block byte
        let got = receive(&wire, false);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].frame, f);
        assert_eq!(got[0].corrected, 2);
    }

    #[test]
    fn test_sync_word_tolerates_one_bit() {
        let f = Frame::from_monitor("W1ABC>APRS:sync nick", true).unwrap();
        let mut wire = encode(&f, true, false).unwrap();
        wire[1] ^= 0x04;
        let got = receive(&wire, false);
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn test_trailing_crc_accept_and_reject() {
        let f = Frame::from_monitor("W1ABC>APRS:crc guarded", true).unwrap();
        let wire = encode(&f, true, true).unwrap();
        let got = receive(&wire, true);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].frame, f);

        // Corrupt beyond what RS protects: smash all four CRC bytes.
        let mut bad = wire.clone();
        let n = bad.len();
        for b in &mut bad[n - 4..] {
            *b = !*b;
        }
        assert!(receive(&bad, true).is_empty());
    }

    #[test]
    fn test_multi_block_payload() {
        let info: String = (0..600).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let f = Frame::from_monitor(&format!("W1ABC>APRS:{}", info), true).unwrap();
        let wire = encode(&f, true, false).unwrap();
        let params = payload_params(f.info().len(), true).unwrap();
        assert!(params.block_count >= 3);
        let got = receive(&wire, false);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].frame, f);
    }

    #[test]
    fn test_payload_params_geometry() {
        let p = payload_params(1023, true).unwrap();
        assert_eq!(p.block_count, 5);
        // All blocks together carry exactly the payload.
        let total: usize = (0..p.block_count).map(|i| p.block_data_size(i)).sum();
        assert_eq!(total, 1023);

        let p = payload_params(100, false).unwrap();
        assert_eq!(p.block_count, 1);
        assert!(p.parity < 16);

        assert!(payload_params(1024, true).is_none());
    }

    #[test]
    fn test_hamming84_single_error() {
        for n in 0..16u8 {
            let code = hamming84(n);
            assert_eq!(unhamming84(code), Some(n));
            for bit in 0..8 {
                assert_eq!(unhamming84(code ^ (1 << bit)), Some(n), "nibble {} bit {}", n, bit);
            }
        }
    }

    #[test]
    fn test_oversize_payload_refused() {
        let info = vec![b'x'; 1100];
        let f = Frame::new_ui(
            Address::new("W1ABC", 0).unwrap(),
            Address::new("APRS", 0).unwrap(),
            vec![],
            &info,
        );
        assert!(encode(&f, true, false).is_none());
    }
}
