// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Universal codec properties: things that must hold for all inputs.

use htnc::fec::rs::{decode_rs, encode_rs};
use htnc::hdlc::{flag_bits, frame_bits, unstuff_frame, NrziDecoder, NrziEncoder};
use htnc::protocol::xid::{Modulo, SrejMode, XidCr, XidParams};
use htnc::protocol::{fcs_calc, fcs_check, Frame};

fn pack_lsb(bits: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; bits.len().div_ceil(8)];
    for (i, &b) in bits.iter().enumerate() {
        out[i / 8] |= b << (i % 8);
    }
    out
}

#[test]
fn frame_text_roundtrip_strict() {
    for text in [
        "W1ABC>APRS:>status",
        "W1ABC-7>APDW18,WIDE1-1,WIDE2-2:!4237.14N/07120.83W>car",
        "K9XYZ-15>BEACON,K1AAA*,K2BBB*:x",
        "A>B::W1ABC-9  :message text{42",
    ] {
        let f = Frame::from_monitor(text, true).unwrap();
        assert_eq!(f.to_monitor(), text);
        let g = Frame::from_wire(&f.to_wire()).unwrap();
        assert_eq!(f, g, "{}", text);
    }
}

#[test]
fn fcs_roundtrip_arbitrary_bytes() {
    let mut rng = fastrand::Rng::with_seed(7);
    for len in [0usize, 1, 17, 100, 330, 1000] {
        let body: Vec<u8> = (0..len).map(|_| rng.u8(..)).collect();
        let fcs = fcs_calc(&body);
        let mut wire = body;
        wire.push((fcs & 0xFF) as u8);
        wire.push((fcs >> 8) as u8);
        assert!(fcs_check(&wire));
    }
}

#[test]
fn stuffing_roundtrip_and_no_six_ones() {
    let mut rng = fastrand::Rng::with_seed(11);
    for _ in 0..50 {
        let len = rng.usize(18..300);
        let text = format!(
            "W1ABC>APRS:{}",
            (0..len).map(|_| char::from(rng.u8(0x20..0x7E))).collect::<String>()
        );
        let Ok(frame) = Frame::from_monitor(&text, true) else { continue };

        let stuffed = frame_bits(&frame, false);
        let mut run = 0;
        for &b in &stuffed {
            if b == 1 {
                run += 1;
                assert!(run < 6, "six ones inside stuffed data");
            } else {
                run = 0;
            }
        }

        let mut stream = flag_bits(2);
        stream.extend(stuffed);
        stream.extend(flag_bits(1));
        let recovered = unstuff_frame(&pack_lsb(&stream)).unwrap();
        assert_eq!(Frame::from_wire(&recovered).unwrap(), frame);
    }
}

#[test]
fn nrzi_roundtrip() {
    let mut rng = fastrand::Rng::with_seed(13);
    let bits: Vec<u8> = (0..500).map(|_| rng.u8(..) & 1).collect();
    let mut enc = NrziEncoder::new();
    let mut dec = NrziDecoder::new();
    let out: Vec<u8> = bits.iter().map(|&b| dec.decode(enc.encode(b))).collect();
    assert_eq!(&out[1..], &bits[1..]);
}

#[test]
fn dedupe_crc_path_insensitive() {
    let base = Frame::from_monitor("W1ABC>APRS:>same logical packet", true).unwrap();
    for path in [
        "W1ABC>APRS,WIDE1-1:>same logical packet",
        "W1ABC>APRS,K1AAA*,K2BBB*,WIDE2-1:>same logical packet",
        "W1ABC>APRS,N0CALL-1*:>same logical packet",
    ] {
        let f = Frame::from_monitor(path, true).unwrap();
        assert_eq!(f.dedupe_crc(), base.dedupe_crc(), "{}", path);
    }
    let other = Frame::from_monitor("W1ABC>APRS:>different packet", true).unwrap();
    assert_ne!(other.dedupe_crc(), base.dedupe_crc());
}

#[test]
fn xid_roundtrip_fully_specified() {
    for (srej, modulo) in [
        (SrejMode::None, Modulo::M8),
        (SrejMode::Single, Modulo::M128),
        (SrejMode::Multi, Modulo::M8),
    ] {
        let p = XidParams {
            full_duplex: Some(false),
            srej,
            modulo,
            i_field_length_rx: Some(256),
            window_size_rx: Some(63),
            ack_timer_ms: Some(3000),
            retries: Some(10),
        };
        let (q, _) = XidParams::parse(&p.encode(XidCr::Command)).unwrap();
        assert_eq!(p, q);
    }
}

#[test]
fn xid_empty_info_is_all_unspecified() {
    let (p, _) = XidParams::parse(&[]).unwrap();
    assert_eq!(p, XidParams::default());
}

#[test]
fn rs_corrects_up_to_half_nroots_and_counts() {
    let mut rng = fastrand::Rng::with_seed(17);
    for &(data_len, nroots) in &[(239usize, 16usize), (223, 32), (191, 64), (64, 16), (13, 2)] {
        let data: Vec<u8> = (0..data_len).map(|_| rng.u8(..)).collect();
        let parity = encode_rs(&data, nroots);
        for nerr in [0, 1, nroots / 2] {
            let mut block = data.clone();
            block.extend_from_slice(&parity);
            let mut positions: Vec<usize> = (0..block.len()).collect();
            fastrand::Rng::with_seed(rng.u64(..)).shuffle(&mut positions);
            for &p in positions.iter().take(nerr) {
                block[p] ^= rng.u8(1..=255);
            }
            let corrected = decode_rs(&mut block, nroots).unwrap();
            assert_eq!(corrected, nerr, "len {} roots {}", data_len, nroots);
            assert_eq!(&block[..data_len], &data[..]);
        }
    }
}
