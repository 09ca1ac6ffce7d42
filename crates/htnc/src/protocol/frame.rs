// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The AX.25 frame object.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::fcs::CrcBuilder;

/// Index of the destination address.
pub const AX25_DESTINATION: usize = 0;
/// Index of the source address.
pub const AX25_SOURCE: usize = 1;
/// Index of the first repeater address.
pub const AX25_REPEATER_1: usize = 2;
/// Maximum number of repeater addresses.
pub const AX25_MAX_REPEATERS: usize = 8;
/// Maximum total addresses (destination + source + repeaters).
pub const AX25_MAX_ADDRS: usize = 10;
/// Maximum info field length accepted on receive.
pub const AX25_MAX_INFO_LEN: usize = 2048;
/// Control byte for a UI frame (poll/final clear).
pub const AX25_UI_FRAME: u8 = 0x03;
/// PID for "no layer 3", used by APRS.
pub const AX25_PID_NO_LAYER_3: u8 = 0xF0;

/// One AX.25 address: callsign, SSID, has-been-repeated bit and the two
/// reserved bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    call: String,
    ssid: u8,
    h: bool,
    rr: u8,
}

impl Address {
    /// Strict AX.25 address: 1..=6 upper-alphanumeric characters,
    /// SSID 0..=15.
    pub fn new(call: &str, ssid: u8) -> Result<Self> {
        if call.is_empty()
            || call.len() > 6
            || !call.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        {
            return Err(Error::InvalidAddress(call.to_string()));
        }
        if ssid > 15 {
            return Err(Error::InvalidAddress(format!("{}-{}", call, ssid)));
        }
        Ok(Self { call: call.to_string(), ssid, h: false, rr: 3 })
    }

    /// Relaxed address for IGate use: server-side pseudo-callsigns may be
    /// long and SSIDs alphanumeric. The SSID text is kept inside `call`
    /// when it is not a plain number.
    pub fn new_lax(text: &str) -> Result<Self> {
        if text.is_empty() || text.len() > 12 || !text.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(Error::InvalidAddress(text.to_string()));
        }
        // Split a trailing numeric SSID if present; otherwise keep as-is.
        if let Some((base, ssid_text)) = text.rsplit_once('-') {
            if let Ok(n) = ssid_text.parse::<u8>() {
                if n <= 15 && !base.is_empty() && base.len() <= 6 {
                    return Ok(Self { call: base.to_string(), ssid: n, h: false, rr: 3 });
                }
            }
        }
        Ok(Self { call: text.to_string(), ssid: 0, h: false, rr: 3 })
    }

    pub fn call(&self) -> &str {
        &self.call
    }

    pub fn ssid(&self) -> u8 {
        self.ssid
    }

    pub fn set_ssid(&mut self, ssid: u8) {
        self.ssid = ssid & 0x0F;
    }

    pub fn h(&self) -> bool {
        self.h
    }

    pub fn set_h(&mut self, h: bool) {
        self.h = h;
    }

    /// Same station: callsign and SSID both equal. H and RR don't count.
    pub fn matches(&self, other: &Address) -> bool {
        self.call == other.call && self.ssid == other.ssid
    }

    /// `CALL` or `CALL-SSID`, no H marker.
    pub fn to_text(&self) -> String {
        if self.ssid == 0 {
            self.call.clone()
        } else {
            format!("{}-{}", self.call, self.ssid)
        }
    }

    /// 7-byte wire form. `last` sets the address-extension bit.
    pub(crate) fn to_wire(&self, last: bool) -> [u8; 7] {
        let mut out = [b' ' << 1; 7];
        for (i, b) in self.call.bytes().take(6).enumerate() {
            out[i] = b << 1;
        }
        out[6] = (u8::from(self.h) << 7) | (self.rr << 5) | (self.ssid << 1) | u8::from(last);
        out
    }

    /// Decode a 7-byte wire address; returns (address, was-last).
    pub(crate) fn from_wire(raw: &[u8]) -> Result<(Self, bool)> {
        debug_assert_eq!(raw.len(), 7);
        let mut call = String::with_capacity(6);
        for &b in &raw[..6] {
            let ch = b >> 1;
            if ch == b' ' {
                break;
            }
            if !(ch.is_ascii_uppercase() || ch.is_ascii_digit()) {
                return Err(Error::InvalidAddress(format!("0x{:02x} in callsign", ch)));
            }
            call.push(ch as char);
        }
        if call.is_empty() {
            return Err(Error::InvalidAddress("empty callsign".to_string()));
        }
        let ssid_byte = raw[6];
        let addr = Self {
            call,
            ssid: (ssid_byte >> 1) & 0x0F,
            h: ssid_byte & 0x80 != 0,
            rr: (ssid_byte >> 5) & 0x03,
        };
        Ok((addr, ssid_byte & 0x01 != 0))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Coarse frame classification from the control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Information frame (connected mode data).
    I,
    /// Supervisory frame (RR, RNR, REJ, SREJ).
    S,
    /// Unnumbered frame other than UI.
    U,
    /// Unnumbered information frame.
    Ui,
}

/// An AX.25 frame.
///
/// Addresses are stored in wire order: destination, source, then
/// repeaters. The info field is raw bytes and may contain NULs.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    addrs: Vec<Address>,
    control: u8,
    pid: Option<u8>,
    info: Vec<u8>,
    /// Set only while parked in the SATgate delay queue: monotonic time
    /// at which the frame becomes eligible for forwarding.
    pub release_time: Option<Duration>,
}

impl Frame {
    /// Build a UI frame, the shape used by everything APRS.
    pub fn new_ui(source: Address, destination: Address, vias: Vec<Address>, info: &[u8]) -> Self {
        let mut addrs = Vec::with_capacity(2 + vias.len());
        addrs.push(destination);
        addrs.push(source);
        addrs.extend(vias.into_iter().take(AX25_MAX_REPEATERS));
        Self {
            addrs,
            control: AX25_UI_FRAME,
            pid: Some(AX25_PID_NO_LAYER_3),
            info: info.to_vec(),
            release_time: None,
        }
    }

    pub(crate) fn from_parts(
        addrs: Vec<Address>,
        control: u8,
        pid: Option<u8>,
        info: Vec<u8>,
    ) -> Self {
        debug_assert!(addrs.len() >= 2 && addrs.len() <= AX25_MAX_ADDRS);
        Self { addrs, control, pid, info, release_time: None }
    }

    // ========================================================================
    // Addresses
    // ========================================================================

    pub fn num_addrs(&self) -> usize {
        self.addrs.len()
    }

    pub fn num_repeaters(&self) -> usize {
        self.addrs.len() - 2
    }

    pub fn addr(&self, index: usize) -> Option<&Address> {
        self.addrs.get(index)
    }

    pub fn addr_mut(&mut self, index: usize) -> Option<&mut Address> {
        self.addrs.get_mut(index)
    }

    /// `CALL-SSID` text of the address at `index`.
    pub fn addr_with_ssid(&self, index: usize) -> String {
        self.addrs.get(index).map(Address::to_text).unwrap_or_default()
    }

    pub fn source(&self) -> &Address {
        &self.addrs[AX25_SOURCE]
    }

    pub fn destination(&self) -> &Address {
        &self.addrs[AX25_DESTINATION]
    }

    pub fn set_addr(&mut self, index: usize, addr: Address) {
        if index < self.addrs.len() {
            self.addrs[index] = addr;
        }
    }

    /// Insert a repeater at `index` (>= [`AX25_REPEATER_1`]), shifting the
    /// rest down. Silently refuses beyond 10 total addresses.
    pub fn insert_addr(&mut self, index: usize, addr: Address) {
        if self.addrs.len() < AX25_MAX_ADDRS
            && index >= AX25_REPEATER_1
            && index <= self.addrs.len()
        {
            self.addrs.insert(index, addr);
        }
    }

    pub fn remove_addr(&mut self, index: usize) {
        if index >= AX25_REPEATER_1 && index < self.addrs.len() {
            self.addrs.remove(index);
        }
    }

    pub fn h(&self, index: usize) -> bool {
        self.addrs.get(index).is_some_and(Address::h)
    }

    pub fn set_h(&mut self, index: usize) {
        if let Some(a) = self.addrs.get_mut(index) {
            a.set_h(true);
        }
    }

    pub fn ssid(&self, index: usize) -> u8 {
        self.addrs.get(index).map_or(0, Address::ssid)
    }

    /// Index of the first repeater whose H bit is still clear, i.e. the
    /// hop a digipeater would act on. `None` when the path is used up.
    pub fn first_not_repeated(&self) -> Option<usize> {
        (AX25_REPEATER_1..self.addrs.len()).find(|&i| !self.addrs[i].h())
    }

    // ========================================================================
    // Control / PID / info
    // ========================================================================

    pub fn control(&self) -> u8 {
        self.control
    }

    pub fn pid(&self) -> Option<u8> {
        self.pid
    }

    pub fn frame_type(&self) -> FrameType {
        if self.control & 0x01 == 0 {
            FrameType::I
        } else if self.control & 0x03 == 0x01 {
            FrameType::S
        } else if self.control & !0x10 == AX25_UI_FRAME {
            FrameType::Ui
        } else {
            FrameType::U
        }
    }

    /// True for UI frames with PID "no layer 3": the APRS shape.
    pub fn is_aprs(&self) -> bool {
        self.frame_type() == FrameType::Ui && self.pid == Some(AX25_PID_NO_LAYER_3)
    }

    pub fn info(&self) -> &[u8] {
        &self.info
    }

    pub fn set_info(&mut self, info: Vec<u8>) {
        self.info = info;
    }

    /// Truncate the info at the first CR or LF. APRS-IS is line-oriented,
    /// so anything after a line break would corrupt the stream.
    pub fn cut_at_crlf(&mut self) {
        if let Some(pos) = self.info.iter().position(|&b| b == b'\r' || b == b'\n') {
            self.info.truncate(pos);
        }
    }

    // ========================================================================
    // Derived values
    // ========================================================================

    /// CRC over source, destination and info only. Two copies of the same
    /// logical packet hash identically no matter what the repeater path
    /// or H bits look like.
    pub fn dedupe_crc(&self) -> u16 {
        let mut b = CrcBuilder::new();
        b.add(self.source().to_text().as_bytes());
        b.add(self.destination().to_text().as_bytes());
        b.add(&self.info);
        b.finish()
    }

    /// When the info starts with `}`, the remainder is itself a
    /// monitor-format packet; return it decoded (non-strict, since the
    /// inner source may have crossed the Internet).
    pub fn unwrap_third_party(&self) -> Result<Frame> {
        if self.info.first() != Some(&b'}') {
            return Err(Error::MalformedThirdParty);
        }
        let inner = String::from_utf8_lossy(&self.info[1..]);
        Frame::from_monitor(&inner, false).map_err(|_| Error::MalformedThirdParty)
    }

    // ========================================================================
    // Wire codec
    // ========================================================================

    /// Serialize to addresses + control + PID + info. The FCS and flags
    /// belong to the framing layer.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.addrs.len() * 7 + 2 + self.info.len());
        let last = self.addrs.len() - 1;
        for (i, a) in self.addrs.iter().enumerate() {
            out.extend_from_slice(&a.to_wire(i == last));
        }
        out.push(self.control);
        if let Some(pid) = self.pid {
            out.push(pid);
        }
        out.extend_from_slice(&self.info);
        out
    }

    /// Decode addresses + control + PID + info (no FCS, no flags).
    pub fn from_wire(data: &[u8]) -> Result<Frame> {
        let mut addrs = Vec::new();
        let mut pos = 0;
        loop {
            if pos + 7 > data.len() {
                return Err(Error::MalformedFrame("truncated address field"));
            }
            let (addr, last) = Address::from_wire(&data[pos..pos + 7])?;
            addrs.push(addr);
            pos += 7;
            if last {
                break;
            }
            if addrs.len() >= AX25_MAX_ADDRS {
                return Err(Error::MalformedFrame("more than 10 addresses"));
            }
        }
        if addrs.len() < 2 {
            return Err(Error::MalformedFrame("fewer than 2 addresses"));
        }
        if pos >= data.len() {
            return Err(Error::MalformedFrame("missing control byte"));
        }
        let control = data[pos];
        pos += 1;

        // PID follows only for I and UI frames.
        let has_pid = control & 0x01 == 0 || control & !0x10 == AX25_UI_FRAME;
        let pid = if has_pid {
            if pos >= data.len() {
                return Err(Error::MalformedFrame("missing PID"));
            }
            let p = data[pos];
            pos += 1;
            Some(p)
        } else {
            None
        };

        let info = data[pos..].to_vec();
        if info.len() > AX25_MAX_INFO_LEN {
            return Err(Error::MalformedFrame("info field too long"));
        }
        Ok(Frame::from_parts(addrs, control, pid, info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ui(src: &str, dst: &str, vias: &[&str], info: &[u8]) -> Frame {
        let vias = vias
            .iter()
            .map(|v| {
                let (c, s) = v.rsplit_once('-').unwrap_or((v, "0"));
                Address::new(c, s.parse().unwrap()).unwrap()
            })
            .collect();
        let (sc, ss) = src.rsplit_once('-').unwrap_or((src, "0"));
        let (dc, ds) = dst.rsplit_once('-').unwrap_or((dst, "0"));
        Frame::new_ui(
            Address::new(sc, ss.parse().unwrap()).unwrap(),
            Address::new(dc, ds.parse().unwrap()).unwrap(),
            vias,
            info,
        )
    }

    #[test]
    fn test_strict_address_rules() {
        assert!(Address::new("W1ABC", 0).is_ok());
        assert!(Address::new("W1ABC", 15).is_ok());
        assert!(Address::new("W1ABC", 16).is_err());
        assert!(Address::new("TOOLONG", 0).is_err());
        assert!(Address::new("", 0).is_err());
        assert!(Address::new("w1abc", 0).is_err());
    }

    #[test]
    fn test_lax_accepts_server_calls() {
        let a = Address::new_lax("SECOND.aprs").unwrap();
        assert_eq!(a.call(), "SECOND.aprs");
        assert_eq!(a.ssid(), 0);

        let b = Address::new_lax("W1ABC-7").unwrap();
        assert_eq!(b.call(), "W1ABC");
        assert_eq!(b.ssid(), 7);
    }

    #[test]
    fn test_wire_roundtrip() {
        let f = ui("W1ABC-7", "APRS", &["WIDE1-1", "WIDE2-2"], b">status here");
        let wire = f.to_wire();
        let g = Frame::from_wire(&wire).unwrap();
        assert_eq!(f, g);
    }

    #[test]
    fn test_wire_roundtrip_with_nul_info() {
        let f = ui("W1ABC", "APRS", &[], b"a\x00b\x00c");
        let g = Frame::from_wire(&f.to_wire()).unwrap();
        assert_eq!(g.info(), b"a\x00b\x00c");
    }

    #[test]
    fn test_first_not_repeated() {
        let mut f = ui("W1ABC", "APRS", &["K1AAA", "K1BBB", "K1CCC"], b"x");
        assert_eq!(f.first_not_repeated(), Some(2));
        f.set_h(2);
        assert_eq!(f.first_not_repeated(), Some(3));
        f.set_h(3);
        f.set_h(4);
        assert_eq!(f.first_not_repeated(), None);
    }

    #[test]
    fn test_dedupe_crc_ignores_path_and_h() {
        let a = ui("W1ABC", "APRS", &["WIDE1-1"], b">hello");
        let mut b = ui("W1ABC", "APRS", &["K1ZZZ-3", "WIDE2-1"], b">hello");
        b.set_h(2);
        assert_eq!(a.dedupe_crc(), b.dedupe_crc());

        let c = ui("W1ABC", "APRS", &[], b">hello!");
        assert_ne!(a.dedupe_crc(), c.dedupe_crc());
    }

    #[test]
    fn test_cut_at_crlf() {
        let mut f = ui("W1ABC", "APRS", &[], b">hi\r\nINJECTED>X:bad");
        f.cut_at_crlf();
        assert_eq!(f.info(), b">hi");
    }

    #[test]
    fn test_is_aprs() {
        let f = ui("W1ABC", "APRS", &[], b">hi");
        assert!(f.is_aprs());
        let mut g = f.clone();
        g.pid = Some(0xCC);
        assert!(!g.is_aprs());
    }

    #[test]
    fn test_unwrap_third_party() {
        let f = ui("A1A", "B2B", &["C3C"], b"}D4D>E5E,F6F:info");
        let inner = f.unwrap_third_party().unwrap();
        assert_eq!(inner.source().to_text(), "D4D");
        assert_eq!(inner.destination().to_text(), "E5E");
        assert_eq!(inner.info(), b"info");

        let g = ui("A1A", "B2B", &[], b"no brace");
        assert!(g.unwrap_third_party().is_err());
    }

    #[test]
    fn test_insert_respects_limits() {
        let mut f = ui(
            "W1ABC",
            "APRS",
            &["R1", "R2", "R3", "R4", "R5", "R6", "R7", "R8"],
            b"x",
        );
        assert_eq!(f.num_repeaters(), 8);
        f.insert_addr(2, Address::new("NEW", 0).unwrap());
        assert_eq!(f.num_repeaters(), 8); // full; refused
    }

    #[test]
    fn test_frame_type() {
        let f = ui("W1ABC", "APRS", &[], b"x");
        assert_eq!(f.frame_type(), FrameType::Ui);
        let sabm = Frame::from_parts(
            vec![Address::new("A", 0).unwrap(), Address::new("B", 0).unwrap()],
            0x3F,
            None,
            vec![],
        );
        assert_eq!(sabm.frame_type(), FrameType::U);
        let rr = Frame::from_parts(
            vec![Address::new("A", 0).unwrap(), Address::new("B", 0).unwrap()],
            0x01,
            None,
            vec![],
        );
        assert_eq!(rr.frame_type(), FrameType::S);
    }
}
