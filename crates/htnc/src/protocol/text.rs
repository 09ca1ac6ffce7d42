// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Monitor-format text codec: `SRC>DEST,VIA1,VIA2*:info`.
//!
//! This is the human-readable form used on APRS-IS lines, in logs and in
//! beacon configuration. Strict mode enforces AX.25 callsign rules for
//! frames that will go to RF; non-strict admits the overlong server
//! pseudo-callsigns and alphanumeric SSIDs seen on Internet-originated
//! packets.

use crate::error::{Error, Result};
use crate::protocol::frame::{Address, Frame, AX25_MAX_REPEATERS};

impl Frame {
    /// Parse monitor-format text into a UI frame.
    pub fn from_monitor(text: &str, strict: bool) -> Result<Frame> {
        Frame::from_monitor_bytes(text.as_bytes(), strict)
    }

    /// Byte-level variant that keeps the info field exactly as received,
    /// including any embedded binary.
    pub fn from_monitor_bytes(line: &[u8], strict: bool) -> Result<Frame> {
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or(Error::MalformedFrame("no colon in monitor text"))?;
        let (head, rest) = line.split_at(colon);
        let info = &rest[1..];

        let head = std::str::from_utf8(head)
            .map_err(|_| Error::MalformedFrame("non-UTF8 address field"))?;

        let gt = head
            .find('>')
            .ok_or(Error::MalformedFrame("no > in monitor text"))?;
        let (src_text, dst_and_path) = head.split_at(gt);
        let mut parts = dst_and_path[1..].split(',');
        let dst_text = parts.next().unwrap_or_default();

        let source = parse_addr(src_text, strict)?;
        let destination = parse_addr(dst_text, strict)?;

        let mut vias: Vec<Address> = Vec::new();
        let mut last_used: Option<usize> = None;
        for via in parts {
            if vias.len() >= AX25_MAX_REPEATERS {
                return Err(Error::InvalidAddress(format!("too many repeaters: {}", via)));
            }
            let (via_text, starred) = match via.strip_suffix('*') {
                Some(t) => (t, true),
                None => (via, false),
            };
            // Repeaters that have crossed the Internet can be pseudo
            // callsigns (qAR, TCPIP), so they are never strict.
            let a = parse_addr(via_text, false)?;
            if starred {
                last_used = Some(vias.len());
            }
            vias.push(a);
        }
        // A star marks the last repeater actually used; everything before
        // it is implied used as well.
        if let Some(last) = last_used {
            for v in &mut vias[..=last] {
                v.set_h(true);
            }
        }

        Ok(Frame::new_ui(source, destination, vias, info))
    }

    /// `SRC>DEST[,VIA*...]:` with a star on every H-set repeater.
    pub fn format_addresses(&self) -> String {
        let mut out = String::with_capacity(10 * self.num_addrs());
        out.push_str(&self.source().to_text());
        out.push('>');
        out.push_str(&self.destination().to_text());
        for i in 2..self.num_addrs() {
            out.push(',');
            out.push_str(&self.addr_with_ssid(i));
            if self.h(i) {
                out.push('*');
            }
        }
        out.push(':');
        out
    }

    /// Full monitor text; info rendered lossily for display.
    pub fn to_monitor(&self) -> String {
        let mut out = self.format_addresses();
        out.push_str(&String::from_utf8_lossy(self.info()));
        out
    }

    /// Full monitor line as raw bytes; info is byte-exact. This is the
    /// form written to APRS-IS.
    pub fn to_monitor_bytes(&self) -> Vec<u8> {
        let mut out = self.format_addresses().into_bytes();
        out.extend_from_slice(self.info());
        out
    }
}

fn parse_addr(text: &str, strict: bool) -> Result<Address> {
    if strict {
        match text.rsplit_once('-') {
            Some((call, ssid_text)) => {
                let ssid: u8 = ssid_text
                    .parse()
                    .map_err(|_| Error::InvalidAddress(text.to_string()))?;
                Address::new(call, ssid)
            }
            None => Address::new(text, 0),
        }
    } else {
        Address::new_lax(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let f = Frame::from_monitor("W1ABC>APRS:>hello world", true).unwrap();
        assert_eq!(f.source().to_text(), "W1ABC");
        assert_eq!(f.destination().to_text(), "APRS");
        assert_eq!(f.num_repeaters(), 0);
        assert_eq!(f.info(), b">hello world");
        assert!(f.is_aprs());
    }

    #[test]
    fn test_parse_with_path_and_star() {
        let f = Frame::from_monitor("W1ABC-7>APRS,K1AAA,K1BBB*,WIDE2-1:x", true).unwrap();
        assert_eq!(f.num_repeaters(), 3);
        // Star on K1BBB implies K1AAA was used too.
        assert!(f.h(2));
        assert!(f.h(3));
        assert!(!f.h(4));
    }

    #[test]
    fn test_roundtrip_format() {
        let text = "W1ABC-7>APRS,K1AAA*,WIDE2-1:>hi";
        let f = Frame::from_monitor(text, true).unwrap();
        assert_eq!(f.to_monitor(), text);
    }

    #[test]
    fn test_strict_rejects_what_lax_accepts() {
        assert!(Frame::from_monitor("TOOLONGCALL>APRS:x", true).is_err());
        assert!(Frame::from_monitor("TOOLONGCALL>APRS:x", false).is_ok());

        assert!(Frame::from_monitor("W1ABC-16>APRS:x", true).is_err());
        // Alphanumeric SSID survives as part of the lax callsign.
        let f = Frame::from_monitor("W1ABC-7A>APRS:x", false).unwrap();
        assert_eq!(f.source().call(), "W1ABC-7A");
    }

    #[test]
    fn test_missing_colon_or_gt() {
        assert!(Frame::from_monitor("W1ABC>APRS", true).is_err());
        assert!(Frame::from_monitor("W1ABC:APRS", true).is_err());
    }

    #[test]
    fn test_info_colon_kept() {
        let f = Frame::from_monitor("A>B::ADDRESSEE:msg text{01", false).unwrap();
        assert_eq!(f.info(), b":ADDRESSEE:msg text{01");
    }

    #[test]
    fn test_empty_info() {
        let f = Frame::from_monitor("A>B:", false).unwrap();
        assert!(f.info().is_empty());
    }

    #[test]
    fn test_too_many_repeaters() {
        let text = "A>B,R1,R2,R3,R4,R5,R6,R7,R8,R9:x";
        assert!(Frame::from_monitor(text, false).is_err());
    }
}
