// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! XID parameter negotiation (AX.25 v2.2 section 4.3.3.7).
//!
//! The info field of an XID frame is a format indicator, a group
//! identifier, a two-byte group length, then PI/PL/PV triples with
//! big-endian multi-byte values. Every field is optional on the wire;
//! a missing field stays at its "unspecified" sentinel so the data-link
//! machine can apply its own defaults after negotiation.

use crate::error::{Error, Result};

/// Format indicator for general-purpose XID.
const FI_GENERAL: u8 = 0x82;
/// Group identifier: parameter negotiation.
const GI_PARAM_NEGOTIATION: u8 = 0x80;

// Parameter indicators.
const PI_CLASSES_OF_PROCEDURES: u8 = 2;
const PI_HDLC_OPTIONAL_FUNCTIONS: u8 = 3;
const PI_I_FIELD_LENGTH_RX: u8 = 6;
const PI_WINDOW_SIZE_RX: u8 = 8;
const PI_ACK_TIMER: u8 = 9;
const PI_RETRIES: u8 = 10;

// Classes of procedures bits (16-bit PV).
const PV_CLASSES_BALANCED_ABM: u16 = 0x0001;
const PV_CLASSES_HALF_DUPLEX: u16 = 0x0020;
const PV_CLASSES_FULL_DUPLEX: u16 = 0x0040;

// HDLC optional functions bits (24-bit PV).
const PV_OPT_REJ: u32 = 0x000002;
const PV_OPT_SREJ: u32 = 0x000004;
const PV_OPT_EXTENDED_ADDRESS: u32 = 0x000020;
const PV_OPT_MODULO_8: u32 = 0x000400;
const PV_OPT_MODULO_128: u32 = 0x000800;
const PV_OPT_TEST: u32 = 0x002000;
const PV_OPT_FCS_16: u32 = 0x008000;
const PV_OPT_SYNC_TX: u32 = 0x020000;
const PV_OPT_MULTI_SREJ: u32 = 0x200000;

/// Selective-reject capability being negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SrejMode {
    /// Plain REJ only.
    None,
    /// SREJ, one frame per request.
    Single,
    /// Multi-SREJ.
    Multi,
    /// Other side said nothing.
    #[default]
    NotSpecified,
}

/// Sequence-number modulus being negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Modulo {
    M8,
    M128,
    #[default]
    Unknown,
}

/// Whether the XID travels as a command or a response. The info layout
/// is identical either way; the flag feeds the diagnostic text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XidCr {
    Command,
    Response,
}

/// Negotiable link parameters. `None` / sentinel values mean
/// "unspecified" both on encode (field omitted) and parse (field absent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XidParams {
    pub full_duplex: Option<bool>,
    pub srej: SrejMode,
    pub modulo: Modulo,
    /// Largest info field we can receive, in bytes.
    pub i_field_length_rx: Option<u32>,
    /// Receive window size k.
    pub window_size_rx: Option<u32>,
    /// T1 acknowledge timer in milliseconds.
    pub ack_timer_ms: Option<u32>,
    /// N2 retry count.
    pub retries: Option<u32>,
}

impl XidParams {
    /// Serialize to XID info bytes. Unspecified fields are omitted
    /// entirely rather than encoded with a sentinel.
    pub fn encode(&self, cr: XidCr) -> Vec<u8> {
        let mut params: Vec<u8> = Vec::with_capacity(32);

        if let Some(fd) = self.full_duplex {
            let mut v = PV_CLASSES_BALANCED_ABM;
            v |= if fd { PV_CLASSES_FULL_DUPLEX } else { PV_CLASSES_HALF_DUPLEX };
            push_param(&mut params, PI_CLASSES_OF_PROCEDURES, &v.to_be_bytes());
        }

        if self.srej != SrejMode::NotSpecified || self.modulo != Modulo::Unknown {
            let mut v = PV_OPT_EXTENDED_ADDRESS | PV_OPT_TEST | PV_OPT_FCS_16 | PV_OPT_SYNC_TX;
            match self.srej {
                SrejMode::None => v |= PV_OPT_REJ,
                SrejMode::Single => v |= PV_OPT_SREJ,
                SrejMode::Multi => v |= PV_OPT_SREJ | PV_OPT_MULTI_SREJ,
                SrejMode::NotSpecified => {}
            }
            match self.modulo {
                Modulo::M8 => v |= PV_OPT_MODULO_8,
                Modulo::M128 => v |= PV_OPT_MODULO_128,
                Modulo::Unknown => {}
            }
            push_param(&mut params, PI_HDLC_OPTIONAL_FUNCTIONS, &v.to_be_bytes()[1..]);
        }

        if let Some(len) = self.i_field_length_rx {
            // On the wire this is a bit count.
            push_param(&mut params, PI_I_FIELD_LENGTH_RX, &(len * 8).to_be_bytes()[2..]);
        }
        if let Some(k) = self.window_size_rx {
            push_param(&mut params, PI_WINDOW_SIZE_RX, &[(k & 0xFF) as u8]);
        }
        if let Some(t) = self.ack_timer_ms {
            push_param(&mut params, PI_ACK_TIMER, &(t as u16).to_be_bytes());
        }
        if let Some(n) = self.retries {
            push_param(&mut params, PI_RETRIES, &[(n & 0xFF) as u8]);
        }

        let mut out = Vec::with_capacity(4 + params.len());
        out.push(FI_GENERAL);
        out.push(GI_PARAM_NEGOTIATION);
        out.extend_from_slice(&(params.len() as u16).to_be_bytes());
        out.extend_from_slice(&params);

        log::debug!(
            "[Xid] encoded {} ({} param bytes)",
            match cr {
                XidCr::Command => "command",
                XidCr::Response => "response",
            },
            params.len()
        );
        out
    }

    /// Parse XID info bytes. Returns the parameters plus a human-readable
    /// description for the monitor output. Unknown PI codes warn and are
    /// skipped; an empty info field is every parameter unspecified.
    pub fn parse(info: &[u8]) -> Result<(XidParams, String)> {
        let mut p = XidParams::default();
        if info.is_empty() {
            return Ok((p, "(no parameters)".to_string()));
        }
        if info.len() < 4 {
            return Err(Error::MalformedFrame("XID info shorter than FI/GI/GL"));
        }
        if info[0] != FI_GENERAL {
            log::warn!("[Xid] unexpected format indicator 0x{:02x}", info[0]);
        }
        if info[1] != GI_PARAM_NEGOTIATION {
            log::warn!("[Xid] unexpected group identifier 0x{:02x}", info[1]);
        }
        let gl = u16::from_be_bytes([info[2], info[3]]) as usize;
        let mut fields = &info[4..];
        if gl != fields.len() {
            log::warn!("[Xid] group length {} but {} bytes follow", gl, fields.len());
        }

        while fields.len() >= 2 {
            let pi = fields[0];
            let pl = fields[1] as usize;
            if fields.len() < 2 + pl {
                return Err(Error::MalformedFrame("XID parameter truncated"));
            }
            let pv = &fields[2..2 + pl];
            let value = pv.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
            match pi {
                PI_CLASSES_OF_PROCEDURES => {
                    if value & u32::from(PV_CLASSES_FULL_DUPLEX) != 0 {
                        p.full_duplex = Some(true);
                    } else if value & u32::from(PV_CLASSES_HALF_DUPLEX) != 0 {
                        p.full_duplex = Some(false);
                    }
                }
                PI_HDLC_OPTIONAL_FUNCTIONS => {
                    p.srej = if value & PV_OPT_MULTI_SREJ != 0 && value & PV_OPT_SREJ != 0 {
                        SrejMode::Multi
                    } else if value & PV_OPT_SREJ != 0 {
                        SrejMode::Single
                    } else if value & PV_OPT_REJ != 0 {
                        SrejMode::None
                    } else {
                        SrejMode::NotSpecified
                    };
                    p.modulo = if value & PV_OPT_MODULO_128 != 0 {
                        Modulo::M128
                    } else if value & PV_OPT_MODULO_8 != 0 {
                        Modulo::M8
                    } else {
                        Modulo::Unknown
                    };
                }
                PI_I_FIELD_LENGTH_RX => p.i_field_length_rx = Some(value / 8),
                PI_WINDOW_SIZE_RX => p.window_size_rx = Some(value),
                PI_ACK_TIMER => p.ack_timer_ms = Some(value),
                PI_RETRIES => p.retries = Some(value),
                other => {
                    log::warn!("[Xid] unrecognized parameter indicator {} ignored", other);
                }
            }
            fields = &fields[2 + pl..];
        }

        let desc = p.describe();
        Ok((p, desc))
    }

    fn describe(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        match self.full_duplex {
            Some(true) => parts.push("full duplex".to_string()),
            Some(false) => parts.push("half duplex".to_string()),
            None => {}
        }
        match self.srej {
            SrejMode::None => parts.push("REJ".to_string()),
            SrejMode::Single => parts.push("SREJ".to_string()),
            SrejMode::Multi => parts.push("Multi-SREJ".to_string()),
            SrejMode::NotSpecified => {}
        }
        match self.modulo {
            Modulo::M8 => parts.push("modulo 8".to_string()),
            Modulo::M128 => parts.push("modulo 128".to_string()),
            Modulo::Unknown => {}
        }
        if let Some(n) = self.i_field_length_rx {
            parts.push(format!("I field {} bytes", n));
        }
        if let Some(k) = self.window_size_rx {
            parts.push(format!("window {}", k));
        }
        if let Some(t) = self.ack_timer_ms {
            parts.push(format!("ack timer {} ms", t));
        }
        if let Some(n) = self.retries {
            parts.push(format!("retries {}", n));
        }
        if parts.is_empty() {
            "(no parameters)".to_string()
        } else {
            parts.join(", ")
        }
    }
}

fn push_param(out: &mut Vec<u8>, pi: u8, pv: &[u8]) {
    out.push(pi);
    out.push(pv.len() as u8);
    out.extend_from_slice(pv);
}
