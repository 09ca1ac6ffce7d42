// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Info-field builders for everything this station originates:
//! position reports, object reports and messages.
//!
//! Layout rules worth remembering: the course/speed data extension wins
//! over PHG when both are configured; the frequency spec comes right
//! after the extension; altitude goes at the front of the comment.

/// A position report to be rendered into an info field.
#[derive(Debug, Clone)]
pub struct PositionReport {
    /// `=` (messaging-capable) vs `!`.
    pub messaging: bool,
    pub compressed: bool,
    pub lat: f64,
    pub lon: f64,
    /// 0..=4 digits of the minutes blanked for privacy.
    pub ambiguity: u8,
    pub symbol_table: char,
    pub symbol: char,
    /// Transmitter power in watts, for PHG.
    pub power: Option<u32>,
    /// Antenna height above average terrain, feet, for PHG.
    pub height: Option<u32>,
    /// Antenna gain in dB, for PHG.
    pub gain: Option<u32>,
    /// Antenna direction ("N", "NE", ...), for PHG.
    pub dir: Option<String>,
    pub course: Option<u32>,
    pub speed_knots: Option<u32>,
    pub freq_mhz: Option<f64>,
    pub tone_hz: Option<f64>,
    /// Repeater offset in kHz.
    pub offset_khz: Option<i32>,
    pub alt_ft: Option<i32>,
    pub comment: String,
}

impl Default for PositionReport {
    fn default() -> Self {
        Self {
            messaging: false,
            compressed: false,
            lat: 0.0,
            lon: 0.0,
            ambiguity: 0,
            symbol_table: '/',
            symbol: '-',
            power: None,
            height: None,
            gain: None,
            dir: None,
            course: None,
            speed_knots: None,
            freq_mhz: None,
            tone_hz: None,
            offset_khz: None,
            alt_ft: None,
            comment: String::new(),
        }
    }
}

impl PositionReport {
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(64);
        out.push(if self.messaging { '=' } else { '!' });
        self.encode_coordinates(&mut out);
        self.encode_tail(&mut out, self.compressed);
        out
    }

    fn encode_coordinates(&self, out: &mut String) {
        if self.compressed {
            out.push(compressed_table(self.symbol_table));
            out.push_str(&base91(380926.0 * (90.0 - self.lat)));
            out.push_str(&base91(190463.0 * (180.0 + self.lon)));
            out.push(self.symbol);
            match (self.course, self.speed_knots) {
                (Some(c), Some(s)) => {
                    out.push((b'!' + ((c % 360) / 4) as u8) as char);
                    let sc = (f64::from(s) + 1.0).ln() / 1.08f64.ln();
                    out.push((b'!' + (sc.round() as u8).min(89)) as char);
                    // Compression type: current GPS fix, RMC source.
                    out.push((b'!' + 0x38) as char);
                }
                _ => out.push_str("   "),
            }
        } else {
            out.push_str(&latitude(self.lat, self.ambiguity));
            out.push(self.symbol_table);
            out.push_str(&longitude(self.lon, self.ambiguity));
            out.push(self.symbol);
        }
    }

    /// Extensions and comment, shared with object reports.
    fn encode_tail(&self, out: &mut String, compressed: bool) {
        // Course/speed and PHG both live in the 7-byte data extension
        // slot, so only one fits; course/speed carries more information.
        if !compressed {
            if let (Some(c), Some(s)) = (self.course, self.speed_knots) {
                out.push_str(&format!("{:03}/{:03}", c % 360, s.min(999)));
            } else if let (Some(p), Some(h), Some(g)) = (self.power, self.height, self.gain) {
                let p_code = (f64::from(p).sqrt().round() as u32).min(9);
                let h_code = if h >= 10 {
                    ((f64::from(h) / 10.0).log2().round() as u32).min(9)
                } else {
                    0
                };
                let d_code = self
                    .dir
                    .as_deref()
                    .and_then(direction_code)
                    .unwrap_or(0);
                out.push_str(&format!("PHG{}{}{}{}", p_code, h_code, g.min(9), d_code));
            }
        }

        if let Some(mhz) = self.freq_mhz {
            out.push_str(&format!("{:07.3}MHz ", mhz));
            if let Some(t) = self.tone_hz {
                out.push_str(&format!("T{:03} ", t.round() as u32));
            }
            if let Some(o) = self.offset_khz {
                // Transmit offset in 10 kHz units, signed, e.g. +060.
                out.push_str(&format!("{:+04} ", o / 10));
            }
        }

        if let Some(alt) = self.alt_ft {
            out.push_str(&format!("/A={:06}", alt.clamp(-99999, 999999)));
        }
        out.push_str(&self.comment);
    }
}

/// An object report. Position semantics match [`PositionReport`].
#[derive(Debug, Clone)]
pub struct ObjectReport {
    pub name: String,
    /// `*` live vs `_` killed.
    pub live: bool,
    /// `DDHHMM` UTC; rendered with the `z` suffix.
    pub time_dhm: String,
    pub position: PositionReport,
}

impl ObjectReport {
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(64);
        out.push(';');
        out.push_str(&format!("{:<9.9}", self.name));
        out.push(if self.live { '*' } else { '_' });
        out.push_str(&format!("{:.6}z", self.time_dhm));
        self.position.encode_coordinates(&mut out);
        self.position.encode_tail(&mut out, self.position.compressed);
        out
    }
}

/// `:addressee:text{id`.
pub fn encode_message(addressee: &str, text: &str, id: Option<&str>) -> String {
    let mut out = format!(":{:<9.9}:{}", addressee, text);
    if let Some(id) = id {
        out.push('{');
        out.push_str(&id[..id.len().min(5)]);
    }
    out
}

fn latitude(mut lat: f64, ambiguity: u8) -> String {
    lat = lat.clamp(-90.0, 90.0);
    let hemi = if lat < 0.0 { 'S' } else { 'N' };
    let lat = lat.abs();
    let deg = lat.floor();
    let min = (lat - deg) * 60.0;
    let mut text = format!("{:02}{:05.2}{}", deg as u32, min, hemi);
    blank_for_ambiguity(&mut text, ambiguity, 2);
    text
}

fn longitude(mut lon: f64, ambiguity: u8) -> String {
    lon = lon.clamp(-180.0, 180.0);
    let hemi = if lon < 0.0 { 'W' } else { 'E' };
    let lon = lon.abs();
    let deg = lon.floor();
    let min = (lon - deg) * 60.0;
    let mut text = format!("{:03}{:05.2}{}", deg as u32, min, hemi);
    blank_for_ambiguity(&mut text, ambiguity, 3);
    text
}

/// Blank minutes digits from the right: 1 -> tenth of a minute ... 4 ->
/// whole degrees only.
fn blank_for_ambiguity(text: &mut String, ambiguity: u8, deg_digits: usize) {
    // Digit positions within ddmm.mm, skipping the period.
    let order = [deg_digits + 4, deg_digits + 3, deg_digits + 1, deg_digits];
    let n = (ambiguity as usize).min(4);
    let mut bytes = std::mem::take(text).into_bytes();
    for &ix in order.iter().take(n) {
        bytes[ix] = b' ';
    }
    *text = String::from_utf8(bytes).unwrap_or_default();
}

fn compressed_table(table: char) -> char {
    // Digit overlays can't appear in the compressed form directly;
    // they map to a-j so the reader can tell it apart from plain text.
    match table {
        '0'..='9' => ((table as u8 - b'0') + b'a') as char,
        t => t,
    }
}

fn base91(value: f64) -> String {
    let mut v = value.round().max(0.0) as u64;
    let mut chars = [0u8; 4];
    for c in chars.iter_mut().rev() {
        *c = (v % 91) as u8 + 33;
        v /= 91;
    }
    chars.iter().map(|&c| c as char).collect()
}

fn direction_code(dir: &str) -> Option<u32> {
    match dir.to_ascii_uppercase().as_str() {
        "N" => Some(8),
        "NE" => Some(1),
        "E" => Some(2),
        "SE" => Some(3),
        "S" => Some(4),
        "SW" => Some(5),
        "W" => Some(6),
        "NW" => Some(7),
        _ => None,
    }
}
