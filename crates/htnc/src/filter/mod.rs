// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packet filter expressions.
//!
//! The same little language gates digipeater channel pairs, the RF-to-IS
//! direction and the IS-to-RF direction. An expression is boolean logic
//! (`&` and, `|` or, `!` not, parentheses) over primitives:
//!
//! | form | meaning |
//! |------|---------|
//! | `t/poimqstunw` | packet type letters |
//! | `b/call1/call2` | source ("buddy") list, `*` suffix wildcard |
//! | `o/name` | object or item name |
//! | `d/digi` | heard via this digipeater (used hop) |
//! | `v/digi` | unused digipeater appears in the path |
//! | `u/call` | addressee of an addressed message |
//! | `g/call` | addressee of any message, wildcards allowed |
//! | `s/chars` | symbol code |
//! | `i/call` | source of a wrapped third-party packet |
//! | `r/lat/lon/km` | position within range |
//!
//! Expressions are parsed once at configuration time into an AST and
//! evaluated per frame.

use crate::aprs::info::{classify, message_addressee, object_name, position_of, PacketType};
use crate::error::{Error, Result};
use crate::protocol::Frame;

/// A compiled filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Prim(Prim),
}

/// A single filter primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum Prim {
    Type(Vec<char>),
    Budlist(Vec<String>),
    Object(Vec<String>),
    DigiUsed(Vec<String>),
    DigiUnused(Vec<String>),
    Addressee(Vec<String>),
    MessageGroup(Vec<String>),
    Symbol(String),
    ThirdPartySource(Vec<String>),
    Range { lat: f64, lon: f64, km: f64 },
}

impl Expr {
    /// Parse an expression; whitespace separates tokens.
    pub fn parse(text: &str) -> Result<Expr> {
        let tokens = tokenize(text)?;
        let mut p = Parser { tokens, pos: 0 };
        let expr = p.or_expr()?;
        if p.pos != p.tokens.len() {
            return Err(Error::InvalidConfig(format!(
                "trailing garbage in filter: {:?}",
                &p.tokens[p.pos..]
            )));
        }
        Ok(expr)
    }

    /// Evaluate against one frame.
    pub fn eval(&self, frame: &Frame) -> bool {
        match self {
            Expr::Or(a, b) => a.eval(frame) || b.eval(frame),
            Expr::And(a, b) => a.eval(frame) && b.eval(frame),
            Expr::Not(a) => !a.eval(frame),
            Expr::Prim(p) => p.eval(frame),
        }
    }
}

impl Prim {
    fn eval(&self, frame: &Frame) -> bool {
        let info = frame.info();
        match self {
            Prim::Type(letters) => {
                let t = classify(info);
                letters.iter().any(|&l| type_letter_matches(l, t))
            }
            Prim::Budlist(pats) => matches_any(pats, &frame.source().to_text()),
            Prim::Object(pats) => {
                object_name(info).is_some_and(|n| matches_any(pats, &n))
                    || item_name(info).is_some_and(|n| matches_any(pats, &n))
            }
            Prim::DigiUsed(pats) => (2..frame.num_addrs())
                .filter(|&i| frame.h(i))
                .any(|i| matches_any(pats, &frame.addr_with_ssid(i))),
            Prim::DigiUnused(pats) => (2..frame.num_addrs())
                .filter(|&i| !frame.h(i))
                .any(|i| matches_any(pats, &frame.addr_with_ssid(i))),
            Prim::Addressee(pats) | Prim::MessageGroup(pats) => {
                message_addressee(info).is_some_and(|a| matches_any(pats, &a))
            }
            Prim::Symbol(chars) => {
                position_of(info).is_some_and(|p| chars.contains(p.symbol))
            }
            Prim::ThirdPartySource(pats) => frame
                .unwrap_third_party()
                .map(|inner| matches_any(pats, &inner.source().to_text()))
                .unwrap_or(false),
            Prim::Range { lat, lon, km } => position_of(info)
                .is_some_and(|p| haversine_km(*lat, *lon, p.lat, p.lon) <= *km),
        }
    }
}

fn item_name(info: &[u8]) -> Option<String> {
    if info.first() != Some(&b')') {
        return None;
    }
    let end = info.iter().position(|&b| b == b'!' || b == b'_')?;
    Some(String::from_utf8_lossy(&info[1..end]).trim_end().to_string())
}

fn type_letter_matches(letter: char, t: PacketType) -> bool {
    match letter {
        'p' => matches!(t, PacketType::Position | PacketType::MicE),
        'o' => t == PacketType::Object,
        'i' => t == PacketType::Item,
        'm' => t == PacketType::Message,
        'q' => t == PacketType::Query,
        's' => t == PacketType::Status,
        't' => t == PacketType::Telemetry,
        'u' => t == PacketType::UserDefined,
        'n' => t == PacketType::Object || t == PacketType::Message, // NWS products ride both
        'w' => t == PacketType::Weather,
        _ => false,
    }
}

/// Case-insensitive match with a `*` suffix wildcard. Shared with the
/// digipeater alias lists, which use the same pattern syntax.
pub(crate) fn matches_any(patterns: &[String], value: &str) -> bool {
    patterns.iter().any(|p| {
        if let Some(prefix) = p.strip_suffix('*') {
            value.to_ascii_uppercase().starts_with(&prefix.to_ascii_uppercase())
        } else {
            value.eq_ignore_ascii_case(p)
        }
    })
}

/// Great-circle distance.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const R: f64 = 6371.0;
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * R * a.sqrt().atan2((1.0 - a).sqrt())
}

// ============================================================================
// Parsing
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Or,
    And,
    Not,
    Open,
    Close,
    Prim(Prim),
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut out = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '|' => {
                chars.next();
                out.push(Token::Or);
            }
            '&' => {
                chars.next();
                out.push(Token::And);
            }
            '!' => {
                chars.next();
                out.push(Token::Not);
            }
            '(' => {
                chars.next();
                out.push(Token::Open);
            }
            ')' => {
                chars.next();
                out.push(Token::Close);
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '|' | '&' | '(' | ')') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                out.push(Token::Prim(parse_prim(&word)?));
            }
        }
    }
    Ok(out)
}

fn parse_prim(word: &str) -> Result<Prim> {
    let bad = || Error::InvalidConfig(format!("bad filter primitive: {}", word));
    let (kind, rest) = word.split_at(word.find('/').ok_or_else(bad)?);
    let args: Vec<String> = rest[1..].split('/').map(str::to_string).collect();
    let nonempty = |v: &Vec<String>| !v.is_empty() && v.iter().all(|a| !a.is_empty());

    match kind {
        "t" => {
            let letters: Vec<char> = args.first().ok_or_else(bad)?.chars().collect();
            if letters.is_empty() || !letters.iter().all(|c| "poimqstunw".contains(*c)) {
                return Err(bad());
            }
            Ok(Prim::Type(letters))
        }
        "b" if nonempty(&args) => Ok(Prim::Budlist(args)),
        "o" if nonempty(&args) => Ok(Prim::Object(args)),
        "d" if nonempty(&args) => Ok(Prim::DigiUsed(args)),
        "v" if nonempty(&args) => Ok(Prim::DigiUnused(args)),
        "u" if nonempty(&args) => Ok(Prim::Addressee(args)),
        "g" if nonempty(&args) => Ok(Prim::MessageGroup(args)),
        "i" if nonempty(&args) => Ok(Prim::ThirdPartySource(args)),
        "s" => {
            let chars = args.first().ok_or_else(bad)?;
            if chars.is_empty() {
                return Err(bad());
            }
            Ok(Prim::Symbol(chars.clone()))
        }
        "r" => {
            if args.len() != 3 {
                return Err(bad());
            }
            let lat = args[0].parse().map_err(|_| bad())?;
            let lon = args[1].parse().map_err(|_| bad())?;
            let km = args[2].parse().map_err(|_| bad())?;
            Ok(Prim::Range { lat, lon, km })
        }
        _ => Err(bad()),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::Or) {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        while self.eat(&Token::And) {
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Expr> {
        match self.tokens.get(self.pos).cloned() {
            Some(Token::Open) => {
                self.pos += 1;
                let e = self.or_expr()?;
                if !self.eat(&Token::Close) {
                    return Err(Error::InvalidConfig("missing ) in filter".into()));
                }
                Ok(e)
            }
            Some(Token::Prim(p)) => {
                self.pos += 1;
                Ok(Expr::Prim(p))
            }
            other => Err(Error::InvalidConfig(format!("unexpected filter token: {:?}", other))),
        }
    }

    fn eat(&mut self, t: &Token) -> bool {
        if self.tokens.get(self.pos) == Some(t) {
            self.pos += 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> Frame {
        Frame::from_monitor(text, false).unwrap()
    }

    fn eval(expr: &str, monitor: &str) -> bool {
        Expr::parse(expr).unwrap().eval(&frame(monitor))
    }

    #[test]
    fn test_type_filter() {
        assert!(eval("t/p", "A>B:!4237.14N/07120.83W>"));
        assert!(!eval("t/p", "A>B:>status"));
        assert!(eval("t/ps", "A>B:>status"));
        assert!(eval("t/m", "A>B::W1ABC    :hello"));
    }

    #[test]
    fn test_budlist_wildcards() {
        assert!(eval("b/W1ABC", "W1ABC>APRS:>x"));
        assert!(eval("b/w1abc", "W1ABC>APRS:>x"));
        assert!(!eval("b/W1ABC", "W1ABC-7>APRS:>x"));
        assert!(eval("b/W1ABC*", "W1ABC-7>APRS:>x"));
        assert!(eval("b/K9AAA/W1ABC/N0XYZ", "W1ABC>APRS:>x"));
    }

    #[test]
    fn test_boolean_structure() {
        assert!(eval("t/p | b/W1ABC", "W1ABC>APRS:>status"));
        assert!(!eval("t/p & b/W1ABC", "W1ABC>APRS:>status"));
        assert!(eval("! t/p", "W1ABC>APRS:>status"));
        assert!(eval("( t/p | t/s ) & b/W1*", "W1ABC>APRS:>status"));
    }

    #[test]
    fn test_digi_used_vs_unused() {
        let m = "A>B,K1AAA*,WIDE2-1:>x";
        assert!(eval("d/K1AAA", m));
        assert!(!eval("d/WIDE2-1", m));
        assert!(eval("v/WIDE2-1", m));
        assert!(!eval("v/K1AAA", m));
    }

    #[test]
    fn test_range_filter() {
        // Boston-ish position, filter centered on Boston with 50 km.
        let m = "A>B:!4237.14N/07120.83W>";
        assert!(eval("r/42.6/-71.3/50", m));
        assert!(!eval("r/40.7/-74.0/50", m)); // NYC center, too far
    }

    #[test]
    fn test_object_and_symbol() {
        let m = "A>B:;LEADER   *092345z4237.14N/07120.83W>";
        assert!(eval("o/LEADER", m));
        assert!(eval("o/LEAD*", m));
        assert!(eval("s/>", m));
        assert!(!eval("s/#", m));
    }

    #[test]
    fn test_third_party_source() {
        let m = "GATE>APRS:}W1ABC>APDW18:>via internet";
        assert!(eval("i/W1ABC", m));
        assert!(!eval("i/W1ABC", "W1ABC>APRS:>direct"));
    }

    #[test]
    fn test_message_addressee() {
        let m = "A>B::W1ABC-9  :hello";
        assert!(eval("u/W1ABC-9", m));
        assert!(eval("g/W1*", m));
        assert!(!eval("u/K9ZZZ", m));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Expr::parse("t/z").is_err());
        assert!(Expr::parse("( t/p").is_err());
        assert!(Expr::parse("bogus").is_err());
        assert!(Expr::parse("r/1/2").is_err());
        assert!(Expr::parse("t/p t/s").is_err());
    }

    #[test]
    fn test_haversine_sanity() {
        // Boston to NYC is roughly 300 km.
        let d = haversine_km(42.36, -71.06, 40.71, -74.01);
        assert!((290.0..320.0).contains(&d), "{}", d);
    }
}
