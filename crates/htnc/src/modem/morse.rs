// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Morse code tone rendering for the MORSE transmit flavor.
//!
//! Timing follows the standard PARIS convention: a dit is 1.2/WPM
//! seconds, a dah three dits, one dit between elements, three between
//! characters, seven between words.

use crate::core::SampleSink;
use crate::error::Result;
use crate::modem::dds::{clip, ToneGen};

/// Sidetone frequency.
const TONE_HZ: f64 = 750.0;

/// Code table, `.` and `-` per character.
const CODE: [(char, &str); 40] = [
    ('A', ".-"),
    ('B', "-..."),
    ('C', "-.-."),
    ('D', "-.."),
    ('E', "."),
    ('F', "..-."),
    ('G', "--."),
    ('H', "...."),
    ('I', ".."),
    ('J', ".---"),
    ('K', "-.-"),
    ('L', ".-.."),
    ('M', "--"),
    ('N', "-."),
    ('O', "---"),
    ('P', ".--."),
    ('Q', "--.-"),
    ('R', ".-."),
    ('S', "..."),
    ('T', "-"),
    ('U', "..-"),
    ('V', "...-"),
    ('W', ".--"),
    ('X', "-..-"),
    ('Y', "-.--"),
    ('Z', "--.."),
    ('0', "-----"),
    ('1', ".----"),
    ('2', "..---"),
    ('3', "...--"),
    ('4', "....-"),
    ('5', "....."),
    ('6', "-...."),
    ('7', "--..."),
    ('8', "---.."),
    ('9', "----."),
    ('.', ".-.-.-"),
    (',', "--..--"),
    ('/', "-..-."),
    ('-', "-....-"),
];

fn lookup(ch: char) -> Option<&'static str> {
    let up = ch.to_ascii_uppercase();
    CODE.iter().find(|&&(c, _)| c == up).map(|&(_, code)| code)
}

/// Render `text` at `wpm` words per minute. Unknown characters are
/// treated as word gaps. Returns samples emitted.
pub fn render(
    text: &str,
    wpm: u32,
    sample_rate: u32,
    sink: &mut dyn SampleSink,
    clip_count: &mut u64,
) -> Result<usize> {
    let wpm = wpm.max(1);
    let dit = (f64::from(sample_rate) * 1.2 / f64::from(wpm)) as usize;
    let mut tone = ToneGen::new(sample_rate, 80);
    tone.set_freq(TONE_HZ);
    let mut emitted = 0usize;

    let mut first_char = true;
    for ch in text.chars() {
        if ch == ' ' {
            emitted += gap(sink, 7 * dit)?;
            first_char = true;
            continue;
        }
        let Some(code) = lookup(ch) else {
            emitted += gap(sink, 7 * dit)?;
            first_char = true;
            continue;
        };
        if !first_char {
            emitted += gap(sink, 3 * dit)?;
        }
        first_char = false;
        for (i, sym) in code.chars().enumerate() {
            if i > 0 {
                emitted += gap(sink, dit)?;
            }
            let len = if sym == '-' { 3 * dit } else { dit };
            for _ in 0..len {
                let s = i32::from(tone.next());
                sink.put(clip(s, clip_count))?;
            }
            emitted += len;
        }
    }
    Ok(emitted)
}

fn gap(sink: &mut dyn SampleSink, samples: usize) -> Result<usize> {
    for _ in 0..samples {
        sink.put(0)?;
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecSink(Vec<i16>);
    impl SampleSink for VecSink {
        fn put(&mut self, s: i16) -> Result<()> {
            self.0.push(s);
            Ok(())
        }
        fn drain(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_paris_timing() {
        // "E" is one dit: at 10 WPM and 8 kHz, a dit is 960 samples.
        let mut sink = VecSink(Vec::new());
        let mut clips = 0;
        let n = render("E", 10, 8000, &mut sink, &mut clips).unwrap();
        assert_eq!(n, 960);
    }

    #[test]
    fn test_dah_is_three_dits() {
        let mut sink = VecSink(Vec::new());
        let mut clips = 0;
        let dit = render("E", 10, 8000, &mut sink, &mut clips).unwrap();
        let mut sink2 = VecSink(Vec::new());
        let dah = render("T", 10, 8000, &mut sink2, &mut clips).unwrap();
        assert_eq!(dah, 3 * dit);
    }

    #[test]
    fn test_word_gap() {
        let mut sink = VecSink(Vec::new());
        let mut clips = 0;
        let n = render("E E", 10, 8000, &mut sink, &mut clips).unwrap();
        // dit + 7 dit gap + dit.
        assert_eq!(n, 960 * 9);
    }

    #[test]
    fn test_unknown_char_is_gap() {
        let mut sink = VecSink(Vec::new());
        let mut clips = 0;
        let n = render("~", 10, 8000, &mut sink, &mut clips).unwrap();
        assert_eq!(n, 960 * 7);
        assert!(sink.0.iter().all(|&s| s == 0));
    }
}
