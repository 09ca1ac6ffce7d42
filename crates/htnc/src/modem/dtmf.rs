// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DTMF: a Goertzel bank detector and the matching tone renderer.
//!
//! The detector runs one Goertzel filter per DTMF frequency over fixed
//! blocks sized so all eight frequencies land close to bin centers
//! (205 samples at 8 kHz, scaled for other rates). A tone counts as
//! present when it dominates its row/column group by the classic 1.74
//! ratio; a button is reported only when two consecutive blocks agree,
//! and `$` marks five seconds of silence after activity so upstream
//! automation can see "sequence over".

use crate::core::SampleSink;
use crate::error::Result;
use crate::modem::dds::{clip, ToneGen};

/// Row tones, Hz.
const ROWS: [f32; 4] = [697.0, 770.0, 852.0, 941.0];
/// Column tones, Hz.
const COLS: [f32; 4] = [1209.0, 1336.0, 1477.0, 1633.0];

/// Keypad layout indexed `[row][col]`.
const KEYS: [[char; 4]; 4] = [
    ['1', '2', '3', 'A'],
    ['4', '5', '6', 'B'],
    ['7', '8', '9', 'C'],
    ['*', '0', '#', 'D'],
];

/// A tone must beat the sum of the other three in its group by this.
const GROUP_RATIO: f32 = 1.74;
/// Silence gap that closes a sequence.
const INACTIVE_TIMEOUT_SECS: u64 = 5;

/// Goertzel-bank DTMF detector for one channel.
pub struct DtmfDetector {
    block_size: usize,
    coeffs: [f32; 8],
    q1: [f32; 8],
    q2: [f32; 8],
    n: usize,
    /// Raw reading of the previous block (debounce input).
    prev_block: Option<char>,
    /// Button currently held, already reported.
    held: Option<char>,
    active: bool,
    sample_clock: u64,
    last_activity: Option<u64>,
    timeout_samples: u64,
}

impl DtmfDetector {
    pub fn new(sample_rate: u32) -> Self {
        // 205 samples at 8 kHz puts every DTMF tone near a bin center.
        let block_size = ((205.0 * f64::from(sample_rate) / 8000.0).round()) as usize;
        let mut coeffs = [0f32; 8];
        for (i, f) in ROWS.iter().chain(COLS.iter()).enumerate() {
            coeffs[i] = 2.0 * (2.0 * std::f32::consts::PI * f / sample_rate as f32).cos();
        }
        Self {
            block_size,
            coeffs,
            q1: [0.0; 8],
            q2: [0.0; 8],
            n: 0,
            prev_block: None,
            held: None,
            active: false,
            sample_clock: 0,
            last_activity: None,
            timeout_samples: u64::from(sample_rate) * INACTIVE_TIMEOUT_SECS,
        }
    }

    /// True while a button tone is present; feeds the channel DCD so
    /// packet transmit stays off a voice/DTMF channel.
    pub fn active(&self) -> bool {
        self.active
    }

    /// Process one sample; returns a button character, or `$` when a
    /// sequence times out.
    pub fn process_sample(&mut self, sample: i16) -> Option<char> {
        self.sample_clock += 1;
        let x = f32::from(sample) / 32768.0;
        for i in 0..8 {
            let q0 = self.coeffs[i] * self.q1[i] - self.q2[i] + x;
            self.q2[i] = self.q1[i];
            self.q1[i] = q0;
        }
        self.n += 1;
        if self.n < self.block_size {
            return self.check_timeout();
        }

        // Block complete: magnitudes, then reset.
        let mut mags = [0f32; 8];
        for i in 0..8 {
            mags[i] =
                self.q1[i] * self.q1[i] + self.q2[i] * self.q2[i] - self.coeffs[i] * self.q1[i] * self.q2[i];
            self.q1[i] = 0.0;
            self.q2[i] = 0.0;
        }
        self.n = 0;

        let reading = decide(&mags[0..4]).and_then(|row| decide(&mags[4..8]).map(|col| KEYS[row][col]));
        self.active = reading.is_some();

        let mut emit = None;
        match reading {
            Some(ch) => {
                // Debounce: two consecutive blocks must agree, and a held
                // button reports once.
                if self.prev_block == Some(ch) && self.held != Some(ch) {
                    self.held = Some(ch);
                    emit = Some(ch);
                    log::debug!("[Dtmf] button {}", ch);
                }
                self.last_activity = Some(self.sample_clock);
            }
            None => {
                if self.prev_block.is_none() {
                    self.held = None;
                }
            }
        }
        self.prev_block = reading;
        emit.or_else(|| self.check_timeout())
    }

    fn check_timeout(&mut self) -> Option<char> {
        if let Some(t) = self.last_activity {
            if self.sample_clock - t >= self.timeout_samples {
                self.last_activity = None;
                log::debug!("[Dtmf] sequence timeout");
                return Some('$');
            }
        }
        None
    }
}

/// Pick the dominant tone in a 4-entry group, requiring it to beat the
/// other three combined by [`GROUP_RATIO`].
fn decide(mags: &[f32]) -> Option<usize> {
    let (best, &best_mag) = mags
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;
    let rest: f32 = mags.iter().sum::<f32>() - best_mag;
    (best_mag > GROUP_RATIO * rest && best_mag > 1e-3).then_some(best)
}

// ============================================================================
// Tone rendering for the DTMF transmit flavor
// ============================================================================

/// Render a button string as paired tones. `speed` is buttons per
/// second (half on, half off). Unknown characters become gaps.
pub fn render(
    text: &str,
    speed: u32,
    sample_rate: u32,
    sink: &mut dyn SampleSink,
    clip_count: &mut u64,
) -> Result<usize> {
    let speed = speed.clamp(1, 10);
    let button_samples = (sample_rate / speed) as usize;
    let on = button_samples / 2;
    let mut emitted = 0usize;

    for ch in text.chars() {
        let pos = KEYS
            .iter()
            .enumerate()
            .find_map(|(r, row)| row.iter().position(|&k| k == ch.to_ascii_uppercase()).map(|c| (r, c)));
        match pos {
            Some((r, c)) => {
                let mut row_gen = ToneGen::new(sample_rate, 50);
                let mut col_gen = ToneGen::new(sample_rate, 50);
                row_gen.set_freq(f64::from(ROWS[r]));
                col_gen.set_freq(f64::from(COLS[c]));
                for _ in 0..on {
                    let s = i32::from(row_gen.next()) + i32::from(col_gen.next());
                    sink.put(clip(s, clip_count))?;
                }
                for _ in on..button_samples {
                    sink.put(0)?;
                }
            }
            None => {
                for _ in 0..button_samples {
                    sink.put(0)?;
                }
            }
        }
        emitted += button_samples;
    }
    Ok(emitted)
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

    fn run(det: &mut DtmfDetector, audio: &[i16]) -> Vec<char> {
        audio.iter().filter_map(|&s| det.process_sample(s)).collect()
    }

    #[test]
    fn test_detects_rendered_buttons() {
        let rate = 44100;
        let mut sink = VecSink(Vec::new());
        let mut clips = 0;
        render("159D", 5, rate, &mut sink, &mut clips).unwrap();
        let mut det = DtmfDetector::new(rate);
        let got = run(&mut det, &sink.0);
        assert_eq!(got, vec!['1', '5', '9', 'D']);
    }

    #[test]
    fn test_held_button_reports_once() {
        let rate = 8000;
        let mut sink = VecSink(Vec::new());
        let mut clips = 0;
        // One long "7": render at 1 button/sec gives a 500 ms tone,
        // far more than two blocks.
        render("7", 1, rate, &mut sink, &mut clips).unwrap();
        let mut det = DtmfDetector::new(rate);
        let got = run(&mut det, &sink.0);
        assert_eq!(got, vec!['7']);
    }

    #[test]
    fn test_silence_never_fires() {
        let mut det = DtmfDetector::new(8000);
        let silence = vec![0i16; 8000];
        assert!(run(&mut det, &silence).is_empty());
    }

    #[test]
    fn test_timeout_marker_after_activity() {
        let rate = 8000;
        let mut sink = VecSink(Vec::new());
        let mut clips = 0;
        render("3", 5, rate, &mut sink, &mut clips).unwrap();
        let mut det = DtmfDetector::new(rate);
        let mut got = run(&mut det, &sink.0);
        let silence = vec![0i16; (rate * 6) as usize];
        got.extend(run(&mut det, &silence));
        assert_eq!(got, vec!['3', '$']);
    }

    #[test]
    fn test_active_tracks_tone() {
        let rate = 8000;
        let mut sink = VecSink(Vec::new());
        let mut clips = 0;
        render("5", 2, rate, &mut sink, &mut clips).unwrap();
        let mut det = DtmfDetector::new(rate);
        let mut was_active = false;
        for &s in &sink.0 {
            det.process_sample(s);
            was_active |= det.active();
        }
        assert!(was_active);
        for s in vec![0i16; 8000] {
            det.process_sample(s);
        }
        assert!(!det.active());
    }

    #[test]
    fn test_block_size_scales_with_rate() {
        assert_eq!(DtmfDetector::new(8000).block_size, 205);
        assert_eq!(DtmfDetector::new(44100).block_size, 1130);
    }

    #[test]
    fn test_render_length() {
        let mut sink = VecSink(Vec::new());
        let mut clips = 0;
        let n = render("12", 5, 8000, &mut sink, &mut clips).unwrap();
        assert_eq!(n, 2 * 8000 / 5);
        assert_eq!(sink.0.len(), n);
    }
}
