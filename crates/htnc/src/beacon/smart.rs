// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SmartBeaconing: variable-rate tracker beacons.
//!
//! Two ideas, both from the original HamHUD algorithm. The interval
//! stretches with speed: crawling stations beacon at `slow_rate`, fast
//! ones at `fast_rate`, anything between at `fast_rate * fast_speed /
//! speed`. And "corner pegging": a heading change big enough (the
//! threshold shrinks as speed grows) fires a beacon immediately so the
//! track shows the corner, rate-limited by `turn_time`.

use std::time::Duration;

/// SmartBeaconing parameters. Speeds are in miles per hour.
#[derive(Debug, Clone)]
pub struct SmartBeaconConfig {
    pub fast_speed: f64,
    pub fast_rate: Duration,
    pub slow_speed: f64,
    pub slow_rate: Duration,
    /// Minimum time between corner-peg beacons.
    pub turn_time: Duration,
    /// Base heading-change threshold, degrees.
    pub turn_angle: f64,
    /// Added to the threshold as `turn_slope / speed`.
    pub turn_slope: f64,
}

impl Default for SmartBeaconConfig {
    fn default() -> Self {
        Self {
            fast_speed: 60.0,
            fast_rate: Duration::from_secs(180),
            slow_speed: 5.0,
            slow_rate: Duration::from_secs(1800),
            turn_time: Duration::from_secs(15),
            turn_angle: 30.0,
            turn_slope: 255.0,
        }
    }
}

impl SmartBeaconConfig {
    /// Beacon interval for the current speed.
    pub fn rate(&self, speed_mph: f64) -> Duration {
        if speed_mph < self.slow_speed {
            self.slow_rate
        } else if speed_mph > self.fast_speed {
            self.fast_rate
        } else {
            Duration::from_secs_f64(self.fast_rate.as_secs_f64() * self.fast_speed / speed_mph)
        }
    }

    /// Should a heading change fire a corner-peg beacon now?
    pub fn corner_peg(&self, speed_mph: f64, heading_change: f64, since_last: Duration) -> bool {
        if since_last < self.turn_time || speed_mph < self.slow_speed {
            return false;
        }
        let threshold = self.turn_angle + self.turn_slope / speed_mph.max(1.0);
        heading_change > threshold
    }
}

/// Smallest angular distance between two courses, degrees.
pub fn heading_change(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SmartBeaconConfig {
        SmartBeaconConfig::default()
    }

    #[test]
    fn test_rate_bands() {
        let c = cfg();
        assert_eq!(c.rate(2.0), Duration::from_secs(1800));
        assert_eq!(c.rate(80.0), Duration::from_secs(180));
        // 30 mph: 180 * 60/30 = 360 s.
        assert_eq!(c.rate(30.0), Duration::from_secs(360));
    }

    #[test]
    fn test_heading_change_wraps() {
        assert!((heading_change(350.0, 10.0) - 20.0).abs() < 1e-9);
        assert!((heading_change(10.0, 350.0) - 20.0).abs() < 1e-9);
        assert!((heading_change(0.0, 180.0) - 180.0).abs() < 1e-9);
        assert_eq!(heading_change(45.0, 45.0), 0.0);
    }

    #[test]
    fn test_corner_peg_turn_time_gate() {
        // 25 mph, 30 degree swing over 12 s: the turn_time of 15 s has
        // not elapsed, so no corner-peg fire.
        let c = cfg();
        assert!(!c.corner_peg(25.0, 30.0, Duration::from_secs(12)));
    }

    #[test]
    fn test_corner_peg_threshold_scales_with_speed() {
        let c = cfg();
        // At 25 mph the threshold is 30 + 255/25 ~ 40.2 degrees: a
        // 10 degree change does nothing even after the time gate.
        assert!(!c.corner_peg(25.0, 10.0, Duration::from_secs(16)));
        // A 45 degree change exceeds it.
        assert!(c.corner_peg(25.0, 45.0, Duration::from_secs(16)));
        // At highway speed the threshold is almost just turn_angle.
        assert!(c.corner_peg(70.0, 35.0, Duration::from_secs(16)));
    }

    #[test]
    fn test_corner_peg_parked_never_fires() {
        let c = cfg();
        assert!(!c.corner_peg(0.0, 180.0, Duration::from_secs(60)));
    }
}
