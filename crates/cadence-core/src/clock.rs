// SPDX-License-Identifier: CEPL-1.0
//! Frame timing owned by whoever drives the frame loop.

use std::time::{Duration, Instant};

/// Averaged timing over one reporting interval.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameStats {
    pub frame_ms: f32,
    pub fps: f32,
}

impl FrameStats {
    fn from_window(total: Duration, frames: u32) -> Self {
        let frame_ms = total.as_secs_f32() * 1000.0 / frames.max(1) as f32;
        let fps = if frame_ms > 0.0 { 1000.0 / frame_ms } else { 0.0 };
        Self { frame_ms, fps }
    }
}

/// Monotonic clock for delta times and periodic frame statistics.
///
/// One instance is created at startup and owned by the frame pipeline; nothing
/// reads time through globals.
#[derive(Debug)]
pub struct FrameClock {
    last_tick: Instant,
    interval: u32,
    window_frames: u32,
    window_time: Duration,
}

impl FrameClock {
    /// `interval` is the number of ticks between two [`FrameStats`] reports.
    pub fn new(interval: u32) -> Self {
        Self {
            last_tick: Instant::now(),
            interval: interval.max(1),
            window_frames: 0,
            window_time: Duration::ZERO,
        }
    }

    /// Time since the previous tick, plus stats when an interval completes.
    pub fn tick(&mut self) -> (Duration, Option<FrameStats>) {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        (delta, self.record(delta))
    }

    /// Feed an externally measured delta into the stats window.
    pub fn record(&mut self, delta: Duration) -> Option<FrameStats> {
        self.window_frames += 1;
        self.window_time += delta;
        if self.window_frames < self.interval {
            return None;
        }
        let stats = FrameStats::from_window(self.window_time, self.window_frames);
        self.window_frames = 0;
        self.window_time = Duration::ZERO;
        Some(stats)
    }

    /// Restart delta measurement, e.g. after idling while minimized.
    pub fn reset(&mut self) {
        self.last_tick = Instant::now();
        self.window_frames = 0;
        self.window_time = Duration::ZERO;
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_once_per_interval() {
        let mut clock = FrameClock::new(3);
        let step = Duration::from_millis(20);

        assert_eq!(clock.record(step), None);
        assert_eq!(clock.record(step), None);
        let stats = clock.record(step).expect("third frame closes the window");
        assert!((stats.frame_ms - 20.0).abs() < 1e-3);
        assert!((stats.fps - 50.0).abs() < 1e-2);

        assert_eq!(clock.record(step), None);
    }

    #[test]
    fn tick_is_monotonic() {
        let mut clock = FrameClock::new(100);
        let (a, _) = clock.tick();
        std::thread::sleep(Duration::from_millis(2));
        let (b, _) = clock.tick();
        assert!(b >= Duration::from_millis(2));
        assert!(a < Duration::from_secs(1));
    }

    #[test]
    fn zero_interval_is_clamped() {
        let mut clock = FrameClock::new(0);
        assert!(clock.record(Duration::from_millis(16)).is_some());
    }
}
