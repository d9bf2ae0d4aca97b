//! Observed frame rate over one-second windows.
//!
//! Timestamps are passed in by the caller so the meter works with both the
//! wall clock and a paused test clock.

use std::time::{Duration, Instant};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RateMeter {
    window: Duration,
    window_start: Instant,
    frames: u32,
    current: f32,
}

impl RateMeter {
    pub fn new(now: Instant) -> Self {
        Self::with_window(now, DEFAULT_WINDOW)
    }

    pub fn with_window(now: Instant, window: Duration) -> Self {
        Self {
            window,
            window_start: now,
            frames: 0,
            current: 0.0,
        }
    }

    pub fn record_frame(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    /// Closes the current window if it has lasted at least one window length.
    ///
    /// Returns the frames-per-second of the closed window, or `None` if the
    /// window is still open.
    pub fn sample(&mut self, now: Instant) -> Option<f32> {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }
        self.current = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.window_start = now;
        Some(self.current)
    }

    /// Rate of the last closed window, rounded to one decimal place.
    pub fn current(&self) -> f32 {
        (self.current * 10.0).round() / 10.0
    }
}
