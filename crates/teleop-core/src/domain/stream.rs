//! Video stream settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::ProtocolError;

/// Subtracted from the nominal frame interval to absorb per-frame work.
pub const PACING_MARGIN: Duration = Duration::from_millis(10);

pub const MIN_FPS: u32 = 1;
pub const MAX_FPS: u32 = 60;
pub const MIN_QUALITY: u8 = 1;
pub const MAX_QUALITY: u8 = 100;

/// Resolution, target frame rate and JPEG quality of the video stream.
///
/// Quality only matters for backends that encode JPEG themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub quality: u8,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            quality: 80,
        }
    }
}

impl StreamConfig {
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidParameter`] unless `1 <= quality <= 100`.
    pub fn set_quality(&mut self, quality: i64) -> Result<(), ProtocolError> {
        self.quality = u8::try_from(quality)
            .ok()
            .filter(|q| (MIN_QUALITY..=MAX_QUALITY).contains(q))
            .ok_or_else(|| {
                ProtocolError::invalid(
                    "quality",
                    format!("{quality} outside {MIN_QUALITY}..={MAX_QUALITY}"),
                )
            })?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidParameter`] unless `1 <= fps <= 60`.
    pub fn set_fps(&mut self, fps: i64) -> Result<(), ProtocolError> {
        self.fps = u32::try_from(fps)
            .ok()
            .filter(|f| (MIN_FPS..=MAX_FPS).contains(f))
            .ok_or_else(|| {
                ProtocolError::invalid("fps", format!("{fps} outside {MIN_FPS}..={MAX_FPS}"))
            })?;
        Ok(())
    }

    /// Sets both dimensions, or neither.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidParameter`] unless both values are positive.
    pub fn set_resolution(&mut self, width: i64, height: i64) -> Result<(), ProtocolError> {
        let w = positive_dimension("width", width)?;
        let h = positive_dimension("height", height)?;
        self.width = w;
        self.height = h;
        Ok(())
    }

    /// Sleep between two emitted frames: `max(0, 1/fps - margin)`.
    pub fn pacing_delay(&self) -> Duration {
        let interval = Duration::from_secs(1) / self.fps.max(MIN_FPS);
        interval.saturating_sub(PACING_MARGIN)
    }
}

fn positive_dimension(field: &'static str, value: i64) -> Result<u32, ProtocolError> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| ProtocolError::invalid(field, format!("{value} must be positive")))
}
