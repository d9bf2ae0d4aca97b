//! MJPEG frame extraction and throughput measurement.
//!
//! Capture backends hand us an unframed byte stream: JPEG images laid end to
//! end, split across reads at arbitrary positions.  [`extractor::FrameExtractor`]
//! recovers the individual images by scanning for the JPEG start-of-image
//! (`FF D8`) and end-of-image (`FF D9`) markers.

pub mod extractor;
pub mod rate;

pub use extractor::{FrameExtractor, EOI, SOI};
pub use rate::RateMeter;
