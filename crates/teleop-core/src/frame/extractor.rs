//! Byte-stream to JPEG frame extraction.
//!
//! The extractor keeps one growing accumulator per pipeline run:
//!
//! 1. Each read is appended to the accumulator.
//! 2. Bytes before the first start marker are dropped.
//! 3. If an end marker follows the start marker, the inclusive range is one
//!    frame; it is cut out of the accumulator and emitted.
//! 4. Steps 2–3 repeat until no complete frame remains.  Whatever is left is a
//!    partial frame that waits for later reads.
//!
//! Because step 4 loops, the frames produced for a stream do not depend on how
//! that stream was split into reads.

use tracing::warn;

/// JPEG start-of-image marker.
pub const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker.
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Upper bound on a partial frame before it is discarded as corrupt.
pub const DEFAULT_MAX_BUFFERED: usize = 8 * 1024 * 1024;

/// Incremental MJPEG frame extractor.
#[derive(Debug)]
pub struct FrameExtractor {
    buf: Vec<u8>,
    /// Where to resume the end-marker search inside a pending partial frame.
    scan_from: usize,
    max_buffered: usize,
    discarded: u64,
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameExtractor {
    pub fn new() -> Self {
        Self::with_max_buffered(DEFAULT_MAX_BUFFERED)
    }

    pub fn with_max_buffered(max_buffered: usize) -> Self {
        Self {
            buf: Vec::new(),
            scan_from: 0,
            max_buffered,
            discarded: 0,
        }
    }

    /// Appends `chunk` and returns every frame completed by it, in stream order.
    ///
    /// Each returned frame starts with [`SOI`] and ends with [`EOI`].
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            match find_marker(&self.buf, SOI, 0) {
                Some(0) => {}
                Some(start) => {
                    self.buf.drain(..start);
                    self.scan_from = 0;
                }
                None => {
                    // A lone trailing 0xFF may be the first half of a start marker.
                    let keep = usize::from(self.buf.last() == Some(&0xFF));
                    let garbage = self.buf.len() - keep;
                    self.buf.drain(..garbage);
                    self.scan_from = 0;
                    break;
                }
            }

            // The accumulator now begins with SOI.
            match find_marker(&self.buf, EOI, self.scan_from.max(SOI.len())) {
                Some(end) => {
                    frames.push(self.buf.drain(..end + EOI.len()).collect());
                    self.scan_from = 0;
                }
                None => {
                    if self.buf.len() > self.max_buffered {
                        warn!(
                            "discarding {} byte partial frame: no end marker within {} bytes",
                            self.buf.len(),
                            self.max_buffered
                        );
                        self.discarded += self.buf.len() as u64;
                        self.buf.clear();
                        self.scan_from = 0;
                    } else {
                        // Back up one byte so a marker split across reads is found.
                        self.scan_from = self.buf.len().saturating_sub(1);
                    }
                    break;
                }
            }
        }

        frames
    }

    /// Bytes currently held as a partial frame.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Total bytes thrown away because a partial frame outgrew the limit.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.scan_from = 0;
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}
