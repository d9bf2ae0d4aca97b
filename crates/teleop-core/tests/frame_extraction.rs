//! Integration tests for MJPEG frame extraction.
//!
//! Builds byte streams from known frames interleaved with padding that carries
//! no markers, then feeds them to [`FrameExtractor`] under different chunkings
//! and checks that the recovered frames are exactly the originals, in order.

use teleop_core::frame::{FrameExtractor, EOI, SOI};

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// Deterministic pseudo-random bytes (xorshift) with marker bytes removed.
struct ByteGen(u32);

impl ByteGen {
    fn next(&mut self) -> u32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 17;
        self.0 ^= self.0 << 5;
        self.0
    }

    /// A byte that can never form part of an `FF xx` marker.
    fn body_byte(&mut self) -> u8 {
        (self.next() % 0xFF) as u8
    }

    fn range(&mut self, lo: usize, hi: usize) -> usize {
        lo + (self.next() as usize % (hi - lo + 1))
    }
}

fn make_frames(n: usize, gen: &mut ByteGen) -> Vec<Vec<u8>> {
    (0..n)
        .map(|_| {
            let len = gen.range(0, 300);
            let mut f = SOI.to_vec();
            f.extend((0..len).map(|_| gen.body_byte()));
            f.extend_from_slice(&EOI);
            f
        })
        .collect()
}

fn interleave_with_padding(frames: &[Vec<u8>], gen: &mut ByteGen) -> Vec<u8> {
    let mut stream = Vec::new();
    for f in frames {
        let pad = gen.range(0, 20);
        stream.extend((0..pad).map(|_| gen.body_byte()));
        stream.extend_from_slice(f);
    }
    let tail = gen.range(0, 20);
    stream.extend((0..tail).map(|_| gen.body_byte()));
    stream
}

fn extract_all(stream: &[u8], chunk_sizes: impl Iterator<Item = usize>) -> Vec<Vec<u8>> {
    let mut ex = FrameExtractor::new();
    let mut out = Vec::new();
    let mut pos = 0;
    for size in chunk_sizes {
        if pos >= stream.len() {
            break;
        }
        let end = (pos + size.max(1)).min(stream.len());
        out.extend(ex.push(&stream[pos..end]));
        pos = end;
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn test_whole_stream_and_single_bytes_yield_identical_frames() {
    // Arrange
    let mut gen = ByteGen(0x1234_5678);
    let frames = make_frames(25, &mut gen);
    let stream = interleave_with_padding(&frames, &mut gen);

    // Act
    let whole = extract_all(&stream, std::iter::once(stream.len()));
    let bytewise = extract_all(&stream, std::iter::repeat(1));

    // Assert
    assert_eq!(whole, frames);
    assert_eq!(bytewise, frames);
}

#[test]
fn test_arbitrary_chunkings_yield_identical_frames() {
    let mut gen = ByteGen(0xDEAD_BEEF);
    let frames = make_frames(40, &mut gen);
    let stream = interleave_with_padding(&frames, &mut gen);

    for seed in 1..=20u32 {
        let mut sizes = ByteGen(seed.wrapping_mul(2_654_435_761));
        let chunked = extract_all(&stream, std::iter::from_fn(|| Some(sizes.range(1, 64))));
        assert_eq!(chunked, frames, "chunking seed {seed}");
    }
}

#[test]
fn test_partial_frame_survives_many_small_reads() {
    // Arrange: a frame whose end marker only arrives after many reads.
    let mut ex = FrameExtractor::new();
    assert!(ex.push(&SOI).is_empty());

    // Act: trickle body bytes in without an end marker.
    for i in 0..500u32 {
        assert!(ex.push(&[(i % 200) as u8]).is_empty());
    }
    let frames = ex.push(&EOI);

    // Assert
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].len(), 2 + 500 + 2);
    assert_eq!(&frames[0][..2], &SOI);
    assert_eq!(&frames[0][frames[0].len() - 2..], &EOI);
}

#[test]
fn test_no_frames_from_padding_only() {
    let mut gen = ByteGen(42);
    let padding: Vec<u8> = (0..1000).map(|_| gen.body_byte()).collect();
    assert!(extract_all(&padding, std::iter::repeat(7)).is_empty());
}
