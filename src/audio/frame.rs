//! Fixed-size frame alignment for the inbound PCM stream.
//!
//! Clients send raw 16-bit little-endian mono PCM at 8 kHz in buffers of
//! arbitrary size. The VAD operates on exact 30 ms frames, so incoming
//! bytes are accumulated and re-sliced here.

use bytes::{Bytes, BytesMut};

/// Input sample rate in Hz.
pub const SAMPLE_RATE: u32 = 8000;

/// Frame duration in milliseconds.
pub const FRAME_MS: u32 = 30;

/// Samples per frame (480 at 8 kHz).
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE as usize * FRAME_MS as usize) / 1000;

/// Bytes per frame (960 for 16-bit mono).
pub const FRAME_BYTES: usize = FRAME_SAMPLES * 2;

/// One aligned 30 ms frame of 16-bit little-endian mono PCM.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Exactly [`FRAME_BYTES`] bytes.
    pub pcm: Bytes,
}

impl AudioFrame {
    /// Iterate the frame as signed 16-bit samples.
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.pcm
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }

    /// RMS energy of the frame, normalized to \[0, 1\].
    pub fn rms(&self) -> f32 {
        let mut sum_sq = 0.0f64;
        let mut count = 0usize;
        for s in self.samples() {
            let v = f64::from(s) / f64::from(i16::MAX);
            sum_sq += v * v;
            count += 1;
        }
        if count == 0 {
            return 0.0;
        }
        (sum_sq / count as f64).sqrt() as f32
    }
}

/// Accumulates arbitrary-size byte buffers and emits aligned frames.
///
/// Residue shorter than one frame is retained across pushes. Bytes are
/// never reordered; malformed input produces garbage frames, not errors.
#[derive(Debug, Default)]
pub struct FrameAligner {
    buf: BytesMut,
}

impl FrameAligner {
    /// Create an empty aligner.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(FRAME_BYTES * 4),
        }
    }

    /// Append incoming PCM bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Take the next aligned frame, if a full one is buffered.
    pub fn next_frame(&mut self) -> Option<AudioFrame> {
        if self.buf.len() < FRAME_BYTES {
            return None;
        }
        let pcm = self.buf.split_to(FRAME_BYTES).freeze();
        Some(AudioFrame { pcm })
    }

    /// Bytes currently buffered below one frame boundary.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
