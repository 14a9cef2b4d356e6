//! Audio framing and synthesized-artifact storage.

pub mod frame;
pub mod store;

pub use frame::{AudioFrame, FrameAligner, FRAME_BYTES, FRAME_MS, FRAME_SAMPLES, SAMPLE_RATE};
pub use store::{AudioStore, DiskAudioStore};
