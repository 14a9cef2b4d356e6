//! Parley: full-duplex, low-latency voice dialogue server.
//!
//! Each connected client gets a cooperative session pipeline:
//! PCM frames → VAD → streaming STT → turn controller → LLM → TTS,
//! with speculative transcription at pause boundaries and barge-in
//! cancellation while the agent is speaking.
//!
//! # Architecture
//!
//! - **Frame alignment** (`audio::frame`): arbitrary byte buffers become
//!   fixed 30 ms frames.
//! - **VAD** (`vad`): counter-based segment detection plus a spectral
//!   voice-likeness filter for barge-in.
//! - **Streaming STT** (`stt`): a live provider socket per user turn with
//!   interim/final buffers and idle keep-alive.
//! - **Turn control** (`pipeline::controller`): the per-session state
//!   machine arbitrating listening vs speaking.
//! - **Generation** (`pipeline::generator`): streamed LLM tokens with
//!   first-sentence early synthesis and ordered audio delivery.
//! - **Server** (`server`): axum WebSocket endpoint, agent CRUD, and
//!   audio artifact serving.

pub mod agents;
pub mod audio;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod server;
pub mod stt;
pub mod tts;
pub mod vad;

pub use config::VoiceConfig;
pub use error::{Result, VoiceError};
pub use pipeline::{Session, SessionDeps, SessionHandle, SessionInput};
