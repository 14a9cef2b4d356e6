//! Configuration types for the voice dialogue server.

use crate::error::{Result, VoiceError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the dialogue server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// HTTP/WebSocket server settings.
    pub server: ServerConfig,
    /// Voice activity detection settings.
    pub vad: VadConfig,
    /// Streaming speech-to-text settings.
    pub stt: SttConfig,
    /// Language model settings.
    pub llm: LlmConfig,
    /// Text-to-speech settings.
    pub tts: TtsConfig,
    /// Synthesized audio artifact storage settings.
    pub audio_store: AudioStoreConfig,
    /// Per-session pipeline settings.
    pub session: SessionConfig,
}

impl VoiceConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| VoiceError::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| VoiceError::Config(format!("failed to parse {}: {e}", path.display())))
    }
}

/// HTTP/WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Allowed CORS origins for the browser frontend.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8000,
            cors_origins: vec!["http://localhost:5173".to_owned()],
        }
    }
}

/// Voice activity detection configuration.
///
/// The detector operates on fixed 30 ms frames of 16-bit mono PCM at 8 kHz;
/// thresholds below are counted in frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS energy threshold for the per-frame speech classifier.
    ///
    /// Computed on samples normalized to \[-1, 1\]. Typical values:
    ///   - 0.005: very sensitive (picks up quiet speech and some noise)
    ///   - 0.01:  normal sensitivity (default)
    ///   - 0.02:  reduced sensitivity (noisy environments)
    pub energy_threshold: f32,
    /// Consecutive speech frames required to open a segment (2 = 60 ms).
    pub start_frames: u32,
    /// Silence frames before the prefetch tick fires (7 = ~210 ms).
    pub prefetch_silence_frames: u32,
    /// Silence frames before the segment is confirmed ended (27 = ~810 ms).
    pub confirm_silence_frames: u32,
    /// Pre-speech window retained ahead of a detected start, in ms.
    pub pre_speech_ms: u32,
    /// Consecutive voice-like frames required to confirm a barge-in
    /// while the agent is speaking (8 = ~240 ms).
    pub min_interruption_frames: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.01,
            start_frames: 2,
            prefetch_silence_frames: 7,
            confirm_silence_frames: 27,
            pre_speech_ms: 200,
            min_interruption_frames: 8,
        }
    }
}

/// Streaming speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Provider model name.
    pub model: String,
    /// Recognition language.
    pub language: String,
    /// Provider endpoint (WebSocket URL).
    pub endpoint: String,
    /// Idle keep-alive interval in seconds. The provider drops sessions
    /// idle for 10 s, so silence is injected at half that.
    pub keepalive_secs: u64,
    /// Maximum wait for trailing finals after a flush request, in ms.
    pub finalize_wait_ms: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model: "nova-2".to_owned(),
            language: "en-US".to_owned(),
            endpoint: "wss://api.deepgram.com/v1/listen".to_owned(),
            keepalive_secs: 5,
            finalize_wait_ms: 150,
        }
    }
}

/// Language model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider model name.
    pub model: String,
    /// Provider endpoint base URL.
    pub endpoint: String,
    /// Number of trailing conversation messages included in the prompt.
    pub history_tail: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash-exp".to_owned(),
            endpoint: "https://generativelanguage.googleapis.com".to_owned(),
            history_tail: 4,
        }
    }
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Provider model name.
    pub model: String,
    /// Provider voice id.
    pub voice_id: String,
    /// Provider endpoint base URL.
    pub endpoint: String,
    /// Process-wide cap on concurrent synthesis requests.
    pub max_concurrent: usize,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            model: "eleven_turbo_v2".to_owned(),
            // Rachel
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_owned(),
            endpoint: "https://api.elevenlabs.io".to_owned(),
            max_concurrent: 3,
        }
    }
}

/// Synthesized audio artifact storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioStoreConfig {
    /// Directory for synthesized audio files.
    pub dir: PathBuf,
    /// Artifact age before the cleanup pass deletes it, in seconds.
    pub max_age_secs: u64,
    /// Interval between cleanup passes, in seconds.
    pub cleanup_interval_secs: u64,
}

impl Default for AudioStoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("temp_audio"),
            max_age_secs: 3600,
            cleanup_interval_secs: 3600,
        }
    }
}

/// Per-session pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Outbound event queue depth. Overflow degrades and closes the session.
    pub outbound_queue: usize,
    /// Whether prefetch ticks may launch speculative generation.
    pub speculation: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_queue: 256,
            speculation: true,
        }
    }
}
