//! Error types for the voice dialogue pipeline.

/// Top-level error type for the dialogue server.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// Audio framing or artifact storage error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Voice activity detection error.
    #[error("VAD error: {0}")]
    Vad(String),

    /// Streaming speech-to-text error.
    #[error("STT error: {0}")]
    Stt(String),

    /// Language model inference error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Text-to-speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Agent registry error.
    #[error("agent error: {0}")]
    Agent(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Session coordination error.
    #[error("session error: {0}")]
    Session(String),

    /// Client protocol violation (malformed frame or message).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, VoiceError>;
