//! Message types for the session pipeline and the client wire protocol.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, as the client protocol's timestamp.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Speaker role in the conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One entry in the per-session conversation history.
#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// How settled a transcript is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptKind {
    /// Live hypothesis, continuously overwritten.
    Interim,
    /// Snapshot taken at the prefetch tick; may drive speculative
    /// generation but never mutates history.
    SpeculativeFinal,
    /// Flushed and confirmed end-of-turn text.
    ConfirmedFinal,
}

/// A transcript with its provenance.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    pub kind: TranscriptKind,
    pub turn_id: u64,
    pub timestamp: f64,
}

/// Session states as seen by the turn machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// No speech, no generation.
    Idle,
    /// A speech segment is open and streaming to the transcriber.
    UserSpeaking,
    /// The prefetch tick fired; speech may still resume.
    PrefetchPending,
    /// Speech confirmed ended; the transcript flush is in flight.
    AwaitingConfirmation,
    /// A response generation is streaming.
    Generating,
    /// At least one audio chunk is with the client.
    Speaking,
    /// Cancelling outstanding work after an interrupt.
    Interrupted,
}

/// Control messages from the client. Binary WebSocket frames (raw PCM)
/// arrive separately and are not part of this enum.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Acknowledged, no state change.
    AudioConfig {},
    /// Select the agent profile for this session.
    AgentConfig { agent_id: String },
    /// The user answered the call; greet if the agent has a greeting.
    CallStarted,
    /// The client's audio queue drained.
    AudioPlaybackComplete,
    /// Explicit interrupt (e.g. a UI stop button).
    Interrupt {
        #[serde(default)]
        reason: String,
    },
}

/// Events sent to the client, tagged for the wire.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    SpeechStart {
        timestamp: f64,
    },
    SpeechEnd {
        timestamp: f64,
    },
    UserTranscript {
        text: String,
        timestamp: f64,
    },
    StreamStart {
        timestamp: f64,
    },
    TextChunk {
        text: String,
        timestamp: f64,
    },
    AudioChunk {
        audio_url: String,
        text: String,
        timestamp: f64,
    },
    StreamComplete {
        full_text: String,
        interrupted: bool,
        timestamp: f64,
    },
    StopAudioImmediately {
        timestamp: f64,
    },
    UserInterruption {
        timestamp: f64,
    },
    InterruptionComplete {
        timestamp: f64,
    },
    AgentGreeting {
        text: String,
        timestamp: f64,
    },
    GreetingAudio {
        audio_url: String,
        timestamp: f64,
    },
    Error {
        message: String,
        timestamp: f64,
    },
}

/// Progress reported by a generation task, tagged with the turn that
/// spawned it so stale work can be discarded.
#[derive(Debug, Clone)]
pub struct GenerationUpdate {
    pub turn_id: u64,
    pub event: GenerationEvent,
}

/// What a generation task produced.
#[derive(Debug, Clone)]
pub enum GenerationEvent {
    /// One streamed text delta.
    Text(String),
    /// One synthesized audio chunk, already in source-sentence order.
    Audio { url: String, text: String },
    /// The greeting synthesis finished.
    GreetingAudio { url: String },
    /// The generation ran to completion.
    Completed { full_text: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_parse_wire_json() {
        let ev: ClientEvent =
            serde_json::from_str(r#"{"type":"agent_config","agent_id":"a-1"}"#).expect("parse");
        assert!(matches!(ev, ClientEvent::AgentConfig { agent_id } if agent_id == "a-1"));

        let ev: ClientEvent = serde_json::from_str(r#"{"type":"call_started"}"#).expect("parse");
        assert!(matches!(ev, ClientEvent::CallStarted));

        // Extra fields on audio_config are tolerated.
        let ev: ClientEvent =
            serde_json::from_str(r#"{"type":"audio_config","sample_rate":8000}"#).expect("parse");
        assert!(matches!(ev, ClientEvent::AudioConfig {}));

        let ev: ClientEvent = serde_json::from_str(r#"{"type":"interrupt"}"#).expect("parse");
        assert!(matches!(ev, ClientEvent::Interrupt { reason } if reason.is_empty()));
    }

    #[test]
    fn unknown_client_event_is_an_error() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"warp_drive"}"#).is_err());
    }

    #[test]
    fn server_events_serialize_with_snake_case_tags() {
        let ev = ServerEvent::AudioChunk {
            audio_url: "/audio/x.mp3".into(),
            text: "Hi there.".into(),
            timestamp: 12.5,
        };
        let json = serde_json::to_value(&ev).expect("serialize");
        assert_eq!(json["type"], "audio_chunk");
        assert_eq!(json["audio_url"], "/audio/x.mp3");
        assert_eq!(json["text"], "Hi there.");

        let ev = ServerEvent::StreamComplete {
            full_text: "Hi there.".into(),
            interrupted: false,
            timestamp: 13.0,
        };
        let json = serde_json::to_value(&ev).expect("serialize");
        assert_eq!(json["type"], "stream_complete");
        assert_eq!(json["interrupted"], false);
    }
}
