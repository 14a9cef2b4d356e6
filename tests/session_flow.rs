//! End-to-end session scenarios over scripted providers.
//!
//! Each test drives a full `Session` through its input channel with
//! synthetic PCM and control messages, then asserts on the ordered
//! outbound event stream.

use async_trait::async_trait;
use bytes::Bytes;
use parley::agents::{AgentRegistry, InMemoryAgentRegistry, NewAgent};
use parley::error::{Result, VoiceError};
use parley::llm::{LanguageModel, TokenStream};
use parley::pipeline::messages::{ClientEvent, ServerEvent};
use parley::pipeline::{Session, SessionDeps, SessionHandle, SessionInput};
use parley::stt::{SttEvent, SttHandle, SttProvider};
use parley::tts::SpeechSynthesizer;
use parley::VoiceConfig;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

const FRAME_SAMPLES: usize = 480;
const SAMPLE_RATE: f32 = 8000.0;

// -- PCM helpers --

fn tone_frame(freq_hz: f32) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(FRAME_SAMPLES * 2);
    for n in 0..FRAME_SAMPLES {
        let t = n as f32 / SAMPLE_RATE;
        let v = (0.3 * (2.0 * std::f32::consts::PI * freq_hz * t).sin() * f32::from(i16::MAX)) as i16;
        pcm.extend_from_slice(&v.to_le_bytes());
    }
    pcm
}

fn speech_frame() -> Vec<u8> {
    // 1 kHz: loud enough for the energy gate, inside the voice bands.
    tone_frame(1000.0)
}

fn silence_frame() -> Vec<u8> {
    vec![0u8; FRAME_SAMPLES * 2]
}

async fn feed_frames(input: &mpsc::Sender<SessionInput>, frames: usize, frame: fn() -> Vec<u8>) {
    for _ in 0..frames {
        input
            .send(SessionInput::Pcm(Bytes::from(frame())))
            .await
            .expect("session input open");
        // Give the session loop a chance to interleave STT/generation
        // events between frames, as a live microphone would.
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

async fn speak_utterance(input: &mpsc::Sender<SessionInput>) {
    // ~1 s of speech, then enough silence to confirm the segment end.
    feed_frames(input, 34, speech_frame).await;
    feed_frames(input, 34, silence_frame).await;
}

async fn send(input: &mpsc::Sender<SessionInput>, event: ClientEvent) {
    input
        .send(SessionInput::Control(event))
        .await
        .expect("session input open");
}

// -- Outbound assertions --

async fn drain_events(outbound: &mut mpsc::Receiver<ServerEvent>, idle: Duration) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(idle, outbound.recv()).await {
            Ok(Some(event)) => events.push(event),
            Ok(None) | Err(_) => return events,
        }
    }
}

async fn next_event(outbound: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(5), outbound.recv())
        .await
        .expect("timed out waiting for event")
        .expect("outbound channel closed")
}

fn kind(event: &ServerEvent) -> &'static str {
    match event {
        ServerEvent::SpeechStart { .. } => "speech_start",
        ServerEvent::SpeechEnd { .. } => "speech_end",
        ServerEvent::UserTranscript { .. } => "user_transcript",
        ServerEvent::StreamStart { .. } => "stream_start",
        ServerEvent::TextChunk { .. } => "text_chunk",
        ServerEvent::AudioChunk { .. } => "audio_chunk",
        ServerEvent::StreamComplete { .. } => "stream_complete",
        ServerEvent::StopAudioImmediately { .. } => "stop_audio_immediately",
        ServerEvent::UserInterruption { .. } => "user_interruption",
        ServerEvent::InterruptionComplete { .. } => "interruption_complete",
        ServerEvent::AgentGreeting { .. } => "agent_greeting",
        ServerEvent::GreetingAudio { .. } => "greeting_audio",
        ServerEvent::Error { .. } => "error",
    }
}

#[track_caller]
fn assert_subsequence(events: &[ServerEvent], expected: &[&str]) {
    let mut remaining = expected.iter().peekable();
    for event in events {
        if let Some(next) = remaining.peek()
            && kind(event) == **next
        {
            remaining.next();
        }
    }
    let missing: Vec<&&str> = remaining.collect();
    assert!(
        missing.is_empty(),
        "missing {missing:?} in {:?}",
        events.iter().map(kind).collect::<Vec<_>>()
    );
}

// -- Scripted providers --

struct Utterance {
    interim: &'static str,
    final_text: &'static str,
}

struct MockStt {
    utterances: Arc<Mutex<VecDeque<Utterance>>>,
    fail_connect: AtomicBool,
    connects: AtomicUsize,
}

impl MockStt {
    fn new(utterances: Vec<Utterance>) -> Self {
        Self {
            utterances: Arc::new(Mutex::new(utterances.into())),
            fail_connect: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SttProvider for MockStt {
    async fn connect(&self, events: mpsc::Sender<SttEvent>) -> Result<SttHandle> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(VoiceError::Stt("connection refused".into()));
        }
        let (handle, mut commands) = SttHandle::channel();
        let utterances = Arc::clone(&self.utterances);
        tokio::spawn(async move {
            let mut interim_sent = false;
            while let Some(cmd) = commands.recv().await {
                match cmd {
                    parley::stt::SttCommand::Audio(_) => {
                        if !interim_sent {
                            let interim = utterances
                                .lock()
                                .expect("lock")
                                .front()
                                .map(|u| u.interim.to_owned());
                            if let Some(text) = interim
                                && !text.is_empty()
                            {
                                let _ = events.send(SttEvent::Interim(text)).await;
                            }
                            interim_sent = true;
                        }
                    }
                    parley::stt::SttCommand::Flush => {
                        let text = utterances
                            .lock()
                            .expect("lock")
                            .pop_front()
                            .map(|u| u.final_text.to_owned())
                            .unwrap_or_default();
                        let _ = events
                            .send(SttEvent::Final {
                                text,
                                from_flush: true,
                            })
                            .await;
                        interim_sent = false;
                    }
                    parley::stt::SttCommand::Close => break,
                }
            }
        });
        Ok(handle)
    }
}

enum ScriptedResponse {
    /// Stream these tokens, then finish.
    Tokens(Vec<&'static str>),
    /// Emit one token, then hang until cancelled.
    Stall(&'static str),
}

struct MockLlm {
    script: Mutex<VecDeque<ScriptedResponse>>,
    prompts: Mutex<Vec<String>>,
}

impl MockLlm {
    fn new(script: Vec<ScriptedResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("lock").clone()
    }
}

#[async_trait]
impl LanguageModel for MockLlm {
    async fn stream(&self, prompt: &str) -> Result<TokenStream> {
        self.prompts.lock().expect("lock").push(prompt.to_owned());
        let response = self
            .script
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or(ScriptedResponse::Tokens(vec![]));
        match response {
            ScriptedResponse::Tokens(tokens) => {
                let items: Vec<Result<String>> =
                    tokens.into_iter().map(|t| Ok(t.to_owned())).collect();
                Ok(Box::pin(futures_util::stream::iter(items)))
            }
            ScriptedResponse::Stall(first) => {
                let stream = async_stream::stream! {
                    if !first.is_empty() {
                        yield Ok::<String, VoiceError>(first.to_owned());
                    }
                    std::future::pending::<()>().await;
                };
                Ok(Box::pin(stream))
            }
        }
    }
}

struct MockTts {
    calls: AtomicUsize,
}

impl MockTts {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for MockTts {
    async fn synthesize(&self, text: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("/audio/{}.mp3", text.replace(' ', "-")))
    }
}

struct Harness {
    stt: Arc<MockStt>,
    llm: Arc<MockLlm>,
    tts: Arc<MockTts>,
    input: mpsc::Sender<SessionInput>,
    outbound: mpsc::Receiver<ServerEvent>,
}

fn start_session(
    utterances: Vec<Utterance>,
    script: Vec<ScriptedResponse>,
    registry: Arc<dyn AgentRegistry>,
) -> Harness {
    let stt = Arc::new(MockStt::new(utterances));
    let llm = Arc::new(MockLlm::new(script));
    let tts = Arc::new(MockTts::new());
    let deps = SessionDeps {
        config: VoiceConfig::default(),
        registry,
        stt: Arc::clone(&stt) as _,
        llm: Arc::clone(&llm) as _,
        tts: Arc::clone(&tts) as _,
        tts_permits: Arc::new(Semaphore::new(3)),
    };
    let (session, SessionHandle { input, outbound }) = Session::new(&deps);
    tokio::spawn(session.run());
    Harness {
        stt,
        llm,
        tts,
        input,
        outbound,
    }
}

fn empty_registry() -> Arc<dyn AgentRegistry> {
    Arc::new(InMemoryAgentRegistry::new())
}

// -- Scenarios --

#[tokio::test]
async fn happy_path_turn_streams_text_and_audio() {
    let mut h = start_session(
        vec![Utterance {
            interim: "hello world",
            final_text: "hello world",
        }],
        vec![ScriptedResponse::Tokens(vec!["Hi there."])],
        empty_registry(),
    );

    feed_frames(&h.input, 67, speech_frame).await; // ~2 s of speech
    feed_frames(&h.input, 34, silence_frame).await; // ~1 s of silence

    let events = drain_events(&mut h.outbound, Duration::from_millis(500)).await;
    assert_subsequence(
        &events,
        &[
            "speech_start",
            "user_transcript",
            "stream_start",
            "text_chunk",
            "audio_chunk",
            "stream_complete",
        ],
    );

    assert!(events.iter().any(
        |e| matches!(e, ServerEvent::UserTranscript { text, .. } if text == "hello world")
    ));
    assert!(events.iter().any(|e| matches!(
        e,
        ServerEvent::AudioChunk { text, audio_url, .. }
            if text == "Hi there." && audio_url == "/audio/Hi-there..mp3"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        ServerEvent::StreamComplete { full_text, interrupted: false, .. } if full_text == "Hi there."
    )));
    assert!(events.iter().any(|e| matches!(e, ServerEvent::SpeechEnd { .. })));
}

#[tokio::test]
async fn confirmed_speculation_is_promoted_without_regeneration() {
    let mut h = start_session(
        vec![
            Utterance {
                interim: "what time is it",
                final_text: "what time is it",
            },
            Utterance {
                interim: "thanks",
                final_text: "thanks",
            },
        ],
        vec![
            ScriptedResponse::Tokens(vec!["It's noon."]),
            ScriptedResponse::Tokens(vec!["Anytime."]),
        ],
        empty_registry(),
    );

    speak_utterance(&h.input).await;
    let events = drain_events(&mut h.outbound, Duration::from_millis(500)).await;
    assert!(events.iter().any(|e| matches!(
        e,
        ServerEvent::StreamComplete { full_text, interrupted: false, .. } if full_text == "It's noon."
    )));
    // Exactly one user_transcript: the provisional text was confirmed.
    let transcripts = events
        .iter()
        .filter(|e| matches!(e, ServerEvent::UserTranscript { .. }))
        .count();
    assert_eq!(transcripts, 1);

    // The promoted turn landed in history exactly once, which the next
    // turn's prompt makes visible.
    send(&h.input, ClientEvent::AudioPlaybackComplete).await;
    speak_utterance(&h.input).await;
    let _ = drain_events(&mut h.outbound, Duration::from_millis(500)).await;

    let prompts = h.llm.prompts();
    assert_eq!(prompts.len(), 2, "promotion must not regenerate");
    let follow_up = &prompts[1];
    assert_eq!(follow_up.matches("User: what time is it").count(), 1);
    assert_eq!(follow_up.matches("Assistant: It's noon.").count(), 1);
    assert!(follow_up.ends_with("User: thanks\nAssistant:"));
}

#[tokio::test]
async fn mismatched_speculation_is_cancelled_and_regenerated() {
    let mut h = start_session(
        vec![
            Utterance {
                interim: "what time is it",
                final_text: "what day is it",
            },
            Utterance {
                interim: "thanks",
                final_text: "thanks",
            },
        ],
        vec![
            ScriptedResponse::Tokens(vec!["It's noon."]),
            ScriptedResponse::Tokens(vec!["It's Tuesday."]),
            ScriptedResponse::Tokens(vec!["Anytime."]),
        ],
        empty_registry(),
    );

    speak_utterance(&h.input).await;
    let events = drain_events(&mut h.outbound, Duration::from_millis(500)).await;

    // The client saw the speculative stream, then the corrected turn.
    let transcript_texts: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::UserTranscript { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(transcript_texts, vec!["what time is it", "what day is it"]);
    assert!(events.iter().any(|e| matches!(
        e,
        ServerEvent::StreamComplete { full_text, .. } if full_text == "It's Tuesday."
    )));

    let prompts = h.llm.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].ends_with("User: what time is it\nAssistant:"));
    assert!(prompts[1].ends_with("User: what day is it\nAssistant:"));

    // Only the confirmed exchange survives into history.
    send(&h.input, ClientEvent::AudioPlaybackComplete).await;
    speak_utterance(&h.input).await;
    let _ = drain_events(&mut h.outbound, Duration::from_millis(500)).await;
    let follow_up = &h.llm.prompts()[2];
    assert!(!follow_up.contains("what time is it"));
    assert!(!follow_up.contains("It's noon."));
    assert_eq!(follow_up.matches("User: what day is it").count(), 1);
    assert_eq!(follow_up.matches("Assistant: It's Tuesday.").count(), 1);
}

#[tokio::test]
async fn resumed_speech_cancels_the_speculative_run() {
    let mut h = start_session(
        vec![Utterance {
            interim: "hello",
            final_text: "hello again",
        }],
        vec![
            ScriptedResponse::Stall(""),
            ScriptedResponse::Tokens(vec!["Okay."]),
        ],
        empty_registry(),
    );

    // Speech, a pause long enough for the prefetch tick, then more speech.
    feed_frames(&h.input, 34, speech_frame).await;
    feed_frames(&h.input, 10, silence_frame).await;
    feed_frames(&h.input, 10, speech_frame).await;
    feed_frames(&h.input, 34, silence_frame).await;

    let events = drain_events(&mut h.outbound, Duration::from_millis(500)).await;
    // The abandoned speculative stream is closed as interrupted, then the
    // confirmed turn runs to completion.
    assert!(events.iter().any(|e| matches!(
        e,
        ServerEvent::StreamComplete { interrupted: true, .. }
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        ServerEvent::StreamComplete { full_text, interrupted: false, .. } if full_text == "Okay."
    )));
    assert_eq!(h.llm.prompts().len(), 2);
    assert!(h.llm.prompts()[1].ends_with("User: hello again\nAssistant:"));
}

#[tokio::test]
async fn barge_in_stops_the_speaking_agent_and_starts_a_new_turn() {
    let mut h = start_session(
        vec![
            Utterance {
                interim: "tell me a story",
                final_text: "tell me a story",
            },
            Utterance {
                interim: "stop please",
                final_text: "stop please",
            },
        ],
        vec![
            ScriptedResponse::Tokens(vec!["Once upon a time."]),
            ScriptedResponse::Tokens(vec!["Stopping now."]),
        ],
        empty_registry(),
    );

    speak_utterance(&h.input).await;
    let first_turn = drain_events(&mut h.outbound, Duration::from_millis(500)).await;
    assert!(first_turn.iter().any(|e| matches!(
        e,
        ServerEvent::StreamComplete { interrupted: false, .. }
    )));
    // No playback-complete yet: the agent is still speaking when the user
    // barges in with ~300 ms of voice-like audio.
    feed_frames(&h.input, 10, speech_frame).await;

    let stop = next_event(&mut h.outbound).await;
    assert!(matches!(stop, ServerEvent::StopAudioImmediately { .. }));
    let interruption = next_event(&mut h.outbound).await;
    assert!(matches!(interruption, ServerEvent::UserInterruption { .. }));
    let complete = next_event(&mut h.outbound).await;
    assert!(matches!(complete, ServerEvent::InterruptionComplete { .. }));
    let start = next_event(&mut h.outbound).await;
    assert!(matches!(start, ServerEvent::SpeechStart { .. }));

    // The interrupting utterance becomes a normal turn.
    feed_frames(&h.input, 10, speech_frame).await;
    feed_frames(&h.input, 34, silence_frame).await;
    let second_turn = drain_events(&mut h.outbound, Duration::from_millis(500)).await;
    assert!(second_turn.iter().any(
        |e| matches!(e, ServerEvent::UserTranscript { text, .. } if text == "stop please")
    ));
    assert!(second_turn.iter().any(|e| matches!(
        e,
        ServerEvent::StreamComplete { full_text, interrupted: false, .. } if full_text == "Stopping now."
    )));
}

#[tokio::test]
async fn explicit_interrupt_mid_generation_closes_the_stream() {
    let mut h = start_session(
        vec![Utterance {
            interim: "keep talking",
            final_text: "keep talking",
        }],
        vec![ScriptedResponse::Stall(
            "Let me tell you everything about that",
        )],
        empty_registry(),
    );

    speak_utterance(&h.input).await;

    // Wait until the stalled generation has streamed some text.
    loop {
        let event = next_event(&mut h.outbound).await;
        if matches!(event, ServerEvent::TextChunk { .. }) {
            break;
        }
    }

    send(
        &h.input,
        ClientEvent::Interrupt {
            reason: "user pressed stop".into(),
        },
    )
    .await;

    let events = drain_events(&mut h.outbound, Duration::from_millis(500)).await;
    assert_subsequence(
        &events,
        &[
            "stop_audio_immediately",
            "user_interruption",
            "interruption_complete",
            "stream_complete",
        ],
    );
    assert!(events.iter().any(|e| matches!(
        e,
        ServerEvent::StreamComplete { interrupted: true, full_text, .. }
            if full_text == "Let me tell you everything about that"
    )));
}

#[tokio::test]
async fn stt_outage_reports_an_error_and_retries_next_turn() {
    let h = start_session(
        vec![Utterance {
            interim: "hello",
            final_text: "hello",
        }],
        vec![ScriptedResponse::Tokens(vec!["Hi."])],
        empty_registry(),
    );
    let mut outbound = h.outbound;
    h.stt.fail_connect.store(true, Ordering::SeqCst);

    feed_frames(&h.input, 20, speech_frame).await;
    feed_frames(&h.input, 34, silence_frame).await;

    let events = drain_events(&mut outbound, Duration::from_millis(500)).await;
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, ServerEvent::Error { .. }))
            .count(),
        1
    );
    assert!(!events
        .iter()
        .any(|e| matches!(e, ServerEvent::UserTranscript { .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ServerEvent::StreamStart { .. })));
    assert_eq!(h.stt.connects.load(Ordering::SeqCst), 1);

    // The provider recovers; the next speech start reconnects and the
    // turn completes normally.
    h.stt.fail_connect.store(false, Ordering::SeqCst);
    feed_frames(&h.input, 34, speech_frame).await;
    feed_frames(&h.input, 34, silence_frame).await;

    let events = drain_events(&mut outbound, Duration::from_millis(500)).await;
    assert_eq!(h.stt.connects.load(Ordering::SeqCst), 2);
    assert!(events.iter().any(
        |e| matches!(e, ServerEvent::UserTranscript { text, .. } if text == "hello")
    ));
    assert!(events.iter().any(|e| matches!(
        e,
        ServerEvent::StreamComplete { interrupted: false, .. }
    )));
}

#[tokio::test]
async fn greeting_plays_before_listening_resumes() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    let profile = registry.insert(NewAgent {
        name: "Alex".to_owned(),
        greeting: "Hi, I'm Alex.".to_owned(),
        system_prompt: "You are Alex.".to_owned(),
        ..NewAgent::default()
    });

    let mut h = start_session(
        vec![Utterance {
            interim: "hello",
            final_text: "hello",
        }],
        vec![ScriptedResponse::Tokens(vec!["Hello there."])],
        registry.clone(),
    );

    send(
        &h.input,
        ClientEvent::AgentConfig {
            agent_id: profile.id.clone(),
        },
    )
    .await;
    send(&h.input, ClientEvent::CallStarted).await;

    let greeting = next_event(&mut h.outbound).await;
    assert!(matches!(
        &greeting,
        ServerEvent::AgentGreeting { text, .. } if text == "Hi, I'm Alex."
    ));
    let audio = next_event(&mut h.outbound).await;
    assert!(matches!(
        &audio,
        ServerEvent::GreetingAudio { audio_url, .. } if audio_url == "/audio/Hi,-I'm-Alex..mp3"
    ));

    // While the greeting plays, a short burst of speech must not open a
    // user turn.
    feed_frames(&h.input, 5, speech_frame).await;
    feed_frames(&h.input, 5, silence_frame).await;
    let during_greeting = drain_events(&mut h.outbound, Duration::from_millis(300)).await;
    assert!(during_greeting.is_empty(), "got {during_greeting:?}");

    // Playback finishes; listening resumes and a turn flows normally.
    send(&h.input, ClientEvent::AudioPlaybackComplete).await;
    speak_utterance(&h.input).await;
    let events = drain_events(&mut h.outbound, Duration::from_millis(500)).await;
    assert!(events.iter().any(
        |e| matches!(e, ServerEvent::UserTranscript { text, .. } if text == "hello")
    ));

    // The greeting seeded the conversation history.
    let prompt = &h.llm.prompts()[0];
    assert!(prompt.contains("Assistant: Hi, I'm Alex.\n"));
}

#[tokio::test]
async fn duplicate_playback_complete_is_ignored() {
    let mut h = start_session(
        vec![
            Utterance {
                interim: "hello",
                final_text: "hello",
            },
            Utterance {
                interim: "again",
                final_text: "again",
            },
        ],
        vec![
            ScriptedResponse::Tokens(vec!["Hi."]),
            ScriptedResponse::Tokens(vec!["Hello again."]),
        ],
        empty_registry(),
    );

    speak_utterance(&h.input).await;
    let events = drain_events(&mut h.outbound, Duration::from_millis(500)).await;
    assert!(events.iter().any(|e| matches!(
        e,
        ServerEvent::StreamComplete { interrupted: false, .. }
    )));

    send(&h.input, ClientEvent::AudioPlaybackComplete).await;
    send(&h.input, ClientEvent::AudioPlaybackComplete).await;
    send(&h.input, ClientEvent::AudioPlaybackComplete).await;
    let after = drain_events(&mut h.outbound, Duration::from_millis(300)).await;
    assert!(after.is_empty(), "duplicates produced {after:?}");

    // The session still takes turns afterwards.
    speak_utterance(&h.input).await;
    let events = drain_events(&mut h.outbound, Duration::from_millis(500)).await;
    assert!(events.iter().any(|e| matches!(
        e,
        ServerEvent::StreamComplete { full_text, interrupted: false, .. } if full_text == "Hello again."
    )));
    assert!(h.tts.calls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn malformed_pcm_lengths_still_align_into_frames() {
    let mut h = start_session(
        vec![Utterance {
            interim: "hello",
            final_text: "hello",
        }],
        vec![ScriptedResponse::Tokens(vec!["Hi."])],
        empty_registry(),
    );

    // Send speech as odd-sized buffers that never match a frame boundary.
    let mut all: Vec<u8> = Vec::new();
    for _ in 0..40 {
        all.extend(speech_frame());
    }
    for chunk in all.chunks(700) {
        h.input
            .send(SessionInput::Pcm(Bytes::copy_from_slice(chunk)))
            .await
            .expect("input open");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    feed_frames(&h.input, 34, silence_frame).await;

    let events = drain_events(&mut h.outbound, Duration::from_millis(500)).await;
    assert!(events.iter().any(|e| matches!(e, ServerEvent::SpeechStart { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        ServerEvent::StreamComplete { interrupted: false, .. }
    )));
}
