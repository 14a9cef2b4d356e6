//! Per-session turn arbitration.
//!
//! One controller owns everything a connected client needs: the frame
//! aligner, the VAD, the streaming transcriber, the conversation history,
//! and the single active generation. All inputs (PCM, client control
//! messages, STT results, generation progress) converge on one event
//! loop, so the session needs no internal locking and outbound events
//! leave in a single serialized order.

use crate::agents::{AgentConfig, AgentRegistry};
use crate::audio::frame::{AudioFrame, FrameAligner};
use crate::config::VoiceConfig;
use crate::llm::LanguageModel;
use crate::pipeline::generator::{GenerationContext, ResponseGenerator};
use crate::pipeline::messages::{
    unix_now, ClientEvent, ConversationMessage, GenerationEvent, GenerationUpdate, ServerEvent,
    Transcript, TranscriptKind, TurnState,
};
use crate::stt::{SttEvent, SttProvider, StreamingTranscriber};
use crate::tts::SpeechSynthesizer;
use crate::vad::{VadEvent, VadMode, VoiceActivityDetector};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Channel depths for the session-internal queues.
const INPUT_CHANNEL_SIZE: usize = 256;
const STT_CHANNEL_SIZE: usize = 64;
const GENERATION_CHANNEL_SIZE: usize = 64;

/// Everything a session needs from the process, shared across sessions.
#[derive(Clone)]
pub struct SessionDeps {
    pub config: VoiceConfig,
    pub registry: Arc<dyn AgentRegistry>,
    pub stt: Arc<dyn SttProvider>,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn SpeechSynthesizer>,
    /// Process-wide cap on concurrent TTS synthesis.
    pub tts_permits: Arc<Semaphore>,
}

/// Raw input from the client connection.
#[derive(Debug)]
pub enum SessionInput {
    /// A binary frame of 16-bit LE mono PCM at 8 kHz, any length.
    Pcm(Bytes),
    /// A parsed control message.
    Control(ClientEvent),
}

/// The client-facing ends of a session.
pub struct SessionHandle {
    /// Feed PCM and control messages in.
    pub input: mpsc::Sender<SessionInput>,
    /// Drain ordered outbound events; owned by the connection writer.
    pub outbound: mpsc::Receiver<ServerEvent>,
}

/// One in-flight response generation (confirmed or speculative).
struct ActiveGeneration {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    /// The user text this run answers (provisional while speculative).
    user_text: String,
    /// Still awaiting transcript confirmation.
    speculative: bool,
    /// Whether any audio chunk reached the client.
    audio_sent: bool,
    /// Text deltas delivered so far.
    text_so_far: String,
    /// Set when a speculative run completes before confirmation.
    finished: Option<String>,
}

/// Bounded, degrade-on-overflow sender for outbound events.
struct Outbound {
    tx: mpsc::Sender<ServerEvent>,
    degraded: bool,
}

impl Outbound {
    fn send(&mut self, event: ServerEvent) {
        if self.degraded {
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                error!("outbound queue overflow; degrading session");
                self.degraded = true;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.degraded = true;
            }
        }
    }
}

/// The per-session state machine.
pub struct TurnController {
    registry: Arc<dyn AgentRegistry>,
    generator: ResponseGenerator,
    outbound: Outbound,
    stt_tx: mpsc::Sender<SttEvent>,
    gen_tx: mpsc::Sender<GenerationUpdate>,

    aligner: FrameAligner,
    vad: VoiceActivityDetector,
    transcriber: StreamingTranscriber,

    state: TurnState,
    turn_id: u64,
    history: Vec<ConversationMessage>,
    agent: Option<AgentConfig>,
    active: Option<ActiveGeneration>,
    /// True from the first audio chunk until the client reports playback
    /// complete. Read each frame to pick the VAD mode.
    is_agent_speaking: bool,
    finalize_deadline: Option<tokio::time::Instant>,
    finalize_wait: Duration,
    speculation_enabled: bool,
    session_cancel: CancellationToken,
}

impl TurnController {
    fn new(
        deps: &SessionDeps,
        outbound_tx: mpsc::Sender<ServerEvent>,
        stt_tx: mpsc::Sender<SttEvent>,
        gen_tx: mpsc::Sender<GenerationUpdate>,
    ) -> Self {
        let generator = ResponseGenerator::new(
            Arc::clone(&deps.llm),
            Arc::clone(&deps.tts),
            Arc::clone(&deps.tts_permits),
            &deps.config.llm,
        );
        Self {
            registry: Arc::clone(&deps.registry),
            generator,
            outbound: Outbound {
                tx: outbound_tx,
                degraded: false,
            },
            stt_tx,
            gen_tx,
            aligner: FrameAligner::new(),
            vad: VoiceActivityDetector::new(&deps.config.vad),
            transcriber: StreamingTranscriber::new(Arc::clone(&deps.stt), &deps.config.stt),
            state: TurnState::Idle,
            turn_id: 0,
            history: Vec::new(),
            agent: None,
            active: None,
            is_agent_speaking: false,
            finalize_deadline: None,
            finalize_wait: Duration::from_millis(deps.config.stt.finalize_wait_ms),
            speculation_enabled: deps.config.session.speculation,
            session_cancel: CancellationToken::new(),
        }
    }

    fn is_degraded(&self) -> bool {
        self.outbound.degraded
    }

    fn finalize_deadline(&self) -> Option<tokio::time::Instant> {
        self.finalize_deadline
    }

    fn vad_mode(&self) -> VadMode {
        // While the agent is generating or audible, user speech is only a
        // potential barge-in, never a new turn.
        match self.state {
            TurnState::Generating | TurnState::Speaking => VadMode::AgentActive,
            _ => VadMode::Listening,
        }
    }

    async fn on_pcm(&mut self, data: Bytes) {
        self.aligner.push(&data);
        while let Some(frame) = self.aligner.next_frame() {
            if self.is_degraded() {
                return;
            }
            let mode = self.vad_mode();
            for event in self.vad.process(&frame, mode) {
                self.on_vad(event).await;
            }
        }
    }

    async fn on_vad(&mut self, event: VadEvent) {
        match event {
            VadEvent::SpeechStart { pre_speech } => self.on_speech_start(pre_speech).await,
            VadEvent::Frame { frame, is_speech } => {
                if self.state == TurnState::PrefetchPending && is_speech {
                    // The pause was a false alarm; the speculative answer
                    // is for an unfinished question.
                    self.cancel_active_generation();
                    self.state = TurnState::UserSpeaking;
                }
                self.transcriber.push(frame.pcm);
            }
            VadEvent::PrefetchTick => self.on_prefetch_tick(),
            VadEvent::SpeechEnd => self.on_speech_end(),
            VadEvent::BargeInConfirmed { pre_speech } => {
                info!("barge-in confirmed while agent active");
                self.on_interrupt(Some(pre_speech)).await;
            }
        }
    }

    async fn on_speech_start(&mut self, pre_speech: Vec<AudioFrame>) {
        match self.state {
            TurnState::Idle => self.begin_user_segment(pre_speech).await,
            TurnState::AwaitingConfirmation => {
                // The user resumed inside the flush window; keep the turn
                // open and let the transcript keep accumulating.
                debug!("speech resumed during finalize wait");
                self.finalize_deadline = None;
                self.state = TurnState::UserSpeaking;
                for frame in pre_speech {
                    self.transcriber.push(frame.pcm);
                }
            }
            _ => {}
        }
    }

    /// Open a user segment: ensure the transcriber is live, announce the
    /// start, and feed the pre-speech window so the onset is not clipped.
    ///
    /// When the provider cannot be reached, the segment still runs (its
    /// frames are dropped and no transcript can confirm), one `error` is
    /// reported, and the next segment retries the connection.
    async fn begin_user_segment(&mut self, pre_speech: Vec<AudioFrame>) {
        if !self.transcriber.is_healthy()
            && let Err(e) = self.transcriber.open(self.stt_tx.clone()).await
        {
            self.outbound.send(ServerEvent::Error {
                message: format!("speech recognition unavailable: {e}"),
                timestamp: unix_now(),
            });
        }
        self.outbound.send(ServerEvent::SpeechStart {
            timestamp: unix_now(),
        });
        for frame in pre_speech {
            self.transcriber.push(frame.pcm);
        }
        self.state = TurnState::UserSpeaking;
    }

    fn on_prefetch_tick(&mut self) {
        if self.state != TurnState::UserSpeaking {
            return;
        }
        self.state = TurnState::PrefetchPending;

        if !self.speculation_enabled || self.active.is_some() {
            return;
        }
        let snapshot = self.transcriber.snapshot();
        if snapshot.is_empty() {
            return;
        }
        let provisional = Transcript {
            text: snapshot,
            kind: TranscriptKind::SpeculativeFinal,
            turn_id: self.turn_id + 1,
            timestamp: unix_now(),
        };
        info!("prefetch: speculating on '{}'", provisional.text);
        self.launch_generation(provisional);
    }

    fn on_speech_end(&mut self) {
        self.outbound.send(ServerEvent::SpeechEnd {
            timestamp: unix_now(),
        });
        if matches!(
            self.state,
            TurnState::UserSpeaking | TurnState::PrefetchPending
        ) {
            self.state = TurnState::AwaitingConfirmation;
            self.transcriber.request_flush();
            self.finalize_deadline = Some(tokio::time::Instant::now() + self.finalize_wait);
        }
    }

    fn on_stt(&mut self, event: SttEvent) {
        self.transcriber.apply(&event);
        if self.state != TurnState::AwaitingConfirmation {
            return;
        }
        match event {
            // The flush round-trip completed, or the session died and no
            // more finals can arrive: confirm with what we have.
            SttEvent::Final {
                from_flush: true, ..
            }
            | SttEvent::Closed
            | SttEvent::Error(_) => self.finish_confirmation(),
            _ => {}
        }
    }

    fn on_finalize_timeout(&mut self) {
        if self.state == TurnState::AwaitingConfirmation {
            debug!("finalize wait elapsed");
            self.finish_confirmation();
        }
    }

    fn finish_confirmation(&mut self) {
        self.finalize_deadline = None;
        let text = self.transcriber.take_final();
        if text.is_empty() {
            debug!("empty confirmed transcript; dropping turn");
            self.cancel_active_generation();
            self.state = TurnState::Idle;
            return;
        }
        let confirmed = Transcript {
            text,
            kind: TranscriptKind::ConfirmedFinal,
            turn_id: self.turn_id,
            timestamp: unix_now(),
        };

        match self.active.take() {
            Some(active) if active.speculative => {
                if active.user_text.trim() == confirmed.text.trim() {
                    info!("speculation confirmed; promoting in-flight turn");
                    self.promote(active);
                } else {
                    info!(
                        "speculation mismatch ('{}' vs '{}'); regenerating",
                        active.user_text, confirmed.text
                    );
                    self.cancel_generation(active);
                    self.start_confirmed_turn(confirmed);
                }
            }
            Some(active) => {
                // A confirmed generation mid-flight should be unreachable
                // here; put it back rather than corrupt the turn.
                warn!("confirmation while a non-speculative run is active");
                self.active = Some(active);
            }
            None => self.start_confirmed_turn(confirmed),
        }
    }

    fn start_confirmed_turn(&mut self, confirmed: Transcript) {
        let text = confirmed.text.clone();
        self.launch_generation(confirmed);
        // History mutates only on confirmed transcripts.
        self.history.push(ConversationMessage::user(text));
        self.state = TurnState::Generating;
    }

    /// Spawn a generation run under a fresh turn id and announce the turn
    /// to the client (`user_transcript` then `stream_start`).
    fn launch_generation(&mut self, transcript: Transcript) {
        self.turn_id += 1;
        let turn_id = self.turn_id;
        let speculative = transcript.kind == TranscriptKind::SpeculativeFinal;

        self.outbound.send(ServerEvent::UserTranscript {
            text: transcript.text.clone(),
            timestamp: unix_now(),
        });
        self.outbound.send(ServerEvent::StreamStart {
            timestamp: unix_now(),
        });

        let cancel = self.session_cancel.child_token();
        let ctx = GenerationContext {
            turn_id,
            user_text: transcript.text.clone(),
            history: self.history.clone(),
            agent: self.agent.clone(),
            speculative,
        };
        let task = self.generator.spawn(ctx, self.gen_tx.clone(), cancel.clone());
        self.active = Some(ActiveGeneration {
            cancel,
            task,
            user_text: transcript.text,
            speculative,
            audio_sent: false,
            text_so_far: String::new(),
            finished: None,
        });
    }

    /// The speculative run turned out to answer the real question: adopt
    /// it without regenerating.
    fn promote(&mut self, mut active: ActiveGeneration) {
        self.history
            .push(ConversationMessage::user(active.user_text.clone()));
        if let Some(full_text) = active.finished.take() {
            self.history.push(ConversationMessage::assistant(full_text));
            self.state = if self.is_agent_speaking {
                TurnState::Speaking
            } else {
                TurnState::Idle
            };
        } else {
            active.speculative = false;
            self.state = if active.audio_sent {
                TurnState::Speaking
            } else {
                TurnState::Generating
            };
            self.active = Some(active);
        }
    }

    fn cancel_active_generation(&mut self) {
        if let Some(active) = self.active.take() {
            self.cancel_generation(active);
        }
    }

    /// Cancel an unconfirmed run: stop the task, invalidate its turn id,
    /// and close the client-side stream it had opened.
    fn cancel_generation(&mut self, active: ActiveGeneration) {
        active.cancel.cancel();
        active.task.abort();
        self.turn_id += 1;
        if active.finished.is_none() {
            self.outbound.send(ServerEvent::StreamComplete {
                full_text: active.text_so_far.trim().to_owned(),
                interrupted: true,
                timestamp: unix_now(),
            });
        }
    }

    /// Tear down the current agent activity. `barge_in` carries the
    /// pre-speech window when the interrupt came from the VAD, in which
    /// case the interrupting utterance immediately becomes a new segment.
    async fn on_interrupt(&mut self, barge_in: Option<Vec<AudioFrame>>) {
        self.state = TurnState::Interrupted;
        self.finalize_deadline = None;

        self.outbound.send(ServerEvent::StopAudioImmediately {
            timestamp: unix_now(),
        });
        self.outbound.send(ServerEvent::UserInterruption {
            timestamp: unix_now(),
        });
        self.outbound.send(ServerEvent::InterruptionComplete {
            timestamp: unix_now(),
        });

        // Advance the turn before any new work so in-flight emits from
        // the old turn fail the id check.
        self.turn_id += 1;
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            active.task.abort();
            if active.finished.is_none() {
                let partial = active.text_so_far.trim().to_owned();
                self.outbound.send(ServerEvent::StreamComplete {
                    full_text: partial.clone(),
                    interrupted: true,
                    timestamp: unix_now(),
                });
                // The client heard the partial answer; the model should
                // see it too.
                if !active.speculative && !partial.is_empty() {
                    self.history.push(ConversationMessage::assistant(partial));
                }
            }
        }
        self.is_agent_speaking = false;

        match barge_in {
            Some(pre_speech) => self.begin_user_segment(pre_speech).await,
            None => {
                self.state = TurnState::Idle;
                self.vad.reset();
            }
        }
    }

    fn on_generation(&mut self, update: GenerationUpdate) {
        // Work items from superseded turns are dropped before sending.
        if update.turn_id != self.turn_id {
            debug!(
                "dropping stale generation event (turn {} != {})",
                update.turn_id, self.turn_id
            );
            return;
        }
        match update.event {
            GenerationEvent::Text(text) => {
                if let Some(active) = self.active.as_mut() {
                    active.text_so_far.push_str(&text);
                }
                self.outbound.send(ServerEvent::TextChunk {
                    text,
                    timestamp: unix_now(),
                });
            }
            GenerationEvent::Audio { url, text } => {
                if let Some(active) = self.active.as_mut() {
                    active.audio_sent = true;
                }
                self.is_agent_speaking = true;
                if self.state == TurnState::Generating {
                    self.state = TurnState::Speaking;
                }
                self.outbound.send(ServerEvent::AudioChunk {
                    audio_url: url,
                    text,
                    timestamp: unix_now(),
                });
            }
            GenerationEvent::GreetingAudio { url } => {
                self.outbound.send(ServerEvent::GreetingAudio {
                    audio_url: url,
                    timestamp: unix_now(),
                });
                // Listening pauses until the client reports the greeting
                // finished playing.
                self.is_agent_speaking = true;
                self.state = TurnState::Speaking;
            }
            GenerationEvent::Completed { full_text } => self.on_generation_complete(full_text),
        }
    }

    fn on_generation_complete(&mut self, full_text: String) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.speculative {
            // Hold the result; confirmation decides whether it counts.
            active.finished = Some(full_text.clone());
            self.outbound.send(ServerEvent::StreamComplete {
                full_text,
                interrupted: false,
                timestamp: unix_now(),
            });
            return;
        }
        let audio_sent = active.audio_sent;
        self.active = None;
        self.history
            .push(ConversationMessage::assistant(full_text.clone()));
        self.outbound.send(ServerEvent::StreamComplete {
            full_text,
            interrupted: false,
            timestamp: unix_now(),
        });
        self.state = if audio_sent && self.is_agent_speaking {
            TurnState::Speaking
        } else {
            TurnState::Idle
        };
    }

    async fn on_client(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::AudioConfig {} => debug!("audio config acknowledged"),
            ClientEvent::AgentConfig { agent_id } => {
                if self.agent.is_some() {
                    warn!("agent already configured for this session; ignoring");
                    return;
                }
                match self.registry.get(&agent_id) {
                    Some(config) => {
                        info!("agent configured: {}", config.name);
                        self.agent = Some(config);
                    }
                    None => warn!("unknown agent id: {agent_id}"),
                }
            }
            ClientEvent::CallStarted => self.on_call_started(),
            ClientEvent::AudioPlaybackComplete => {
                if !self.is_agent_speaking {
                    // Duplicate notifications are a no-op.
                    debug!("playback-complete while not speaking; ignored");
                    return;
                }
                info!("client playback complete");
                self.is_agent_speaking = false;
                if self.state == TurnState::Speaking && self.active.is_none() {
                    self.state = TurnState::Idle;
                }
            }
            ClientEvent::Interrupt { reason } => {
                let agent_busy = self.active.is_some()
                    || self.is_agent_speaking
                    || matches!(self.state, TurnState::Generating | TurnState::Speaking);
                if agent_busy {
                    info!("client interrupt ({reason})");
                    self.on_interrupt(None).await;
                } else {
                    debug!("interrupt while idle ignored ({reason})");
                }
            }
        }
    }

    fn on_call_started(&mut self) {
        let Some(greeting) = self.agent.as_ref().and_then(|a| a.greeting.clone()) else {
            debug!("call started; agent has no greeting");
            return;
        };
        info!("call started; greeting");
        // The greeting is part of the conversation the model sees.
        self.history
            .push(ConversationMessage::assistant(greeting.clone()));
        self.outbound.send(ServerEvent::AgentGreeting {
            text: greeting.clone(),
            timestamp: unix_now(),
        });
        let _greeting_task = self.generator.spawn_greeting(
            self.turn_id,
            greeting,
            self.gen_tx.clone(),
            self.session_cancel.child_token(),
        );
    }

    async fn shutdown(&mut self) {
        self.session_cancel.cancel();
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            active.task.abort();
        }
        self.transcriber.close().await;
    }
}

/// One connected client's pipeline, driven by [`Session::run`].
pub struct Session {
    controller: TurnController,
    input_rx: mpsc::Receiver<SessionInput>,
    stt_rx: mpsc::Receiver<SttEvent>,
    gen_rx: mpsc::Receiver<GenerationUpdate>,
}

impl Session {
    /// Build a session and the handles its connection uses.
    pub fn new(deps: &SessionDeps) -> (Self, SessionHandle) {
        let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_SIZE);
        let (outbound_tx, outbound_rx) = mpsc::channel(deps.config.session.outbound_queue);
        let (stt_tx, stt_rx) = mpsc::channel(STT_CHANNEL_SIZE);
        let (gen_tx, gen_rx) = mpsc::channel(GENERATION_CHANNEL_SIZE);

        let controller = TurnController::new(deps, outbound_tx, stt_tx, gen_tx);
        (
            Self {
                controller,
                input_rx,
                stt_rx,
                gen_rx,
            },
            SessionHandle {
                input: input_tx,
                outbound: outbound_rx,
            },
        )
    }

    /// Run the session loop until the connection closes or the session
    /// degrades.
    pub async fn run(mut self) {
        info!("session started");
        loop {
            let deadline = self.controller.finalize_deadline();
            tokio::select! {
                input = self.input_rx.recv() => {
                    match input {
                        Some(SessionInput::Pcm(data)) => self.controller.on_pcm(data).await,
                        Some(SessionInput::Control(event)) => self.controller.on_client(event).await,
                        None => break,
                    }
                }
                event = self.stt_rx.recv() => {
                    if let Some(event) = event {
                        self.controller.on_stt(event);
                    }
                }
                update = self.gen_rx.recv() => {
                    if let Some(update) = update {
                        self.controller.on_generation(update);
                    }
                }
                () = finalize_wait(deadline) => self.controller.on_finalize_timeout(),
            }
            if self.controller.is_degraded() {
                error!("session degraded; closing");
                break;
            }
        }
        self.controller.shutdown().await;
        info!("session closed");
    }
}

async fn finalize_wait(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
