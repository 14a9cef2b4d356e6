//! Response generation for one user turn.
//!
//! Streams LLM tokens, splits the first sentence out for early synthesis,
//! synthesizes the remainder when the stream ends, and reports everything
//! back to the controller tagged with the owning turn id. Audio chunks are
//! delivered strictly in source-sentence order. Cancellation is
//! cooperative: once the token fires, nothing further is emitted.

use crate::agents::AgentConfig;
use crate::config::LlmConfig;
use crate::llm::{prompt, LanguageModel};
use crate::pipeline::messages::{ConversationMessage, GenerationEvent, GenerationUpdate};
use crate::tts::SpeechSynthesizer;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Spoken when the model fails mid-turn.
const APOLOGY: &str = "I'm sorry, I encountered an error while processing your request.";

/// Head-buffer size for detecting an echoed `Assistant:` prefix.
const PREFIX_SCAN_CHARS: usize = 15;

/// Everything a generation run needs, captured at spawn time.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    /// Turn id every emitted update carries.
    pub turn_id: u64,
    /// The user utterance driving this turn.
    pub user_text: String,
    /// Conversation history up to (not including) this turn.
    pub history: Vec<ConversationMessage>,
    /// Active agent profile, if one was selected.
    pub agent: Option<AgentConfig>,
    /// Whether this run was launched from a prefetch snapshot.
    pub speculative: bool,
}

/// Factory for generation tasks; owns the provider handles shared by a
/// session.
pub struct ResponseGenerator {
    llm: Arc<dyn LanguageModel>,
    tts: Arc<dyn SpeechSynthesizer>,
    tts_permits: Arc<Semaphore>,
    history_tail: usize,
}

impl ResponseGenerator {
    /// Create a generator over the provider stack.
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        tts: Arc<dyn SpeechSynthesizer>,
        tts_permits: Arc<Semaphore>,
        llm_config: &LlmConfig,
    ) -> Self {
        Self {
            llm,
            tts,
            tts_permits,
            history_tail: llm_config.history_tail,
        }
    }

    /// Spawn one generation run.
    pub fn spawn(
        &self,
        ctx: GenerationContext,
        updates: mpsc::Sender<GenerationUpdate>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let llm = Arc::clone(&self.llm);
        let tts = Arc::clone(&self.tts);
        let permits = Arc::clone(&self.tts_permits);
        let history_tail = self.history_tail;
        tokio::spawn(async move {
            run_generation(ctx, llm, tts, permits, history_tail, updates, cancel).await;
        })
    }

    /// Spawn a greeting synthesis. Reports `GreetingAudio` on success and
    /// nothing on failure (the session simply stays listening).
    pub fn spawn_greeting(
        &self,
        turn_id: u64,
        text: String,
        updates: mpsc::Sender<GenerationUpdate>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let tts = Arc::clone(&self.tts);
        let permits = Arc::clone(&self.tts_permits);
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let result = tokio::select! {
                () = cancel.cancelled() => return,
                r = tts.synthesize(&text) => r,
            };
            match result {
                Ok(url) => {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let _ = updates
                        .send(GenerationUpdate {
                            turn_id,
                            event: GenerationEvent::GreetingAudio { url },
                        })
                        .await;
                }
                Err(e) => warn!("greeting synthesis failed: {e}"),
            }
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_generation(
    ctx: GenerationContext,
    llm: Arc<dyn LanguageModel>,
    tts: Arc<dyn SpeechSynthesizer>,
    permits: Arc<Semaphore>,
    history_tail: usize,
    updates: mpsc::Sender<GenerationUpdate>,
    cancel: CancellationToken,
) {
    let emit = Emitter {
        turn_id: ctx.turn_id,
        updates,
        cancel: cancel.clone(),
    };

    let prompt = prompt::build_prompt(
        ctx.agent.as_ref(),
        &ctx.history,
        &ctx.user_text,
        history_tail,
    );
    info!(
        turn_id = ctx.turn_id,
        speculative = ctx.speculative,
        "generating response to: {}",
        ctx.user_text
    );

    let started = std::time::Instant::now();
    let mut full_text = String::new();
    let mut head = HeadStripper::new();
    let mut audio_slots = AudioSlots::new(tts, permits, cancel.clone());
    let mut llm_failed = false;

    match llm.stream(&prompt).await {
        Ok(mut tokens) => loop {
            let token = tokio::select! {
                () = cancel.cancelled() => {
                    audio_slots.abandon();
                    return;
                }
                t = tokens.next() => t,
            };
            match token {
                Some(Ok(delta)) => {
                    let Some(released) = head.push(&delta) else {
                        continue;
                    };
                    if released.is_empty() {
                        continue;
                    }
                    full_text.push_str(&released);
                    if !emit.send(GenerationEvent::Text(released)).await {
                        audio_slots.abandon();
                        return;
                    }
                    // First terminator seen: launch early synthesis while
                    // the model keeps streaming.
                    audio_slots.queue_first_sentence(&full_text);
                }
                Some(Err(e)) => {
                    warn!("LLM stream failed mid-turn: {e}");
                    llm_failed = true;
                    break;
                }
                None => break,
            }
        },
        Err(e) => {
            warn!("LLM stream open failed: {e}");
            llm_failed = true;
        }
    }

    // Flush any short response still sitting in the head buffer.
    if let Some(rest) = head.flush()
        && !rest.is_empty()
    {
        full_text.push_str(&rest);
        if !emit.send(GenerationEvent::Text(rest)).await {
            audio_slots.abandon();
            return;
        }
        audio_slots.queue_first_sentence(&full_text);
    }

    if llm_failed {
        full_text.push_str(APOLOGY);
        if !emit.send(GenerationEvent::Text(APOLOGY.to_owned())).await {
            audio_slots.abandon();
            return;
        }
        audio_slots.queue_first_sentence(&full_text);
    }

    // Whatever follows the first sentence becomes the second (and last)
    // audio chunk. A lone terminator is not worth a synthesis call.
    let spoken = audio_slots.first_sentence_end().unwrap_or(0);
    let remainder = full_text[spoken..].trim().to_owned();
    if !remainder.is_empty() && remainder != "." {
        audio_slots.queue(remainder);
    }

    // Drain the slots in launch order so audio reaches the client in
    // source-sentence order regardless of synthesis timing.
    if !audio_slots.drain(&emit).await {
        return;
    }

    info!(
        turn_id = ctx.turn_id,
        "generation complete ({} chars in {:.0}ms)",
        full_text.len(),
        started.elapsed().as_millis()
    );
    let _ = emit
        .send(GenerationEvent::Completed {
            full_text: full_text.trim().to_owned(),
        })
        .await;
}

/// Turn-tagged sender that refuses to emit after cancellation.
struct Emitter {
    turn_id: u64,
    updates: mpsc::Sender<GenerationUpdate>,
    cancel: CancellationToken,
}

impl Emitter {
    async fn send(&self, event: GenerationEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.updates
            .send(GenerationUpdate {
                turn_id: self.turn_id,
                event,
            })
            .await
            .is_ok()
    }
}

/// Per-turn indexed synthesis slots, drained in launch order.
struct AudioSlots {
    tts: Arc<dyn SpeechSynthesizer>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    slots: Vec<(String, JoinHandle<Option<String>>)>,
    first_sentence_end: Option<usize>,
}

impl AudioSlots {
    fn new(tts: Arc<dyn SpeechSynthesizer>, permits: Arc<Semaphore>, cancel: CancellationToken) -> Self {
        Self {
            tts,
            permits,
            cancel,
            slots: Vec::new(),
            first_sentence_end: None,
        }
    }

    fn first_sentence_end(&self) -> Option<usize> {
        self.first_sentence_end
    }

    /// Queue the first sentence once a terminator appears in the buffer.
    fn queue_first_sentence(&mut self, full_text: &str) {
        if self.first_sentence_end.is_none()
            && let Some(end) = first_sentence_split(full_text)
        {
            self.first_sentence_end = Some(end);
            self.queue(full_text[..end].trim().to_owned());
        }
    }

    fn queue(&mut self, text: String) {
        let handle = spawn_tts(
            Arc::clone(&self.tts),
            Arc::clone(&self.permits),
            self.cancel.clone(),
            text.clone(),
        );
        self.slots.push((text, handle));
    }

    /// Emit completed chunks in slot order. Returns false if the turn was
    /// cancelled or the session went away.
    async fn drain(self, emit: &Emitter) -> bool {
        for (text, handle) in self.slots {
            let joined = tokio::select! {
                () = self.cancel.cancelled() => return false,
                j = handle => j,
            };
            match joined {
                Ok(Some(url)) => {
                    if !emit.send(GenerationEvent::Audio { url, text }).await {
                        return false;
                    }
                }
                // Failed synthesis skips the chunk; the text was delivered.
                Ok(None) => {}
                Err(e) => warn!("TTS task panicked: {e}"),
            }
        }
        true
    }

    fn abandon(self) {
        for (_, handle) in self.slots {
            handle.abort();
        }
    }
}

fn spawn_tts(
    tts: Arc<dyn SpeechSynthesizer>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    text: String,
) -> JoinHandle<Option<String>> {
    tokio::spawn(async move {
        let Ok(_permit) = permits.acquire_owned().await else {
            return None;
        };
        if cancel.is_cancelled() {
            return None;
        }
        let result = tokio::select! {
            () = cancel.cancelled() => return None,
            r = tts.synthesize(&text) => r,
        };
        match result {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("TTS synthesis failed, skipping chunk: {e}");
                None
            }
        }
    })
}

/// Buffers the first few characters of the stream so an echoed
/// `Assistant:` prompt prefix can be removed before any text escapes.
struct HeadStripper {
    buf: String,
    done: bool,
}

impl HeadStripper {
    fn new() -> Self {
        Self {
            buf: String::new(),
            done: false,
        }
    }

    /// Feed one delta; returns text ready to emit, if any.
    fn push(&mut self, delta: &str) -> Option<String> {
        if self.done {
            return Some(delta.to_owned());
        }
        self.buf.push_str(delta);
        if self.buf.len() >= PREFIX_SCAN_CHARS || self.buf.contains('\n') {
            self.done = true;
            return Some(strip_assistant_prefix(&std::mem::take(&mut self.buf)));
        }
        None
    }

    /// Release whatever is still buffered (short responses).
    fn flush(&mut self) -> Option<String> {
        if self.done || self.buf.is_empty() {
            return None;
        }
        self.done = true;
        Some(strip_assistant_prefix(&std::mem::take(&mut self.buf)))
    }
}

fn strip_assistant_prefix(text: &str) -> String {
    let lower = text.to_lowercase();
    if lower.trim_start().starts_with("assistant:")
        && let Some(idx) = lower.find("assistant:")
    {
        return text[idx + "assistant:".len()..].trim_start().to_owned();
    }
    text.to_owned()
}

/// Byte offset just past the first sentence terminator, treating a run of
/// terminators (an ellipsis, `?!`) as a single boundary.
fn first_sentence_split(text: &str) -> Option<usize> {
    let is_terminator = |c: char| matches!(c, '.' | '!' | '?');
    let start = text.find(is_terminator)?;
    let mut end = start;
    for (idx, c) in text[start..].char_indices() {
        if is_terminator(c) {
            end = start + idx + c.len_utf8();
        } else {
            break;
        }
    }
    Some(end)
}
