//! Streaming speech-to-text.
//!
//! The provider runs a live socket session behind [`SttProvider`]; results
//! come back as messages on a channel the session loop owns, so their
//! ordering relative to VAD events stays explicit. The
//! [`StreamingTranscriber`] tracks the committed/interim text buffers and
//! keeps the provider session alive with silence while the user pauses.

pub mod deepgram;

use crate::config::SttConfig;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 50 ms of 16-bit mono silence at 8 kHz.
const KEEPALIVE_SILENCE_BYTES: usize = 800;
static KEEPALIVE_SILENCE: [u8; KEEPALIVE_SILENCE_BYTES] = [0u8; KEEPALIVE_SILENCE_BYTES];

/// Messages from a live STT session.
#[derive(Debug, Clone)]
pub enum SttEvent {
    /// A partial hypothesis; overwrites the previous interim.
    Interim(String),
    /// A finalized span of text.
    Final {
        text: String,
        /// Whether this final was produced by an explicit flush request.
        from_flush: bool,
    },
    /// The provider closed the session.
    Closed,
    /// The session failed mid-stream.
    Error(String),
}

/// Commands into a live STT session.
#[derive(Debug)]
pub enum SttCommand {
    /// Raw PCM to forward.
    Audio(Bytes),
    /// Ask the provider to flush pending results.
    Flush,
    /// Terminate the session.
    Close,
}

/// Cheap cloneable handle to a live session's command queue.
#[derive(Debug, Clone)]
pub struct SttHandle {
    tx: mpsc::UnboundedSender<SttCommand>,
}

impl SttHandle {
    /// Create a handle and the receiver its session IO task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SttCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Forward audio; returns false if the session is gone.
    pub fn send_audio(&self, pcm: Bytes) -> bool {
        self.tx.send(SttCommand::Audio(pcm)).is_ok()
    }

    /// Request a flush; returns false if the session is gone.
    pub fn flush(&self) -> bool {
        self.tx.send(SttCommand::Flush).is_ok()
    }

    /// Terminate the session.
    pub fn close(&self) {
        let _ = self.tx.send(SttCommand::Close);
    }
}

/// Seam for streaming STT providers.
#[async_trait]
pub trait SttProvider: Send + Sync {
    /// Establish a live session. Results are delivered to `events`; the
    /// returned handle feeds audio and control messages in.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be established.
    async fn connect(&self, events: mpsc::Sender<SttEvent>) -> Result<SttHandle>;
}

/// Live transcription state for one session.
///
/// Owns the provider handle, the committed/interim buffers, and the idle
/// keep-alive task. Event application is driven by the session loop, which
/// owns the receiving end of the event channel.
pub struct StreamingTranscriber {
    provider: Arc<dyn SttProvider>,
    keepalive_interval: Duration,
    handle: Option<SttHandle>,
    keepalive: Option<JoinHandle<()>>,
    keepalive_cancel: CancellationToken,
    last_audio: Arc<Mutex<Instant>>,
    committed: String,
    current_interim: String,
    healthy: bool,
}

impl StreamingTranscriber {
    /// Create a transcriber bound to a provider.
    pub fn new(provider: Arc<dyn SttProvider>, config: &SttConfig) -> Self {
        Self {
            provider,
            keepalive_interval: Duration::from_secs(config.keepalive_secs),
            handle: None,
            keepalive: None,
            keepalive_cancel: CancellationToken::new(),
            last_audio: Arc::new(Mutex::new(Instant::now())),
            committed: String::new(),
            current_interim: String::new(),
            healthy: false,
        }
    }

    /// Whether a session is open and has not failed.
    pub fn is_healthy(&self) -> bool {
        self.handle.is_some() && self.healthy
    }

    /// Establish a fresh provider session, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider connection fails; the transcriber
    /// is left closed and unhealthy.
    pub async fn open(&mut self, events: mpsc::Sender<SttEvent>) -> Result<()> {
        self.close().await;

        let handle = self.provider.connect(events).await.inspect_err(|e| {
            warn!("STT session open failed: {e}");
        })?;

        self.committed.clear();
        self.current_interim.clear();
        self.healthy = true;

        let cancel = CancellationToken::new();
        self.keepalive_cancel = cancel.clone();
        *lock(&self.last_audio) = Instant::now();
        self.keepalive = Some(tokio::spawn(run_keepalive(
            handle.clone(),
            Arc::clone(&self.last_audio),
            self.keepalive_interval,
            cancel,
        )));
        self.handle = Some(handle);
        debug!("STT session opened");
        Ok(())
    }

    /// Forward one frame of PCM. Non-blocking; a failed send marks the
    /// session unhealthy and drops the frame.
    pub fn push(&mut self, pcm: Bytes) {
        *lock(&self.last_audio) = Instant::now();
        if let Some(handle) = &self.handle
            && !handle.send_audio(pcm)
        {
            warn!("STT session lost while forwarding audio");
            self.healthy = false;
        }
    }

    /// Fold one provider event into the text buffers.
    pub fn apply(&mut self, event: &SttEvent) {
        match event {
            SttEvent::Interim(text) => {
                self.current_interim = text.clone();
            }
            SttEvent::Final { text, .. } => {
                if !text.is_empty() {
                    self.committed.push_str(text);
                    self.committed.push(' ');
                }
                self.current_interim.clear();
            }
            SttEvent::Closed => {
                debug!("STT session closed by provider");
                self.healthy = false;
            }
            SttEvent::Error(message) => {
                warn!("STT session error: {message}");
                self.healthy = false;
            }
        }
    }

    /// Committed plus interim text, without mutating state.
    pub fn snapshot(&self) -> String {
        let mut text = self.committed.clone();
        text.push_str(&self.current_interim);
        text.trim().to_owned()
    }

    /// Ask the provider to flush pending finals.
    pub fn request_flush(&mut self) {
        if let Some(handle) = &self.handle
            && !handle.flush()
        {
            self.healthy = false;
        }
    }

    /// Take the committed text and reset both buffers.
    ///
    /// Interim text is discarded: the provider promotes real speech to
    /// finals on flush, and counting interims here would double text.
    pub fn take_final(&mut self) -> String {
        let text = self.committed.trim().to_owned();
        self.committed.clear();
        self.current_interim.clear();
        text
    }

    /// Stop the keep-alive loop and terminate the session.
    pub async fn close(&mut self) {
        self.keepalive_cancel.cancel();
        if let Some(task) = self.keepalive.take() {
            let _ = task.await;
        }
        if let Some(handle) = self.handle.take() {
            handle.close();
        }
        self.healthy = false;
    }
}

async fn run_keepalive(
    handle: SttHandle,
    last_audio: Arc<Mutex<Instant>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = tick.tick() => {
                let idle = lock(&last_audio).elapsed();
                if idle >= interval {
                    if !handle.send_audio(Bytes::from_static(&KEEPALIVE_SILENCE)) {
                        break;
                    }
                    *lock(&last_audio) = Instant::now();
                }
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Provider whose sessions just expose the command queue for assertions.
    struct LoopbackProvider {
        commands: StdMutex<Option<mpsc::UnboundedReceiver<SttCommand>>>,
    }

    impl LoopbackProvider {
        fn new() -> Self {
            Self {
                commands: StdMutex::new(None),
            }
        }

        fn take_commands(&self) -> mpsc::UnboundedReceiver<SttCommand> {
            self.commands
                .lock()
                .expect("lock")
                .take()
                .expect("connect() not called")
        }
    }

    #[async_trait]
    impl SttProvider for LoopbackProvider {
        async fn connect(&self, _events: mpsc::Sender<SttEvent>) -> Result<SttHandle> {
            let (handle, rx) = SttHandle::channel();
            *self.commands.lock().expect("lock") = Some(rx);
            Ok(handle)
        }
    }

    fn transcriber_with(provider: Arc<LoopbackProvider>) -> StreamingTranscriber {
        StreamingTranscriber::new(provider, &SttConfig::default())
    }

    #[tokio::test]
    async fn interims_overwrite_and_finals_accumulate() {
        let provider = Arc::new(LoopbackProvider::new());
        let mut t = transcriber_with(Arc::clone(&provider));
        let (events_tx, _events_rx) = mpsc::channel(8);
        t.open(events_tx).await.expect("open");

        t.apply(&SttEvent::Interim("hel".into()));
        t.apply(&SttEvent::Interim("hello".into()));
        assert_eq!(t.snapshot(), "hello");

        t.apply(&SttEvent::Final {
            text: "hello".into(),
            from_flush: false,
        });
        t.apply(&SttEvent::Interim("wor".into()));
        assert_eq!(t.snapshot(), "hello wor");

        t.apply(&SttEvent::Final {
            text: "world".into(),
            from_flush: true,
        });
        assert_eq!(t.take_final(), "hello world");
        assert_eq!(t.snapshot(), "");
        t.close().await;
    }

    #[tokio::test]
    async fn take_final_discards_unpromoted_interims() {
        let provider = Arc::new(LoopbackProvider::new());
        let mut t = transcriber_with(Arc::clone(&provider));
        let (events_tx, _events_rx) = mpsc::channel(8);
        t.open(events_tx).await.expect("open");

        t.apply(&SttEvent::Final {
            text: "confirmed".into(),
            from_flush: false,
        });
        t.apply(&SttEvent::Interim("trailing guess".into()));
        assert_eq!(t.take_final(), "confirmed");
        t.close().await;
    }

    #[tokio::test]
    async fn provider_error_marks_unhealthy() {
        let provider = Arc::new(LoopbackProvider::new());
        let mut t = transcriber_with(Arc::clone(&provider));
        let (events_tx, _events_rx) = mpsc::channel(8);
        t.open(events_tx).await.expect("open");
        assert!(t.is_healthy());

        t.apply(&SttEvent::Error("socket dropped".into()));
        assert!(!t.is_healthy());
        t.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_sends_silence_while_idle() {
        let provider = Arc::new(LoopbackProvider::new());
        let mut t = transcriber_with(Arc::clone(&provider));
        let (events_tx, _events_rx) = mpsc::channel(8);
        t.open(events_tx).await.expect("open");
        let mut commands = provider.take_commands();

        tokio::time::advance(Duration::from_secs(6)).await;

        let cmd = tokio::time::timeout(Duration::from_secs(1), commands.recv())
            .await
            .expect("keepalive should fire")
            .expect("channel open");
        match cmd {
            SttCommand::Audio(pcm) => {
                assert_eq!(pcm.len(), KEEPALIVE_SILENCE_BYTES);
                assert!(pcm.iter().all(|b| *b == 0));
            }
            other => panic!("expected silence audio, got {other:?}"),
        }
        t.close().await;
    }

    #[tokio::test]
    async fn push_after_session_loss_marks_unhealthy() {
        let provider = Arc::new(LoopbackProvider::new());
        let mut t = transcriber_with(Arc::clone(&provider));
        let (events_tx, _events_rx) = mpsc::channel(8);
        t.open(events_tx).await.expect("open");

        // Dropping the command receiver simulates the IO task dying.
        drop(provider.take_commands());
        t.push(Bytes::from_static(&[0u8; 960]));
        assert!(!t.is_healthy());
        t.close().await;
    }
}
