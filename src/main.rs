//! Server binary: config, providers, and the axum surface.

use anyhow::Context;
use parley::agents::InMemoryAgentRegistry;
use parley::audio::store::DiskAudioStore;
use parley::llm::gemini::GeminiLlm;
use parley::pipeline::SessionDeps;
use parley::server::{self, AppState};
use parley::stt::deepgram::DeepgramStt;
use parley::tts::elevenlabs::ElevenLabsTts;
use parley::VoiceConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("parley=info,tower_http=info")),
        )
        .init();

    let config = load_config()?;

    let store = Arc::new(
        DiskAudioStore::new(&config.audio_store).context("failed to init audio store")?,
    );
    let shutdown = CancellationToken::new();
    tokio::spawn(DiskAudioStore::run_cleanup(
        config.audio_store.clone(),
        shutdown.clone(),
    ));

    let stt = Arc::new(DeepgramStt::from_env(&config.stt).context("STT provider")?);
    let llm = Arc::new(GeminiLlm::from_env(&config.llm).context("LLM provider")?);
    let tts = Arc::new(
        ElevenLabsTts::from_env(&config.tts, Arc::clone(&store) as _).context("TTS provider")?,
    );

    let agents = Arc::new(InMemoryAgentRegistry::with_samples());
    let deps = SessionDeps {
        config: config.clone(),
        registry: Arc::clone(&agents) as _,
        stt,
        llm,
        tts,
        tts_permits: Arc::new(Semaphore::new(config.tts.max_concurrent)),
    };
    let state = AppState {
        deps,
        agents,
    };

    let app = server::router(state, &config.audio_store.dir);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {addr}");

    axum::serve(listener, app).await.context("server error")?;
    shutdown.cancel();
    Ok(())
}

/// Load config from `PARLEY_CONFIG` / first CLI argument, falling back to
/// defaults when no file is given.
fn load_config() -> anyhow::Result<VoiceConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PARLEY_CONFIG").ok())
        .map(PathBuf::from);
    match path {
        Some(path) => {
            info!("loading config from {}", path.display());
            Ok(VoiceConfig::load(&path)?)
        }
        None => Ok(VoiceConfig::default()),
    }
}
