//! ElevenLabs synthesis client.
//!
//! One POST per chunk; the MP3 bytes go straight into the artifact store
//! and only the `/audio/<id>` reference travels back through the pipeline.

use crate::audio::store::AudioStore;
use crate::config::TtsConfig;
use crate::error::{Result, VoiceError};
use crate::tts::SpeechSynthesizer;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Lower stability trades polish for faster generation.
const STABILITY: f32 = 0.5;
const SIMILARITY_BOOST: f32 = 0.75;

/// TTS backed by the ElevenLabs API.
pub struct ElevenLabsTts {
    client: reqwest::Client,
    config: TtsConfig,
    api_key: String,
    store: Arc<dyn AudioStore>,
}

impl ElevenLabsTts {
    /// Build the client with an explicit API key.
    pub fn new(config: &TtsConfig, api_key: impl Into<String>, store: Arc<dyn AudioStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config: config.clone(),
            api_key: api_key.into(),
            store,
        }
    }

    /// Build the client, reading `ELEVENLABS_API_KEY` from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is missing.
    pub fn from_env(config: &TtsConfig, store: Arc<dyn AudioStore>) -> Result<Self> {
        let api_key = std::env::var("ELEVENLABS_API_KEY")
            .map_err(|_| VoiceError::Config("ELEVENLABS_API_KEY not set".into()))?;
        Ok(Self::new(config, api_key, store))
    }

    fn request_url(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.voice_id
        )
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsTts {
    async fn synthesize(&self, text: &str) -> Result<String> {
        let started = Instant::now();
        let body = serde_json::json!({
            "text": text,
            "model_id": self.config.model,
            "voice_settings": {
                "stability": STABILITY,
                "similarity_boost": SIMILARITY_BOOST,
            },
        });

        let response = self
            .client
            .post(self.request_url())
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Tts(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!(
                "provider returned {status}: {detail}"
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| VoiceError::Tts(format!("body read failed: {e}")))?;
        let reference = self.store.put(audio, "mp3").await?;

        info!(
            "synthesized {} chars in {:.0}ms -> {reference}",
            text.len(),
            started.elapsed().as_millis()
        );
        Ok(reference)
    }
}
