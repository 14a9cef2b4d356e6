//! Gemini streaming client.
//!
//! Uses `streamGenerateContent` with `alt=sse` and surfaces each candidate
//! text delta as one token on the stream.

use crate::config::LlmConfig;
use crate::error::{Result, VoiceError};
use crate::llm::{LanguageModel, TokenStream};
use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::debug;

/// Streaming LLM backed by the Gemini API.
pub struct GeminiLlm {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: String,
}

impl GeminiLlm {
    /// Build the client with an explicit API key.
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config: config.clone(),
            api_key: api_key.into(),
        }
    }

    /// Build the client, reading `GEMINI_API_KEY` from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is missing.
    pub fn from_env(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| VoiceError::Config("GEMINI_API_KEY not set".into()))?;
        Ok(Self::new(config, api_key))
    }

    fn request_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl LanguageModel for GeminiLlm {
    async fn stream(&self, prompt: &str) -> Result<TokenStream> {
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });

        let response = self
            .client
            .post(self.request_url())
            .query(&[("alt", "sse"), ("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Llm(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Llm(format!(
                "provider returned {status}: {detail}"
            )));
        }
        debug!("LLM stream opened");

        let mut bytes = response.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut buf = String::new();
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| VoiceError::Llm(format!("stream read failed: {e}")))?;
                buf.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim_end_matches('\r').to_owned();
                    buf.drain(..=pos);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        break 'read;
                    }
                    if let Some(text) = extract_delta(data) {
                        yield text;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Pull the text delta out of one SSE data payload, if any.
fn extract_delta(data: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    let text = value["candidates"][0]["content"]["parts"][0]["text"].as_str()?;
    if text.is_empty() {
        None
    } else {
        Some(text.to_owned())
    }
}
