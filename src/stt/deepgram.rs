//! Deepgram live-transcription provider.
//!
//! Opens a `wss://` session per user turn, forwards linear16 PCM, and maps
//! `Results` frames to interim/final events. `Finalize` and `CloseStream`
//! control frames implement flush and shutdown.

use crate::config::SttConfig;
use crate::error::{Result, VoiceError};
use crate::stt::{SttCommand, SttEvent, SttHandle, SttProvider};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Streaming STT backed by Deepgram's live API.
pub struct DeepgramStt {
    config: SttConfig,
    api_key: String,
}

impl DeepgramStt {
    /// Build the provider, reading `DEEPGRAM_API_KEY` from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is missing.
    pub fn from_env(config: &SttConfig) -> Result<Self> {
        let api_key = std::env::var("DEEPGRAM_API_KEY")
            .map_err(|_| VoiceError::Config("DEEPGRAM_API_KEY not set".into()))?;
        Ok(Self {
            config: config.clone(),
            api_key,
        })
    }

    fn session_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.config.endpoint)
            .map_err(|e| VoiceError::Config(format!("bad STT endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("model", &self.config.model)
            .append_pair("language", &self.config.language)
            .append_pair("encoding", "linear16")
            .append_pair("sample_rate", "8000")
            .append_pair("channels", "1")
            .append_pair("punctuate", "true")
            .append_pair("smart_format", "true")
            .append_pair("interim_results", "true");
        Ok(url)
    }
}

#[async_trait]
impl SttProvider for DeepgramStt {
    async fn connect(&self, events: mpsc::Sender<SttEvent>) -> Result<SttHandle> {
        let url = self.session_url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| VoiceError::Stt(format!("bad session request: {e}")))?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.api_key))
            .map_err(|e| VoiceError::Stt(format!("bad API key header: {e}")))?;
        request.headers_mut().insert("Authorization", auth);

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| VoiceError::Stt(format!("live session connect failed: {e}")))?;
        debug!("Deepgram live session established");

        let (handle, commands) = SttHandle::channel();
        tokio::spawn(run_session(ws, commands, events));
        Ok(handle)
    }
}

async fn run_session(
    ws: WsStream,
    mut commands: mpsc::UnboundedReceiver<SttCommand>,
    events: mpsc::Sender<SttEvent>,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(SttCommand::Audio(pcm)) => {
                        if let Err(e) = sink.send(Message::Binary(pcm.to_vec())).await {
                            let _ = events.send(SttEvent::Error(format!("send failed: {e}"))).await;
                            break;
                        }
                    }
                    Some(SttCommand::Flush) => {
                        let msg = Message::Text(r#"{"type":"Finalize"}"#.to_owned());
                        if let Err(e) = sink.send(msg).await {
                            let _ = events.send(SttEvent::Error(format!("flush failed: {e}"))).await;
                            break;
                        }
                    }
                    Some(SttCommand::Close) | None => {
                        let msg = Message::Text(r#"{"type":"CloseStream"}"#.to_owned());
                        let _ = sink.send(msg).await;
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(raw))) => {
                        if let Some(event) = parse_result(&raw)
                            && events.send(event).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = events.send(SttEvent::Closed).await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Deepgram socket error: {e}");
                        let _ = events.send(SttEvent::Error(e.to_string())).await;
                        break;
                    }
                }
            }
        }
    }
}

/// Map one provider frame to an event. Non-result frames (`Metadata`,
/// `SpeechStarted`, `UtteranceEnd`) and empty transcripts are dropped.
fn parse_result(raw: &str) -> Option<SttEvent> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    if value["type"].as_str() != Some("Results") {
        return None;
    }

    let transcript = value["channel"]["alternatives"][0]["transcript"]
        .as_str()?
        .trim()
        .to_owned();
    let is_final = value["is_final"].as_bool().unwrap_or(false);
    let from_flush = value["from_finalize"].as_bool().unwrap_or(false);

    if transcript.is_empty() {
        // An empty flush-final still matters: it tells the session loop
        // the flush round-trip completed.
        if is_final && from_flush {
            return Some(SttEvent::Final {
                text: transcript,
                from_flush,
            });
        }
        return None;
    }

    if is_final {
        Some(SttEvent::Final {
            text: transcript,
            from_flush,
        })
    } else {
        Some(SttEvent::Interim(transcript))
    }
}
