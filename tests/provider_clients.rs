//! HTTP provider clients against a mock server.

use futures_util::StreamExt;
use parley::audio::store::{AudioStore, DiskAudioStore};
use parley::config::{AudioStoreConfig, LlmConfig, TtsConfig};
use parley::llm::gemini::GeminiLlm;
use parley::llm::LanguageModel;
use parley::tts::elevenlabs::ElevenLabsTts;
use parley::tts::SpeechSynthesizer;
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn llm_config(endpoint: String) -> LlmConfig {
    LlmConfig {
        endpoint,
        model: "test-model".to_owned(),
        ..LlmConfig::default()
    }
}

#[tokio::test]
async fn gemini_client_streams_sse_deltas() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hi \"}]}}]}\n\n",
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"there.\"}]}}]}\n\n",
        "data: {\"candidates\":[{\"finishReason\":\"STOP\"}]}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1beta/models/test-model:streamGenerateContent"))
        .and(query_param("alt", "sse"))
        .and(query_param("key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let llm = GeminiLlm::new(&llm_config(server.uri()), "test-key");
    let mut stream = llm.stream("say hi").await.expect("stream opens");

    let mut tokens = Vec::new();
    while let Some(item) = stream.next().await {
        tokens.push(item.expect("token"));
    }
    assert_eq!(tokens, vec!["Hi ", "there."]);
}

#[tokio::test]
async fn gemini_client_surfaces_http_errors_at_open() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let llm = GeminiLlm::new(&llm_config(server.uri()), "test-key");
    let err = llm.stream("say hi").await.err().expect("open should fail");
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn elevenlabs_client_stores_the_synthesized_audio() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/text-to-speech/voice-1"))
        .and(header("xi-api-key", "test-key"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(b"mp3-bytes".to_vec(), "audio/mpeg"),
        )
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(
        DiskAudioStore::new(&AudioStoreConfig {
            dir: tmp.path().to_path_buf(),
            ..AudioStoreConfig::default()
        })
        .expect("store"),
    );
    let config = TtsConfig {
        endpoint: server.uri(),
        voice_id: "voice-1".to_owned(),
        ..TtsConfig::default()
    };
    let tts = ElevenLabsTts::new(&config, "test-key", Arc::clone(&store) as Arc<dyn AudioStore>);

    let reference = tts.synthesize("Hi there.").await.expect("synthesize");
    let filename = reference
        .strip_prefix("/audio/")
        .expect("reference prefixed with /audio/");
    let on_disk = std::fs::read(tmp.path().join(filename)).expect("artifact written");
    assert_eq!(on_disk, b"mp3-bytes");
}

#[tokio::test]
async fn elevenlabs_client_surfaces_provider_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(
        DiskAudioStore::new(&AudioStoreConfig {
            dir: tmp.path().to_path_buf(),
            ..AudioStoreConfig::default()
        })
        .expect("store"),
    );
    let config = TtsConfig {
        endpoint: server.uri(),
        ..TtsConfig::default()
    };
    let tts = ElevenLabsTts::new(&config, "test-key", store as Arc<dyn AudioStore>);

    let err = tts.synthesize("Hi.").await.err().expect("should fail");
    assert!(err.to_string().contains("429"));
}
