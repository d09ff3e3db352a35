//! Speech-to-text through hosted transcription services.
//!
//! Each provider returns a transcript, nothing, or an error. The
//! [`TranscriptionChain`] tries them in the configured order and keeps going
//! past failures until one produces text.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::error::ServiceError;
use crate::config::{Config, SttProvider};

pub const OPENAI_TRANSCRIPTION_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
pub const LEMONFOX_TRANSCRIPTION_URL: &str = "https://api.lemonfox.ai/v1/audio/transcriptions";
pub const GROQ_TRANSCRIPTION_URL: &str = "https://api.groq.com/openai/v1/audio/transcriptions";
pub const ASSEMBLYAI_BASE_URL: &str = "https://api.assemblyai.com";
pub const DEEPGRAM_BASE_URL: &str = "https://api.deepgram.com";
pub const HUGGINGFACE_BASE_URL: &str = "https://api-inference.huggingface.co";

pub const HUGGINGFACE_MODELS: &[&str] = &[
    "openai/whisper-medium",
    "openai/whisper-base",
    "openai/whisper-small",
    "openai/whisper-tiny",
    "jonatasgrosman/whisper-large-v2-russian",
];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Downloaded voice audio.
#[derive(Debug, Clone)]
pub struct VoiceClip {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

impl VoiceClip {
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>) -> Self {
        Self { bytes, file_name: file_name.into() }
    }

    /// MIME type guessed from the file extension.
    pub fn mime(&self) -> &'static str {
        let ext = self
            .file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "ogg" | "oga" | "opus" => "audio/ogg",
            "mp3" => "audio/mpeg",
            "m4a" => "audio/mp4",
            "wav" => "audio/wav",
            "flac" => "audio/flac",
            _ => "application/octet-stream",
        }
    }
}

/// A speech-to-text backend.
#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when the service answered but heard nothing.
    async fn transcribe(&self, clip: &VoiceClip) -> Result<Option<String>, ServiceError>;
}

#[derive(Deserialize)]
struct TextResponse {
    #[serde(default)]
    text: String,
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// OpenAI-style `/audio/transcriptions` endpoint (OpenAI, Lemonfox, Groq).
pub struct WhisperApi {
    name: String,
    url: String,
    api_key: String,
    model: String,
    language: String,
    client: reqwest::Client,
}

impl WhisperApi {
    pub fn new(name: &str, url: &str, api_key: &str, model: &str, language: &str, client: reqwest::Client) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            language: language.to_string(),
            client,
        }
    }

    pub fn openai(api_key: &str, language: &str, client: reqwest::Client) -> Self {
        Self::new("OpenAI Whisper", OPENAI_TRANSCRIPTION_URL, api_key, "whisper-1", language, client)
    }

    pub fn lemonfox(api_key: &str, language: &str, client: reqwest::Client) -> Self {
        Self::new("Lemonfox", LEMONFOX_TRANSCRIPTION_URL, api_key, "whisper-1", language, client)
    }

    pub fn groq(api_key: &str, language: &str, client: reqwest::Client) -> Self {
        Self::new("Groq Whisper", GROQ_TRANSCRIPTION_URL, api_key, "whisper-large-v3", language, client)
    }
}

#[async_trait]
impl Transcriber for WhisperApi {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transcribe(&self, clip: &VoiceClip) -> Result<Option<String>, ServiceError> {
        let file_part = Part::bytes(clip.bytes.clone())
            .file_name(clip.file_name.clone())
            .mime_str(clip.mime())?;
        let form = Form::new()
            .part("file", file_part)
            .text("model", self.model.clone())
            .text("language", self.language.clone());

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::FORBIDDEN && body.to_lowercase().contains("country") {
                return Err(ServiceError::RegionBlocked { service: self.name.clone() });
            }
            return Err(ServiceError::status(&self.name, status, &body));
        }

        let result: TextResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;
        Ok(non_empty(&result.text))
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    upload_url: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptResponse {
    id: Option<String>,
    #[serde(default)]
    status: String,
    text: Option<String>,
    error: Option<String>,
}

/// AssemblyAI: upload, create a transcript job, then poll until it finishes.
pub struct AssemblyAi {
    api_key: String,
    language: String,
    base_url: String,
    poll_interval: Duration,
    max_polls: u32,
    client: reqwest::Client,
}

impl AssemblyAi {
    pub fn new(api_key: &str, language: &str, client: reqwest::Client) -> Self {
        Self::with_base_url(api_key, language, ASSEMBLYAI_BASE_URL, client)
    }

    pub fn with_base_url(api_key: &str, language: &str, base_url: &str, client: reqwest::Client) -> Self {
        Self {
            api_key: api_key.to_string(),
            language: language.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(1),
            max_polls: 30,
            client,
        }
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ServiceError::status("AssemblyAI", status, &body))
        }
    }
}

#[async_trait]
impl Transcriber for AssemblyAi {
    fn name(&self) -> &str {
        "AssemblyAI"
    }

    async fn transcribe(&self, clip: &VoiceClip) -> Result<Option<String>, ServiceError> {
        let upload = self
            .client
            .post(format!("{}/v2/upload", self.base_url))
            .header("authorization", &self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .body(clip.bytes.clone())
            .send()
            .await?;
        let upload: UploadResponse = Self::check(upload)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;
        let Some(audio_url) = upload.upload_url else {
            return Ok(None);
        };

        let created = self
            .client
            .post(format!("{}/v2/transcript", self.base_url))
            .header("authorization", &self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&serde_json::json!({ "audio_url": audio_url, "language_code": self.language }))
            .send()
            .await?;
        let created: TranscriptResponse = Self::check(created)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;
        let Some(id) = created.id else {
            return Ok(None);
        };

        let poll_url = format!("{}/v2/transcript/{}", self.base_url, id);
        for attempt in 0..self.max_polls {
            if attempt > 0 {
                tokio::time::sleep(self.poll_interval).await;
            }
            let polled = self
                .client
                .get(&poll_url)
                .header("authorization", &self.api_key)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await?;
            let polled: TranscriptResponse = Self::check(polled)
                .await?
                .json()
                .await
                .map_err(|e| ServiceError::Parse(e.to_string()))?;

            match polled.status.as_str() {
                "completed" => return Ok(polled.text.as_deref().and_then(non_empty)),
                "error" => {
                    return Err(ServiceError::Api(
                        polled.error.unwrap_or_else(|| "unknown error".to_string()),
                    ));
                }
                other => debug!("AssemblyAI transcript {} is {}", id, other),
            }
        }

        Err(ServiceError::Timeout("AssemblyAI transcription".into()))
    }
}

/// Deepgram pre-recorded audio endpoint.
pub struct Deepgram {
    api_key: String,
    language: String,
    base_url: String,
    client: reqwest::Client,
}

impl Deepgram {
    pub fn new(api_key: &str, language: &str, client: reqwest::Client) -> Self {
        Self::with_base_url(api_key, language, DEEPGRAM_BASE_URL, client)
    }

    pub fn with_base_url(api_key: &str, language: &str, base_url: &str, client: reqwest::Client) -> Self {
        Self {
            api_key: api_key.to_string(),
            language: language.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl Transcriber for Deepgram {
    fn name(&self) -> &str {
        "Deepgram"
    }

    async fn transcribe(&self, clip: &VoiceClip) -> Result<Option<String>, ServiceError> {
        let response = self
            .client
            .post(format!("{}/v1/listen", self.base_url))
            .query(&[("language", self.language.as_str()), ("model", "nova-2"), ("punctuate", "true")])
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", clip.mime())
            .timeout(REQUEST_TIMEOUT)
            .body(clip.bytes.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::status("Deepgram", status, &body));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;
        Ok(result
            .pointer("/results/channels/0/alternatives/0/transcript")
            .and_then(|t| t.as_str())
            .and_then(non_empty))
    }
}

/// Hugging Face Inference API. Works without a key, with tight limits.
pub struct HuggingFace {
    api_key: Option<String>,
    base_url: String,
    models: Vec<String>,
    loading_wait: Duration,
    client: reqwest::Client,
}

impl HuggingFace {
    pub fn new(api_key: Option<&str>, client: reqwest::Client) -> Self {
        Self::with_base_url(api_key, HUGGINGFACE_BASE_URL, client)
    }

    pub fn with_base_url(api_key: Option<&str>, base_url: &str, client: reqwest::Client) -> Self {
        Self {
            api_key: api_key.map(str::to_string),
            base_url: base_url.trim_end_matches('/').to_string(),
            models: HUGGINGFACE_MODELS.iter().map(|m| m.to_string()).collect(),
            loading_wait: Duration::from_secs(10),
            client,
        }
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    /// How long to wait before retrying a model that is still loading.
    pub fn with_loading_wait(mut self, wait: Duration) -> Self {
        self.loading_wait = wait;
        self
    }

    async fn post(&self, model: &str, clip: &VoiceClip) -> Result<reqwest::Response, ServiceError> {
        let mut request = self
            .client
            .post(format!("{}/models/{}", self.base_url, model))
            .header("Content-Type", clip.mime())
            .timeout(REQUEST_TIMEOUT)
            .body(clip.bytes.clone());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        Ok(request.send().await?)
    }
}

#[async_trait]
impl Transcriber for HuggingFace {
    fn name(&self) -> &str {
        "Hugging Face"
    }

    async fn transcribe(&self, clip: &VoiceClip) -> Result<Option<String>, ServiceError> {
        for model in &self.models {
            info!("🎙️ Hugging Face model {}", model);

            let mut response = match self.post(model, clip).await {
                Ok(r) => r,
                Err(e) => {
                    warn!("⚠️ {}: {}, trying next model", model, e);
                    continue;
                }
            };

            if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
                info!("⏳ Model {} is loading, waiting {:?}", model, self.loading_wait);
                tokio::time::sleep(self.loading_wait).await;
                response = match self.post(model, clip).await {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("⚠️ {}: {}, trying next model", model, e);
                        continue;
                    }
                };
            }

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let preview: String = body.chars().take(200).collect();
                warn!("⚠️ {} returned {}: {}, trying next model", model, status, preview);
                continue;
            }

            match response.json::<serde_json::Value>().await {
                Ok(value) => {
                    if let Some(text) = extract_hf_text(&value) {
                        info!("✅ Transcribed with {}", model);
                        return Ok(Some(text));
                    }
                }
                Err(e) => warn!("⚠️ {}: unreadable response: {}", model, e),
            }
        }

        warn!("❌ No Hugging Face model could transcribe");
        Ok(None)
    }
}

/// Pull text out of the shapes Hugging Face ASR models answer with:
/// `{"text"}`, `{"chunks": [{"text"}]}`, a bare string, or a list of either.
pub fn extract_hf_text(value: &serde_json::Value) -> Option<String> {
    use serde_json::Value;

    let text = match value {
        Value::Object(map) => {
            let text = map.get("text").and_then(Value::as_str).unwrap_or_default();
            if text.trim().is_empty() {
                map.get("chunks")
                    .and_then(Value::as_array)
                    .map(|chunks| {
                        chunks
                            .iter()
                            .filter_map(|c| c.get("text").and_then(Value::as_str))
                            .map(str::trim)
                            .collect::<Vec<_>>()
                            .join(" ")
                    })
                    .unwrap_or_default()
            } else {
                text.to_string()
            }
        }
        Value::String(s) => s.clone(),
        Value::Array(items) => match items.first() {
            Some(Value::Object(map)) => map.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        },
        _ => String::new(),
    };
    non_empty(&text)
}

/// Ordered fallback chain of transcription providers.
pub struct TranscriptionChain {
    providers: Vec<Box<dyn Transcriber>>,
}

impl TranscriptionChain {
    pub fn new(providers: Vec<Box<dyn Transcriber>>) -> Self {
        Self { providers }
    }

    /// Providers from `transcription_order`. Keyed providers without a key are
    /// left out; Hugging Face needs none.
    pub fn from_config(config: &Config) -> Self {
        let client = reqwest::Client::new();
        let lang = config.language.as_str();
        let mut providers: Vec<Box<dyn Transcriber>> = Vec::new();

        for provider in &config.transcription_order {
            match provider {
                SttProvider::OpenAi => {
                    if let Some(key) = &config.openai_api_key {
                        providers.push(Box::new(WhisperApi::openai(key, lang, client.clone())));
                    }
                }
                SttProvider::AssemblyAi => {
                    if let Some(key) = &config.assemblyai_api_key {
                        providers.push(Box::new(AssemblyAi::new(key, lang, client.clone())));
                    }
                }
                SttProvider::Deepgram => {
                    if let Some(key) = &config.deepgram_api_key {
                        providers.push(Box::new(Deepgram::new(key, lang, client.clone())));
                    }
                }
                SttProvider::Lemonfox => {
                    if let Some(key) = &config.lemonfox_api_key {
                        providers.push(Box::new(WhisperApi::lemonfox(key, lang, client.clone())));
                    }
                }
                SttProvider::Groq => {
                    if let Some(key) = &config.groq_api_key {
                        providers.push(Box::new(WhisperApi::groq(key, lang, client.clone())));
                    }
                }
                SttProvider::HuggingFace => providers.push(Box::new(HuggingFace::new(
                    config.huggingface_api_key.as_deref(),
                    client.clone(),
                ))),
                SttProvider::Local => push_local(&mut providers, config),
            }
        }

        Self::new(providers)
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// First non-empty transcript, or `None` when every provider failed.
    pub async fn transcribe(&self, clip: &VoiceClip) -> Option<String> {
        for provider in &self.providers {
            info!("🎙️ Transcribing with {}", provider.name());
            match provider.transcribe(clip).await {
                Ok(Some(text)) => {
                    let preview: String = text.chars().take(100).collect();
                    info!("📝 {}: \"{}\"", provider.name(), preview);
                    return Some(text);
                }
                Ok(None) => info!("{} returned no transcript", provider.name()),
                Err(e @ ServiceError::RegionBlocked { .. }) => warn!("❌ {}", e),
                Err(e) => warn!("⚠️ {} failed: {}", provider.name(), e),
            }
        }
        warn!("❌ No transcription provider succeeded");
        None
    }
}

#[cfg(feature = "local-whisper")]
fn push_local(providers: &mut Vec<Box<dyn Transcriber>>, config: &Config) {
    let Some(path) = &config.whisper_model_path else {
        warn!("Local transcription requested but whisper_model_path is not set");
        return;
    };
    match super::whisper::Whisper::new(path, &config.language) {
        Ok(whisper) => providers.push(Box::new(whisper)),
        Err(e) => warn!("Failed to load local Whisper model: {}", e),
    }
}

#[cfg(not(feature = "local-whisper"))]
fn push_local(_providers: &mut Vec<Box<dyn Transcriber>>, _config: &Config) {
    warn!("Local transcription requested but this build lacks the local-whisper feature");
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn clip() -> VoiceClip {
        VoiceClip::new(b"OggS fake voice".to_vec(), "voice.ogg")
    }

    #[test]
    fn test_clip_mime() {
        assert_eq!(clip().mime(), "audio/ogg");
        assert_eq!(VoiceClip::new(vec![], "a.MP3").mime(), "audio/mpeg");
        assert_eq!(VoiceClip::new(vec![], "noext").mime(), "application/octet-stream");
    }

    #[test]
    fn test_extract_hf_text() {
        use serde_json::json;
        assert_eq!(extract_hf_text(&json!({"text": " привет "})).as_deref(), Some("привет"));
        assert_eq!(
            extract_hf_text(&json!({"text": "", "chunks": [{"text": "one"}, {"text": "two"}]})).as_deref(),
            Some("one two")
        );
        assert_eq!(extract_hf_text(&json!("bare")).as_deref(), Some("bare"));
        assert_eq!(extract_hf_text(&json!([{"text": "first"}, {"text": "second"}])).as_deref(), Some("first"));
        assert_eq!(extract_hf_text(&json!(["listed"])).as_deref(), Some("listed"));
        assert_eq!(extract_hf_text(&json!([])), None);
        assert_eq!(extract_hf_text(&json!({"error": "x"})), None);
    }

    #[tokio::test]
    async fn test_whisper_api_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/audio/transcriptions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::Regex("whisper-1".into()))
            .with_status(200)
            .with_body(r#"{"text": "  Привет, бот  "}"#)
            .create_async()
            .await;

        let url = format!("{}/v1/audio/transcriptions", server.url());
        let api = WhisperApi::new("OpenAI Whisper", &url, "sk-test", "whisper-1", "ru", reqwest::Client::new());
        assert_eq!(api.transcribe(&clip()).await.unwrap().as_deref(), Some("Привет, бот"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_whisper_api_region_blocked() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/audio/transcriptions")
            .with_status(403)
            .with_body(r#"{"error": {"code": "unsupported_country_region_territory", "message": "Country, region, or territory not supported"}}"#)
            .create_async()
            .await;

        let url = format!("{}/v1/audio/transcriptions", server.url());
        let api = WhisperApi::new("OpenAI Whisper", &url, "k", "whisper-1", "ru", reqwest::Client::new());
        assert!(matches!(api.transcribe(&clip()).await, Err(ServiceError::RegionBlocked { .. })));
    }

    #[tokio::test]
    async fn test_whisper_api_empty_text() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/audio/transcriptions")
            .with_status(200)
            .with_body(r#"{"text": ""}"#)
            .create_async()
            .await;

        let url = format!("{}/v1/audio/transcriptions", server.url());
        let api = WhisperApi::new("Lemonfox", &url, "k", "whisper-1", "ru", reqwest::Client::new());
        assert_eq!(api.transcribe(&clip()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_assemblyai_flow() {
        let mut server = mockito::Server::new_async().await;
        let upload = server
            .mock("POST", "/v2/upload")
            .match_header("authorization", "aai-key")
            .with_status(200)
            .with_body(r#"{"upload_url": "https://cdn.example/abc"}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/v2/transcript")
            .match_body(Matcher::PartialJsonString(
                r#"{"audio_url": "https://cdn.example/abc", "language_code": "ru"}"#.into(),
            ))
            .with_status(200)
            .with_body(r#"{"id": "t1", "status": "queued"}"#)
            .create_async()
            .await;
        let poll = server
            .mock("GET", "/v2/transcript/t1")
            .with_status(200)
            .with_body(r#"{"id": "t1", "status": "completed", "text": "готово"}"#)
            .create_async()
            .await;

        let api = AssemblyAi::with_base_url("aai-key", "ru", &server.url(), reqwest::Client::new());
        assert_eq!(api.transcribe(&clip()).await.unwrap().as_deref(), Some("готово"));
        upload.assert_async().await;
        create.assert_async().await;
        poll.assert_async().await;
    }

    #[tokio::test]
    async fn test_assemblyai_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _upload = server
            .mock("POST", "/v2/upload")
            .with_body(r#"{"upload_url": "u"}"#)
            .create_async()
            .await;
        let _create = server
            .mock("POST", "/v2/transcript")
            .with_body(r#"{"id": "t2"}"#)
            .create_async()
            .await;
        let _poll = server
            .mock("GET", "/v2/transcript/t2")
            .with_body(r#"{"status": "error", "error": "bad audio"}"#)
            .create_async()
            .await;

        let api = AssemblyAi::with_base_url("k", "ru", &server.url(), reqwest::Client::new());
        match api.transcribe(&clip()).await {
            Err(ServiceError::Api(msg)) => assert_eq!(msg, "bad audio"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_assemblyai_poll_timeout() {
        let mut server = mockito::Server::new_async().await;
        let _upload = server
            .mock("POST", "/v2/upload")
            .with_body(r#"{"upload_url": "u"}"#)
            .create_async()
            .await;
        let _create = server
            .mock("POST", "/v2/transcript")
            .with_body(r#"{"id": "t3"}"#)
            .create_async()
            .await;
        let poll = server
            .mock("GET", "/v2/transcript/t3")
            .with_body(r#"{"status": "processing"}"#)
            .expect(3)
            .create_async()
            .await;

        let api = AssemblyAi::with_base_url("k", "ru", &server.url(), reqwest::Client::new())
            .with_polling(Duration::from_millis(1), 3);
        assert!(matches!(api.transcribe(&clip()).await, Err(ServiceError::Timeout(_))));
        poll.assert_async().await;
    }

    #[tokio::test]
    async fn test_deepgram() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/listen")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("language".into(), "ru".into()),
                Matcher::UrlEncoded("model".into(), "nova-2".into()),
                Matcher::UrlEncoded("punctuate".into(), "true".into()),
            ]))
            .match_header("authorization", "Token dg-key")
            .match_header("content-type", "audio/ogg")
            .with_status(200)
            .with_body(r#"{"results": {"channels": [{"alternatives": [{"transcript": "тест", "confidence": 0.9}]}]}}"#)
            .create_async()
            .await;

        let api = Deepgram::with_base_url("dg-key", "ru", &server.url(), reqwest::Client::new());
        assert_eq!(api.transcribe(&clip()).await.unwrap().as_deref(), Some("тест"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_deepgram_no_channels() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/listen")
            .match_query(Matcher::Any)
            .with_body(r#"{"results": {"channels": []}}"#)
            .create_async()
            .await;

        let api = Deepgram::with_base_url("k", "ru", &server.url(), reqwest::Client::new());
        assert_eq!(api.transcribe(&clip()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_huggingface_skips_gone_and_loading_models() {
        let mut server = mockito::Server::new_async().await;
        let gone = server
            .mock("POST", "/models/org/gone")
            .with_status(410)
            .create_async()
            .await;
        let loading = server
            .mock("POST", "/models/org/loading")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;
        let ok = server
            .mock("POST", "/models/org/ok")
            .with_status(200)
            .with_body(r#"{"text": "hello"}"#)
            .create_async()
            .await;

        let api = HuggingFace::with_base_url(None, &server.url(), reqwest::Client::new())
            .with_models(vec!["org/gone".into(), "org/loading".into(), "org/ok".into()])
            .with_loading_wait(Duration::ZERO);
        assert_eq!(api.transcribe(&clip()).await.unwrap().as_deref(), Some("hello"));
        gone.assert_async().await;
        loading.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn test_huggingface_all_fail() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/org/bad")
            .with_status(500)
            .create_async()
            .await;

        let api = HuggingFace::with_base_url(Some("hf"), &server.url(), reqwest::Client::new())
            .with_models(vec!["org/bad".into()]);
        assert_eq!(api.transcribe(&clip()).await.unwrap(), None);
    }

    struct Canned(&'static str, Result<Option<&'static str>, ()>);

    #[async_trait]
    impl Transcriber for Canned {
        fn name(&self) -> &str {
            self.0
        }

        async fn transcribe(&self, _clip: &VoiceClip) -> Result<Option<String>, ServiceError> {
            match self.1 {
                Ok(text) => Ok(text.map(String::from)),
                Err(()) => Err(ServiceError::RegionBlocked { service: self.0.into() }),
            }
        }
    }

    #[tokio::test]
    async fn test_chain_falls_through() {
        let chain = TranscriptionChain::new(vec![
            Box::new(Canned("blocked", Err(()))),
            Box::new(Canned("silent", Ok(None))),
            Box::new(Canned("works", Ok(Some("text")))),
        ]);
        assert_eq!(chain.names(), vec!["blocked", "silent", "works"]);
        assert_eq!(chain.transcribe(&clip()).await.as_deref(), Some("text"));

        let empty = TranscriptionChain::new(Vec::new());
        assert!(empty.transcribe(&clip()).await.is_none());
    }

    #[test]
    fn test_from_config_skips_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "bot_token": "1:abc",
                "deepgram_api_key": "dg",
                "transcription_order": ["openai", "deepgram", "groq", "huggingface"]
            }"#,
        )
        .unwrap();
        let config = Config::load_with_env(&path, |_| None).unwrap();
        let chain = TranscriptionChain::from_config(&config);
        assert_eq!(chain.names(), vec!["Deepgram", "Hugging Face"]);
    }
}
