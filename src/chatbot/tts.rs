//! Text-to-speech using the MiniMax T2A API.
//!
//! The API answers with JSON carrying the audio as a hex string. The raw
//! response is kept so it can be stored next to the audio file.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use super::error::ServiceError;
use crate::tts_config::{AudioSetting, TtsConfig, VoiceSetting};

pub const DEFAULT_BASE_URL: &str = "https://api.minimax.io";

static QUOTES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["“”„«»‘’‚]"#).expect("quote pattern is valid"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    text: &'a str,
    stream: bool,
    voice_setting: VoiceSetting,
    audio_setting: &'a AudioSetting,
    #[serde(skip_serializing_if = "Option::is_none")]
    language_boost: Option<&'a str>,
}

#[derive(Deserialize)]
struct SpeechResponse {
    data: Option<SpeechData>,
    extra_info: Option<ExtraInfo>,
    base_resp: Option<BaseResp>,
}

#[derive(Deserialize)]
struct SpeechData {
    #[serde(default)]
    audio: String,
}

#[derive(Deserialize)]
struct ExtraInfo {
    audio_length: Option<u64>,
}

#[derive(Deserialize)]
struct BaseResp {
    status_code: i64,
    #[serde(default)]
    status_msg: String,
}

/// Decoded speech plus the response it came from.
#[derive(Debug)]
pub struct Synthesis {
    pub audio: Vec<u8>,
    /// File extension matching the requested audio format.
    pub format: String,
    pub duration_ms: Option<u64>,
    pub raw: serde_json::Value,
}

/// Models tried, after the configured one, when activating a voice.
pub const ACTIVATION_MODELS: &[&str] = &["speech-2.6-hd", "speech-2.6-turbo", "speech-02-hd", "speech-02-turbo"];
pub const ACTIVATION_PHRASES: &[&str] = &["Тест", "Активация", "Hello", "Привет"];

/// The attempt that kept a voice alive.
#[derive(Debug)]
pub struct Activation {
    pub model: String,
    pub phrase: String,
    pub synthesis: Synthesis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceInfo {
    #[serde(default)]
    pub voice_id: String,
    pub voice_name: Option<String>,
    pub created_time: Option<String>,
}

/// Voices on the account, by category. `raw` is the full response.
#[derive(Debug, Deserialize)]
pub struct VoiceCatalog {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub system_voice: Vec<VoiceInfo>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub voice_cloning: Vec<VoiceInfo>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub voice_generation: Vec<VoiceInfo>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub music_generation: Vec<VoiceInfo>,
    #[serde(skip)]
    pub raw: serde_json::Value,
}

impl VoiceCatalog {
    pub fn total(&self) -> usize {
        self.system_voice.len() + self.voice_cloning.len() + self.voice_generation.len() + self.music_generation.len()
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<VoiceInfo>, D::Error> {
    Ok(Option::<Vec<VoiceInfo>>::deserialize(deserializer)?.unwrap_or_default())
}

/// TTS client for the MiniMax API.
pub struct TtsClient {
    api_key: String,
    base_url: String,
    settings: TtsConfig,
    client: reqwest::Client,
}

impl TtsClient {
    pub fn new(api_key: String, settings: TtsConfig) -> Self {
        Self::with_base_url(api_key, settings, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: String, settings: TtsConfig, base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            settings,
            client,
        }
    }

    pub fn settings(&self) -> &TtsConfig {
        &self.settings
    }

    pub async fn synthesize(&self, text: &str) -> Result<Synthesis, ServiceError> {
        self.synthesize_with_voice(text, None).await
    }

    /// Generate speech, optionally with a voice other than the configured one.
    pub async fn synthesize_with_voice(&self, text: &str, voice_id: Option<&str>) -> Result<Synthesis, ServiceError> {
        self.synthesize_as(text, voice_id, None).await
    }

    /// Use a voice once so MiniMax keeps it. Every model is tried with every
    /// phrase until one synthesis succeeds; the last error is returned when
    /// none does.
    pub async fn activate_voice(
        &self,
        voice_id: &str,
        models: &[String],
        phrases: &[&str],
    ) -> Result<Activation, ServiceError> {
        let mut last_error = ServiceError::Api("no model to try".into());
        for model in models {
            for phrase in phrases {
                match self.synthesize_as(phrase, Some(voice_id), Some(model)).await {
                    Ok(synthesis) => {
                        info!("Voice {} activated with {}", voice_id, model);
                        return Ok(Activation {
                            model: model.clone(),
                            phrase: phrase.to_string(),
                            synthesis,
                        });
                    }
                    Err(e) => {
                        warn!("{} with \"{}\": {}", model, phrase, e);
                        last_error = e;
                    }
                }
            }
        }
        Err(last_error)
    }

    async fn synthesize_as(
        &self,
        text: &str,
        voice_id: Option<&str>,
        model: Option<&str>,
    ) -> Result<Synthesis, ServiceError> {
        let text = normalize_text(text);
        if text.is_empty() {
            return Err(ServiceError::Api("nothing to synthesize".into()));
        }
        let preview: String = text.chars().take(50).collect();
        info!("TTS: \"{}\" ({} chars)", preview, text.chars().count());

        let mut voice_setting = self.settings.voice_setting.clone();
        if let Some(id) = voice_id {
            voice_setting.voice_id = id.to_string();
        }
        let request = SpeechRequest {
            model: model.unwrap_or(&self.settings.model),
            text: &text,
            stream: self.settings.stream,
            voice_setting,
            audio_setting: &self.settings.audio_setting,
            language_boost: self.settings.language_boost.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/v1/t2a_v2", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::status("MiniMax", status, &body));
        }

        let raw: serde_json::Value = response.json().await?;
        let parsed: SpeechResponse =
            serde_json::from_value(raw.clone()).map_err(|e| ServiceError::Parse(e.to_string()))?;

        if let Some(base) = parsed.base_resp.as_ref().filter(|b| b.status_code != 0) {
            return Err(ServiceError::Api(format!("{} (code {})", base.status_msg, base.status_code)));
        }

        let hex = parsed
            .data
            .map(|d| d.audio)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| ServiceError::Parse("response has no audio".into()))?;
        let audio = decode_hex(&hex)?;

        debug!("Got {} bytes of {} audio", audio.len(), self.settings.audio_setting.format);
        Ok(Synthesis {
            audio,
            format: self.settings.audio_setting.format.clone(),
            duration_ms: parsed.extra_info.and_then(|e| e.audio_length),
            raw,
        })
    }

    /// List voices available to the account. `voice_type` is one of
    /// `system`, `voice_cloning`, `voice_generation`, `music_generation`, `all`.
    pub async fn list_voices(&self, voice_type: &str) -> Result<VoiceCatalog, ServiceError> {
        let response = self
            .client
            .post(format!("{}/v1/get_voice", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "voice_type": voice_type }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::status("MiniMax", status, &body));
        }

        let raw: serde_json::Value = response.json().await?;
        let mut catalog: VoiceCatalog =
            serde_json::from_value(raw.clone()).map_err(|e| ServiceError::Parse(e.to_string()))?;
        catalog.raw = raw;
        Ok(catalog)
    }
}

/// Strip double and typographic quotes, collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    let without_quotes = QUOTES.replace_all(text, " ");
    WHITESPACE.replace_all(&without_quotes, " ").trim().to_string()
}

pub fn decode_hex(hex: &str) -> Result<Vec<u8>, ServiceError> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        return Err(ServiceError::Parse("hex audio has odd length".into()));
    }
    hex.as_bytes()
        .chunks_exact(2)
        .map(|pair| {
            let digits = std::str::from_utf8(pair).map_err(|e| ServiceError::Parse(e.to_string()))?;
            u8::from_str_radix(digits, 16).map_err(|_| ServiceError::Parse(format!("invalid hex digits '{digits}'")))
        })
        .collect()
}
