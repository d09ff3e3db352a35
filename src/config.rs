use serde::Deserialize;
use std::path::{Path, PathBuf};
use teloxide::types::ChatId;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config file '{}': {source}", .path.display())]
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    #[error("failed to parse config file '{}': {source}", .path.display())]
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    #[error("config validation error: {0}")]
    Validation(String),
}

/// Chat-completion backends, in the order the reply chain may try them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    ZenMux,
    OpenRouter,
    OpenAi,
    Groq,
}

/// Speech-to-text backends, in the order the transcription chain may try them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SttProvider {
    OpenAi,
    AssemblyAi,
    Deepgram,
    Lemonfox,
    Groq,
    HuggingFace,
    /// Local whisper.cpp model (needs the `local-whisper` feature).
    Local,
}

/// `chat_id` is written as a string by most templates, but numbers are fine too.
#[derive(Deserialize)]
#[serde(untagged)]
enum ChatIdValue {
    Int(i64),
    Text(String),
}

#[derive(Deserialize, Default)]
struct ConfigFile {
    bot_token: Option<String>,
    chat_id: Option<ChatIdValue>,
    personality: Option<String>,
    /// Free text describing who is in the chat; goes into every prompt.
    group_context: Option<String>,
    zenmux_api_key: Option<String>,
    zenmux_model: Option<String>,
    zenmux_base_url: Option<String>,
    #[serde(default)]
    fallback_models: Vec<String>,
    openrouter_api_key: Option<String>,
    openrouter_model: Option<String>,
    openai_api_key: Option<String>,
    openai_model: Option<String>,
    groq_api_key: Option<String>,
    groq_model: Option<String>,
    assemblyai_api_key: Option<String>,
    deepgram_api_key: Option<String>,
    lemonfox_api_key: Option<String>,
    huggingface_api_key: Option<String>,
    minimax_api_key: Option<String>,
    whisper_model_path: Option<String>,
    language: Option<String>,
    trigger_keywords: Option<Vec<String>>,
    llm_order: Option<Vec<LlmProvider>>,
    transcription_order: Option<Vec<SttProvider>>,
    audio_max_files: Option<usize>,
}

pub const DEFAULT_ZENMUX_MODEL: &str = "google/gemini-3-pro-preview-free";
pub const DEFAULT_ZENMUX_BASE_URL: &str = "https://zenmux.ai/api/v1";
pub const DEFAULT_OPENROUTER_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_GROQ_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_AUDIO_MAX_FILES: usize = 50;

pub struct Config {
    /// Path the config was loaded from (may not exist when built from env).
    pub config_path: PathBuf,
    pub bot_token: String,
    /// Chat the bot listens to and speaks into.
    pub chat_id: Option<ChatId>,
    pub personality: String,
    pub group_context: Option<String>,
    pub zenmux_api_key: Option<String>,
    pub zenmux_model: String,
    pub zenmux_base_url: String,
    pub fallback_models: Vec<String>,
    pub openrouter_api_key: Option<String>,
    pub openrouter_model: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub groq_api_key: Option<String>,
    pub groq_model: String,
    pub assemblyai_api_key: Option<String>,
    pub deepgram_api_key: Option<String>,
    pub lemonfox_api_key: Option<String>,
    pub huggingface_api_key: Option<String>,
    pub minimax_api_key: Option<String>,
    pub whisper_model_path: Option<PathBuf>,
    /// Language hint for transcription (ISO 639-1).
    pub language: String,
    /// Lower-case words that make the bot answer a plain text message.
    pub trigger_keywords: Vec<String>,
    pub llm_order: Vec<LlmProvider>,
    pub transcription_order: Vec<SttProvider>,
    /// How many generated audio files to keep on disk.
    pub audio_max_files: usize,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Load with an explicit environment lookup. Environment values only fill
    /// keys the file leaves empty.
    pub fn load_with_env<P, F>(path: P, env: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let config_path = path.as_ref().to_path_buf();
        let file = match std::fs::read_to_string(&config_path) {
            Ok(content) => serde_json::from_str::<ConfigFile>(&content)
                .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && present(env("TELEGRAM_BOT_TOKEN")).is_some() => {
                ConfigFile::default()
            }
            Err(e) => return Err(ConfigError::ReadFile { path: config_path, source: e }),
        };

        Self::from_file(config_path, file, &env)
    }

    fn from_file<F>(config_path: PathBuf, file: ConfigFile, env: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = |value: Option<String>, var: &str| present(value).or_else(|| present(env(var)));

        let bot_token = secret(file.bot_token, "TELEGRAM_BOT_TOKEN")
            .ok_or_else(|| ConfigError::Validation("bot_token is required".into()))?;
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }

        let chat_id = file
            .chat_id
            .map(|v| match v {
                ChatIdValue::Int(id) => id.to_string(),
                ChatIdValue::Text(s) => s,
            })
            .and_then(|s| present(Some(s)))
            .or_else(|| present(env("TELEGRAM_CHAT_ID")))
            .map(|s| {
                s.parse::<i64>()
                    .map(ChatId)
                    .map_err(|_| ConfigError::Validation(format!("chat_id must be a numeric id, got '{s}'")))
            })
            .transpose()?;

        let mut fallback_models: Vec<String> = Vec::new();
        for model in file.fallback_models {
            if !fallback_models.contains(&model) {
                fallback_models.push(model);
            }
        }

        Ok(Self {
            config_path,
            bot_token,
            chat_id,
            personality: file.personality.unwrap_or_else(|| "default".to_string()),
            group_context: file.group_context.filter(|c| !c.trim().is_empty()),
            zenmux_api_key: secret(file.zenmux_api_key, "ZENMUX_API_KEY"),
            zenmux_model: file.zenmux_model.unwrap_or_else(|| DEFAULT_ZENMUX_MODEL.to_string()),
            zenmux_base_url: file
                .zenmux_base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_ZENMUX_BASE_URL.to_string()),
            fallback_models,
            openrouter_api_key: secret(file.openrouter_api_key, "OPENROUTER_API_KEY"),
            openrouter_model: file.openrouter_model.unwrap_or_else(|| DEFAULT_OPENROUTER_MODEL.to_string()),
            openai_api_key: secret(file.openai_api_key, "OPENAI_API_KEY"),
            openai_model: file.openai_model.unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            groq_api_key: secret(file.groq_api_key, "GROQ_API_KEY"),
            groq_model: file.groq_model.unwrap_or_else(|| DEFAULT_GROQ_MODEL.to_string()),
            assemblyai_api_key: secret(file.assemblyai_api_key, "ASSEMBLYAI_API_KEY"),
            deepgram_api_key: secret(file.deepgram_api_key, "DEEPGRAM_API_KEY"),
            lemonfox_api_key: secret(file.lemonfox_api_key, "LEMONFOX_API_KEY"),
            huggingface_api_key: secret(file.huggingface_api_key, "HF_API_KEY"),
            minimax_api_key: secret(file.minimax_api_key, "MINIMAX_API_KEY"),
            whisper_model_path: file.whisper_model_path.map(PathBuf::from),
            language: file.language.unwrap_or_else(|| "ru".to_string()),
            trigger_keywords: file
                .trigger_keywords
                .map(|words| words.into_iter().map(|w| w.to_lowercase()).collect())
                .unwrap_or_else(default_trigger_keywords),
            llm_order: file.llm_order.unwrap_or_else(default_llm_order),
            transcription_order: file.transcription_order.unwrap_or_else(default_transcription_order),
            audio_max_files: file.audio_max_files.unwrap_or(DEFAULT_AUDIO_MAX_FILES),
        })
    }

    /// The chat id, or a validation error naming the missing key.
    pub fn require_chat_id(&self) -> Result<ChatId, ConfigError> {
        self.chat_id
            .ok_or_else(|| ConfigError::Validation("chat_id is not configured".into()))
    }

    pub fn api_key(&self, provider: LlmProvider) -> Option<&str> {
        match provider {
            LlmProvider::ZenMux => self.zenmux_api_key.as_deref(),
            LlmProvider::OpenRouter => self.openrouter_api_key.as_deref(),
            LlmProvider::OpenAi => self.openai_api_key.as_deref(),
            LlmProvider::Groq => self.groq_api_key.as_deref(),
        }
    }

    pub fn has_any_llm(&self) -> bool {
        self.llm_order.iter().any(|p| self.api_key(*p).is_some())
    }
}

/// A key that is empty or still carries a `YOUR_..._HERE` template value is absent.
pub fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.starts_with("YOUR_"))
}

fn default_trigger_keywords() -> Vec<String> {
    ["бот", "помоги", "расскажи", "объясни", "скажи"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_llm_order() -> Vec<LlmProvider> {
    vec![LlmProvider::ZenMux, LlmProvider::OpenRouter, LlmProvider::OpenAi, LlmProvider::Groq]
}

fn default_transcription_order() -> Vec<SttProvider> {
    vec![
        SttProvider::OpenAi,
        SttProvider::AssemblyAi,
        SttProvider::Deepgram,
        SttProvider::Lemonfox,
        SttProvider::HuggingFace,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn load(file: &NamedTempFile) -> Result<Config, ConfigError> {
        Config::load_with_env(file.path(), no_env)
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_config() {
        let file = write_config(r#"{
            "bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz",
            "chat_id": "-1001234567890"
        }"#);
        let config = load(&file).expect("should load valid config");
        assert_eq!(config.chat_id, Some(ChatId(-1001234567890)));
        assert_eq!(config.personality, "default");
        assert_eq!(config.zenmux_model, DEFAULT_ZENMUX_MODEL);
        assert_eq!(config.language, "ru");
        assert_eq!(config.audio_max_files, 50);
        assert_eq!(config.llm_order.len(), 4);
        assert_eq!(config.transcription_order[0], SttProvider::OpenAi);
        assert!(!config.has_any_llm());
    }

    #[test]
    fn test_numeric_chat_id() {
        let file = write_config(r#"{
            "bot_token": "123456789:ABCdef",
            "chat_id": -42
        }"#);
        let config = load(&file).unwrap();
        assert_eq!(config.require_chat_id().unwrap(), ChatId(-42));
    }

    #[test]
    fn test_placeholder_values_are_absent() {
        let file = write_config(r#"{
            "bot_token": "123456789:ABCdef",
            "chat_id": "YOUR_CHAT_ID_HERE",
            "openai_api_key": "YOUR_OPENAI_API_KEY_HERE",
            "groq_api_key": "  ",
            "openrouter_api_key": "sk-or-real"
        }"#);
        let config = load(&file).unwrap();
        assert!(config.chat_id.is_none());
        assert!(config.openai_api_key.is_none());
        assert!(config.groq_api_key.is_none());
        assert_eq!(config.openrouter_api_key.as_deref(), Some("sk-or-real"));
        assert!(config.has_any_llm());
        assert!(matches!(config.require_chat_id(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_non_numeric_chat_id() {
        let file = write_config(r#"{
            "bot_token": "123456789:ABCdef",
            "chat_id": "@mychannel"
        }"#);
        let err = assert_err(load(&file));
        assert!(err.to_string().contains("chat_id"));
    }

    #[test]
    fn test_empty_token() {
        let file = write_config(r#"{ "bot_token": "" }"#);
        let err = assert_err(load(&file));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("bot_token"));
    }

    #[test]
    fn test_placeholder_token() {
        let file = write_config(r#"{ "bot_token": "YOUR_BOT_TOKEN_HERE" }"#);
        let err = assert_err(load(&file));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_invalid_token_format_no_colon() {
        let file = write_config(r#"{ "bot_token": "invalid_token_no_colon" }"#);
        let err = assert_err(load(&file));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn test_invalid_token_format_non_numeric_id() {
        let file = write_config(r#"{ "bot_token": "notanumber:ABCdef" }"#);
        let err = assert_err(load(&file));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_invalid_token_format_empty_secret() {
        let file = write_config(r#"{ "bot_token": "123456789:" }"#);
        let err = assert_err(load(&file));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_fallback_models_deduplicated() {
        let file = write_config(r#"{
            "bot_token": "123456789:ABCdef",
            "fallback_models": ["a/one", "b/two", "a/one"]
        }"#);
        let config = load(&file).unwrap();
        assert_eq!(config.fallback_models, vec!["a/one", "b/two"]);
    }

    #[test]
    fn test_custom_orders() {
        let file = write_config(r#"{
            "bot_token": "123456789:ABCdef",
            "llm_order": ["groq", "openai"],
            "transcription_order": ["huggingface", "deepgram"]
        }"#);
        let config = load(&file).unwrap();
        assert_eq!(config.llm_order, vec![LlmProvider::Groq, LlmProvider::OpenAi]);
        assert_eq!(config.transcription_order, vec![SttProvider::HuggingFace, SttProvider::Deepgram]);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let file = write_config(r#"{
            "bot_token": "123456789:ABCdef",
            "llm_order": ["skynet"]
        }"#);
        let err = assert_err(load(&file));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }

    #[test]
    fn test_trigger_keywords_lowercased() {
        let file = write_config(r#"{
            "bot_token": "123456789:ABCdef",
            "trigger_keywords": ["Hey", "BOT"]
        }"#);
        let config = load(&file).unwrap();
        assert_eq!(config.trigger_keywords, vec!["hey", "bot"]);
    }

    #[test]
    fn test_env_fills_missing_keys_only() {
        let file = write_config(r#"{
            "bot_token": "123456789:ABCdef",
            "openai_api_key": "from-file"
        }"#);
        let env = |key: &str| match key {
            "OPENAI_API_KEY" => Some("from-env".to_string()),
            "GROQ_API_KEY" => Some("groq-env".to_string()),
            _ => None,
        };
        let config = Config::load_with_env(file.path(), env).unwrap();
        assert_eq!(config.openai_api_key.as_deref(), Some("from-file"));
        assert_eq!(config.groq_api_key.as_deref(), Some("groq-env"));
    }

    #[test]
    fn test_env_only_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telegram_config.json");
        let env = |key: &str| match key {
            "TELEGRAM_BOT_TOKEN" => Some("42:secret".to_string()),
            "TELEGRAM_CHAT_ID" => Some("-100".to_string()),
            _ => None,
        };
        let config = Config::load_with_env(&path, env).unwrap();
        assert_eq!(config.bot_token, "42:secret");
        assert_eq!(config.chat_id, Some(ChatId(-100)));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load_with_env("/nonexistent/path/config.json", no_env));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(load(&file));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }

    #[test]
    fn test_present() {
        assert_eq!(present(Some(" key ".into())), Some("key".to_string()));
        assert_eq!(present(Some("YOUR_API_KEY_HERE".into())), None);
        assert_eq!(present(Some(String::new())), None);
        assert_eq!(present(None), None);
    }
}
