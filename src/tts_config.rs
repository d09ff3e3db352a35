//! Speech synthesis settings (`tts_config.json`) and MiniMax key lookup.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::present;

pub const DEFAULT_VOICE_ID: &str = "moss_audio_3c5cbd6d-c6e0-11f0-a49b-b65555212881";

#[derive(Debug, Error)]
pub enum TtsConfigError {
    #[error("failed to access '{}': {source}", .path.display())]
    Io { path: PathBuf, source: std::io::Error },
    #[error("failed to parse '{}': {source}", .path.display())]
    Json { path: PathBuf, source: serde_json::Error },
    #[error("'{}' does not contain a JSON object", .0.display())]
    NotAnObject(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSetting {
    pub voice_id: String,
    pub speed: f64,
    pub vol: f64,
    pub pitch: i32,
    pub english_normalization: bool,
}

impl Default for VoiceSetting {
    fn default() -> Self {
        Self {
            voice_id: DEFAULT_VOICE_ID.to_string(),
            speed: 1.0,
            vol: 1.0,
            pitch: 0,
            english_normalization: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSetting {
    pub sample_rate: u32,
    pub bitrate: u32,
    pub format: String,
    pub channel: u8,
    pub force_cbr: bool,
}

impl Default for AudioSetting {
    fn default() -> Self {
        Self {
            sample_rate: 32000,
            bitrate: 128000,
            format: "mp3".to_string(),
            channel: 1,
            force_cbr: false,
        }
    }
}

/// Settings sent with every synthesis request. Missing keys fall back to
/// defaults one field at a time, nested objects included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub model: String,
    pub voice_setting: VoiceSetting,
    pub audio_setting: AudioSetting,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_boost: Option<String>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            model: "speech-2.6-hd".to_string(),
            voice_setting: VoiceSetting::default(),
            audio_setting: AudioSetting::default(),
            stream: false,
            language_boost: None,
        }
    }
}

impl TtsConfig {
    /// Load settings. A missing file gives defaults; an unreadable one logs a
    /// warning and gives defaults too.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No TTS config at {:?}, using defaults", path);
                return Self::default();
            }
            Err(e) => {
                warn!("Failed to read TTS config {:?}: {}. Using defaults.", path, e);
                return Self::default();
            }
        };

        match serde_json::from_str(content.trim_start_matches('\u{feff}')) {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to parse TTS config {:?}: {}. Using defaults.", path, e);
                Self::default()
            }
        }
    }

    /// Replace `voice_setting.voice_id` in the file, leaving every other key
    /// as written. Returns the previous voice id.
    pub fn set_voice_id<P: AsRef<Path>>(path: P, voice_id: &str) -> Result<String, TtsConfigError> {
        let path = path.as_ref();
        let mut root = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str::<serde_json::Value>(content.trim_start_matches('\u{feff}'))
                .map_err(|e| TtsConfigError::Json { path: path.to_path_buf(), source: e })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => serde_json::to_value(Self::default())
                .map_err(|e| TtsConfigError::Json { path: path.to_path_buf(), source: e })?,
            Err(e) => return Err(TtsConfigError::Io { path: path.to_path_buf(), source: e }),
        };

        let object = root
            .as_object_mut()
            .ok_or_else(|| TtsConfigError::NotAnObject(path.to_path_buf()))?;
        let voice_setting = object
            .entry("voice_setting")
            .or_insert_with(|| serde_json::json!({}));
        if !voice_setting.is_object() {
            *voice_setting = serde_json::json!({});
        }

        let old = voice_setting
            .get("voice_id")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_VOICE_ID)
            .to_string();
        voice_setting["voice_id"] = serde_json::Value::String(voice_id.to_string());

        let pretty = serde_json::to_string_pretty(&root)
            .map_err(|e| TtsConfigError::Json { path: path.to_path_buf(), source: e })?;
        std::fs::write(path, pretty).map_err(|e| TtsConfigError::Io { path: path.to_path_buf(), source: e })?;

        Ok(old)
    }
}

impl fmt::Display for TtsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = &self.voice_setting;
        let a = &self.audio_setting;
        writeln!(f, "Model:          {}", self.model)?;
        writeln!(f, "Voice id:       {}", v.voice_id)?;
        writeln!(f, "Speed:          {}", v.speed)?;
        writeln!(f, "Volume:         {}", v.vol)?;
        writeln!(f, "Pitch:          {}", v.pitch)?;
        writeln!(f, "English norm.:  {}", v.english_normalization)?;
        writeln!(f, "Sample rate:    {} Hz", a.sample_rate)?;
        writeln!(f, "Bitrate:        {} bps", a.bitrate)?;
        writeln!(f, "Format:         {}", a.format)?;
        writeln!(f, "Channels:       {}", a.channel)?;
        writeln!(f, "Force CBR:      {}", a.force_cbr)?;
        writeln!(f, "Stream:         {}", self.stream)?;
        write!(f, "Language boost: {}", self.language_boost.as_deref().unwrap_or("-"))
    }
}

/// Where the MiniMax API key came from.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    Config,
    Environment,
    McpFile(PathBuf),
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Config => write!(f, "bot configuration"),
            KeySource::Environment => write!(f, "environment variable MINIMAX_API_KEY"),
            KeySource::McpFile(path) => write!(f, "MCP config {}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub key: String,
    pub source: KeySource,
}

/// Cursor's global MCP config, which often already holds a MiniMax key.
pub fn cursor_mcp_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("Cursor").join("User").join("globalStorage").join("mcp.json"))
}

/// Look for the key in: the explicit value, the environment, then each MCP
/// file in `mcp_files` order.
pub fn resolve_minimax_key<F>(explicit: Option<&str>, env: F, mcp_files: &[PathBuf]) -> Option<ResolvedKey>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = present(explicit.map(str::to_string)) {
        return Some(ResolvedKey { key, source: KeySource::Config });
    }
    if let Some(key) = present(env("MINIMAX_API_KEY")) {
        return Some(ResolvedKey { key, source: KeySource::Environment });
    }
    mcp_files.iter().find_map(|path| {
        read_mcp_key(path).map(|key| ResolvedKey { key, source: KeySource::McpFile(path.clone()) })
    })
}

/// The default MCP search list: `./mcp.json`, then Cursor's global file.
pub fn default_mcp_files() -> Vec<PathBuf> {
    let mut files = vec![PathBuf::from("mcp.json")];
    files.extend(cursor_mcp_path());
    files
}

fn read_mcp_key(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let value: serde_json::Value = match serde_json::from_str(content.trim_start_matches('\u{feff}')) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to parse {:?}: {}", path, e);
            return None;
        }
    };
    let key = value
        .pointer("/mcpServers/minimax/env/MINIMAX_API_KEY")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    present(key)
}

/// Hide the middle of a key for display.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let (head, tail) = match chars.len() {
        n if n > 50 => (20, 20),
        n if n > 8 => (4, 4),
        _ => return "*".repeat(chars.len()),
    };
    let start: String = chars[..head].iter().collect();
    let end: String = chars[chars.len() - tail..].iter().collect();
    format!("{start}...{end}")
}
