//! Local speech-to-text using whisper-rs.
//!
//! Runs a whisper.cpp model on the machine instead of calling a service.
//! Voice notes are decoded to 16 kHz mono PCM with ffmpeg first.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::error::ServiceError;
use super::stt::{Transcriber, VoiceClip};

/// Whisper transcription engine.
pub struct Whisper {
    ctx: Arc<WhisperContext>,
    language: String,
}

impl Whisper {
    /// Load a Whisper model from a .bin file.
    pub fn new(model_path: &Path, language: &str) -> Result<Self, String> {
        info!("Loading Whisper model from {:?}", model_path);

        if !model_path.exists() {
            return Err(format!("Model file not found: {:?}", model_path));
        }

        let ctx = WhisperContext::new_with_params(
            model_path.to_str().ok_or("Invalid model path")?,
            WhisperContextParameters::default(),
        )
        .map_err(|e| format!("Failed to load Whisper model: {e}"))?;

        info!("Whisper model loaded");
        Ok(Self {
            ctx: Arc::new(ctx),
            language: language.to_string(),
        })
    }

    /// Transcribe audio synchronously. Blocks for as long as the model runs.
    pub fn transcribe_blocking(&self, audio: &[u8]) -> Result<String, String> {
        run_model(&self.ctx, &self.language, audio)
    }
}

#[async_trait]
impl Transcriber for Whisper {
    fn name(&self) -> &str {
        "Local Whisper"
    }

    async fn transcribe(&self, clip: &VoiceClip) -> Result<Option<String>, ServiceError> {
        let ctx = Arc::clone(&self.ctx);
        let language = self.language.clone();
        let audio = clip.bytes.clone();

        let text = tokio::task::spawn_blocking(move || run_model(&ctx, &language, &audio))
            .await
            .map_err(|e| ServiceError::Api(format!("Whisper task failed: {e}")))?
            .map_err(ServiceError::Api)?;

        Ok((!text.is_empty()).then_some(text))
    }
}

fn run_model(ctx: &WhisperContext, language: &str, audio: &[u8]) -> Result<String, String> {
    debug!("Transcribing {} bytes of audio", audio.len());

    let pcm_data = convert_to_pcm(audio)?;

    let mut state = ctx
        .create_state()
        .map_err(|e| format!("Failed to create Whisper state: {e}"))?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    params.set_language(Some(language));
    params.set_translate(false);
    params.set_no_timestamps(true);
    params.set_single_segment(false);

    state
        .full(params, &pcm_data)
        .map_err(|e| format!("Whisper transcription failed: {e}"))?;

    let mut text = String::new();
    for segment in state.as_iter() {
        if let Ok(s) = segment.to_str() {
            text.push_str(s);
            text.push(' ');
        }
    }

    let text = text.trim().to_string();
    info!("Transcribed: \"{}\"", truncate(&text, 100));
    Ok(text)
}

/// Decode any ffmpeg-readable audio to 16 kHz mono f32 samples.
fn convert_to_pcm(audio: &[u8]) -> Result<Vec<f32>, String> {
    // ffmpeg needs seekable input for OGG
    let input_path = std::env::temp_dir().join(format!("voicegram_whisper_{}.ogg", std::process::id()));

    std::fs::write(&input_path, audio).map_err(|e| format!("Failed to write temp input: {e}"))?;

    let output = Command::new("ffmpeg")
        .arg("-i")
        .arg(&input_path)
        .args(["-ar", "16000", "-ac", "1", "-f", "s16le", "-acodec", "pcm_s16le", "-y", "pipe:1"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .output()
        .map_err(|e| format!("Failed to run ffmpeg: {e}"));

    let _ = std::fs::remove_file(&input_path);
    let output = output?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("ffmpeg failed: {}", stderr));
    }

    let samples: Vec<f32> = output
        .stdout
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32768.0)
        .collect();

    debug!("Converted to {} f32 samples", samples.len());
    Ok(samples)
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello...");
        assert_eq!(truncate("привет мир", 6), "привет...");
    }

    #[test]
    fn test_missing_model() {
        let err = Whisper::new(Path::new("/nonexistent/model.bin"), "ru").err().unwrap();
        assert!(err.contains("not found"));
    }
}
