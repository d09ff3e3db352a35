//! Subcommand implementations.

use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use teloxide::types::UpdateKind;
use tracing::{debug, info, warn};

use voicegram::chatbot::llm::{self, OPENROUTER_MODELS_URL, ReplyChain};
use voicegram::chatbot::telegram::{TelegramClient, truncate_caption};
use voicegram::chatbot::tts::{ACTIVATION_MODELS, ACTIVATION_PHRASES, TtsClient, VoiceInfo, decode_hex};
use voicegram::chatbot::{AudioStore, ChatSummary, Engine, IncomingMessage, TranscriptionChain, UpdateOffset};
use voicegram::chatbot::speak_and_send;
use voicegram::config::{Config, DEFAULT_AUDIO_MAX_FILES};
use voicegram::tts_config::{ResolvedKey, TtsConfig, default_mcp_files, mask_key, resolve_minimax_key};

const PROBE_TEXT: &str = "Привет! Как дела?";

pub struct Paths {
    pub config: PathBuf,
    pub tts_config: PathBuf,
    pub audio_dir: PathBuf,
    pub offset_file: PathBuf,
}

fn load_config(paths: &Paths) -> Result<Config> {
    Config::load(&paths.config).with_context(|| format!("failed to load {}", paths.config.display()))
}

/// Config for commands that can do without it (only the MiniMax key and
/// audio limit are read from it).
fn optional_config(paths: &Paths) -> Option<Config> {
    match Config::load(&paths.config) {
        Ok(config) => Some(config),
        Err(e) => {
            debug!("Continuing without bot config: {}", e);
            None
        }
    }
}

fn minimax_key(config: Option<&Config>) -> Option<ResolvedKey> {
    let explicit = config.and_then(|c| c.minimax_api_key.as_deref());
    resolve_minimax_key(explicit, |k| std::env::var(k).ok(), &default_mcp_files())
}

fn tts_client(paths: &Paths, config: Option<&Config>) -> Result<TtsClient> {
    let key = minimax_key(config)
        .context("MiniMax API key not found (set minimax_api_key, MINIMAX_API_KEY, or mcp.json)")?;
    debug!("Using MiniMax key from {}", key.source);
    Ok(TtsClient::new(key.key, TtsConfig::load(&paths.tts_config)))
}

fn audio_store(paths: &Paths, config: Option<&Config>) -> AudioStore {
    let max_files = config.map_or(DEFAULT_AUDIO_MAX_FILES, |c| c.audio_max_files);
    AudioStore::new(&paths.audio_dir, max_files)
}

/// Text from arguments (`@path` reads a file) or from piped stdin.
fn input_text(args: &[String]) -> Result<String> {
    let raw = if args.is_empty() {
        if std::io::stdin().is_terminal() {
            bail!("no text given; pass it as arguments or pipe it on stdin");
        }
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("failed to read stdin")?;
        buf
    } else {
        let joined = args.join(" ");
        match joined.strip_prefix('@') {
            Some(path) => std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?,
            None => joined,
        }
    };

    let text = clean_text(&raw);
    if text.is_empty() {
        bail!("text is empty");
    }
    Ok(text)
}

/// Trim, and drop leading dashes some shells leave in front of the text.
fn clean_text(raw: &str) -> String {
    raw.trim().trim_start_matches('-').trim().to_string()
}

pub async fn run(paths: &Paths) -> Result<()> {
    let config = load_config(paths)?;
    let chat_id = config.require_chat_id()?;
    let telegram = TelegramClient::new(&config.bot_token)?;
    let tts = tts_client(paths, Some(&config))?;

    let mut engine = Engine::new(
        chat_id.0,
        telegram,
        TranscriptionChain::from_config(&config),
        ReplyChain::from_config(&config),
        tts,
        audio_store(paths, Some(&config)),
        UpdateOffset::load(&paths.offset_file),
    )
    .with_keywords(config.trigger_keywords.clone());

    engine.identify().await;
    engine.log_startup(&config);
    engine.run().await;
    Ok(())
}

pub async fn speak(paths: &Paths, args: &[String], open: bool) -> Result<()> {
    let text = input_text(args)?;
    let config = optional_config(paths);
    let tts = tts_client(paths, config.as_ref())?;
    let store = audio_store(paths, config.as_ref());

    let synthesis = tts.synthesize(&text).await?;
    let path = store.save_numbered(&synthesis.audio, &synthesis.format, &synthesis.raw)?;
    store.cleanup();

    println!("AUDIO_FILE:{}", path.display());
    if open {
        open_in_player(&path);
    }
    Ok(())
}

fn open_in_player(path: &Path) {
    let mut command = if cfg!(target_os = "macos") {
        std::process::Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut c = std::process::Command::new("cmd");
        c.args(["/C", "start", ""]);
        c
    } else {
        std::process::Command::new("xdg-open")
    };
    if let Err(e) = command.arg(path).spawn() {
        warn!("Failed to open {}: {}", path.display(), e);
    }
}

pub async fn send(paths: &Paths, args: &[String]) -> Result<()> {
    let text = input_text(args)?;
    let config = load_config(paths)?;
    let chat_id = config.require_chat_id()?;
    let telegram = TelegramClient::new(&config.bot_token)?;
    let tts = tts_client(paths, Some(&config))?;
    let store = audio_store(paths, Some(&config));

    let caption = truncate_caption(&text);
    let spoken = speak_and_send(&telegram, &tts, &store, chat_id.0, &text, Some(&caption)).await?;

    println!("✅ Voice message sent to chat {}", chat_id.0);
    println!("AUDIO_FILE:{}", spoken.audio_path.display());
    Ok(())
}

pub async fn chats(paths: &Paths) -> Result<()> {
    let config = load_config(paths)?;
    let telegram = TelegramClient::new(&config.bot_token)?;
    let updates = telegram.get_updates(0, 0, Some(100)).await?;

    let mut seen: Vec<ChatSummary> = Vec::new();
    for chat in updates.iter().filter_map(|u| u.chat()) {
        let summary = ChatSummary::from(chat);
        if !seen.iter().any(|c| c.id == summary.id) {
            seen.push(summary);
        }
    }

    if seen.is_empty() {
        println!("No chats found. Send a message to the bot (or add it to a group) and try again.");
        return Ok(());
    }

    println!("{:>16}  {:<10}  {:<30}  username", "chat id", "type", "title");
    for chat in &seen {
        println!(
            "{:>16}  {:<10}  {:<30}  {}",
            chat.id,
            chat.kind,
            chat.title.as_deref().unwrap_or("-"),
            chat.username.as_deref().map(|u| format!("@{u}")).unwrap_or_else(|| "-".into()),
        );
    }
    println!("\nPut the chat id into chat_id in {}", paths.config.display());
    Ok(())
}

pub async fn updates(paths: &Paths, limit: u8) -> Result<()> {
    let config = load_config(paths)?;
    let telegram = TelegramClient::new(&config.bot_token)?;
    let offset = UpdateOffset::load(&paths.offset_file);

    println!("Saved offset: {}", offset.last());
    println!("Requesting from: {}", offset.next());
    let updates = telegram.get_updates(offset.next(), 5, Some(limit)).await?;
    println!("Pending updates: {}", updates.len());

    let expected = config.chat_id.map(|c| c.0);
    for (i, update) in updates.iter().enumerate() {
        let UpdateKind::Message(msg) = &update.kind else {
            println!("\n#{} (update_id={}): not a message", i + 1, update.id.0);
            continue;
        };
        let incoming = IncomingMessage::from(msg);
        let from = incoming
            .sender
            .as_ref()
            .map(|s| s.display_name())
            .unwrap_or_else(|| "unknown".into());
        let text: String = incoming.text.as_deref().unwrap_or("(no text)").chars().take(50).collect();

        println!("\n#{} (update_id={}):", i + 1, update.id.0);
        println!("   chat: {}", incoming.chat_id);
        println!("   from: {}", from);
        println!("   text: {}", text);
        if incoming.voice.is_some() {
            println!("   voice message");
        }
        match expected {
            Some(id) if id == incoming.chat_id => println!("   ✅ configured chat"),
            Some(id) => println!("   ⚠️ other chat (expected {id}), the bot will skip it"),
            None => println!("   ⚠️ chat_id is not configured"),
        }
    }
    Ok(())
}

pub fn reset_offset(paths: &Paths) -> Result<()> {
    if UpdateOffset::reset(&paths.offset_file)? {
        println!("✅ Removed {}; the bot will start from pending updates", paths.offset_file.display());
    } else {
        println!("Nothing to reset ({} does not exist)", paths.offset_file.display());
    }
    Ok(())
}

pub async fn voices(paths: &Paths, voice_type: &str) -> Result<()> {
    let config = optional_config(paths);
    let tts = tts_client(paths, config.as_ref())?;
    let catalog = tts.list_voices(voice_type).await?;

    print_voices("Voice design voices", &catalog.voice_generation, None);
    print_voices("Cloned voices", &catalog.voice_cloning, None);
    print_voices("System voices", &catalog.system_voice, Some(10));

    println!("Voice design: {}", catalog.voice_generation.len());
    println!("Cloned:       {}", catalog.voice_cloning.len());
    println!("System:       {}", catalog.system_voice.len());
    println!("Music:        {}", catalog.music_generation.len());
    println!("Total:        {}", catalog.total());

    let output = Path::new("available_voices.json");
    std::fs::write(output, serde_json::to_string_pretty(&catalog.raw)?)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("\nFull list saved to {}", output.display());
    Ok(())
}

fn print_voices(title: &str, voices: &[VoiceInfo], limit: Option<usize>) {
    if voices.is_empty() {
        return;
    }
    let shown = limit.unwrap_or(voices.len()).min(voices.len());
    println!("[{title}]");
    for (i, voice) in voices.iter().take(shown).enumerate() {
        println!("{:>3}. {}", i + 1, voice.voice_id);
        println!("     name: {}", voice.voice_name.as_deref().unwrap_or("(unnamed)"));
        if let Some(created) = &voice.created_time {
            println!("     created: {created}");
        }
    }
    if shown < voices.len() {
        println!("     ... and {} more", voices.len() - shown);
    }
    println!();
}

pub fn set_voice(paths: &Paths, voice_id: &str) -> Result<()> {
    let old = TtsConfig::set_voice_id(&paths.tts_config, voice_id)?;
    println!("✅ Voice changed: {old} → {voice_id}");
    Ok(())
}

/// Generated voices are deleted unless used; one synthesis keeps them.
/// The configured model is tried first, then `try_models` in order (the
/// known speech models when none are given).
pub async fn activate_voice(paths: &Paths, voice_id: Option<String>, try_models: &[String]) -> Result<()> {
    let settings = TtsConfig::load(&paths.tts_config);
    let voice_id = voice_id.unwrap_or_else(|| settings.voice_setting.voice_id.clone());
    let config = optional_config(paths);
    let tts = tts_client(paths, config.as_ref())?;
    let store = audio_store(paths, config.as_ref());

    println!("Voice id: {voice_id}");
    match tts.list_voices("all").await {
        Ok(catalog) => {
            let known = [
                &catalog.voice_generation,
                &catalog.voice_cloning,
                &catalog.system_voice,
                &catalog.music_generation,
            ]
            .iter()
            .any(|list| list.iter().any(|v| v.voice_id == voice_id));
            if known {
                println!("Found in the account's voice list");
            } else {
                println!("⚠️ Not in the account's voice list; trying anyway");
            }
        }
        Err(e) => warn!("Could not fetch voice list: {}", e),
    }

    let fallbacks: Vec<String> = if try_models.is_empty() {
        ACTIVATION_MODELS.iter().map(|m| m.to_string()).collect()
    } else {
        try_models.to_vec()
    };
    let models = activation_models(&settings.model, &fallbacks);
    println!("Models: {}", models.join(", "));
    let activation = match tts.activate_voice(&voice_id, &models, ACTIVATION_PHRASES).await {
        Ok(activation) => activation,
        Err(e) => {
            println!("❌ Could not activate {voice_id}: {e}");
            println!("The voice may have expired (unused for 7 days), been deleted, or belong to another account.");
            println!("Check Voice Design at https://platform.minimax.io/ and create a new voice if needed.");
            return Err(e.into());
        }
    };

    let synthesis = &activation.synthesis;
    let path = store.save_timestamped("activation", &synthesis.audio, &synthesis.format)?;
    println!("✅ Voice {voice_id} is active (model {}, phrase \"{}\")", activation.model, activation.phrase);
    println!("Sample saved to {}", path.display());
    Ok(())
}

/// `configured` followed by `extra`, without repeats.
fn activation_models(configured: &str, extra: &[String]) -> Vec<String> {
    let mut models = vec![configured.to_string()];
    for model in extra {
        let model = model.trim();
        if !model.is_empty() && !models.iter().any(|m| m == model) {
            models.push(model.to_string());
        }
    }
    models
}

pub fn tts_settings(paths: &Paths) -> Result<()> {
    println!("Settings from {}:\n", paths.tts_config.display());
    println!("{}", TtsConfig::load(&paths.tts_config));
    Ok(())
}

pub async fn models() -> Result<()> {
    let models = llm::fetch_openrouter_models(&reqwest::Client::new(), OPENROUTER_MODELS_URL).await?;
    let digest = llm::digest_models(&models);

    println!("Total models: {}\n", digest.total);
    println!("🆓 Free models ({})", digest.free_total);
    for (vendor, group) in &digest.free_by_vendor {
        println!("\n📦 {}:", vendor.to_uppercase());
        for model in group {
            println!("   • {}", model.id);
            println!("     {}", model.name);
        }
    }
    if digest.free_total > 30 {
        println!("\n   ... and {} more free models", digest.free_total - 30);
    }

    println!("\n⭐ Popular paid models");
    for model in &digest.popular {
        println!("\n   • {}", model.id);
        println!("     {}", model.name);
        println!("     💰 {}", model.price_label());
    }
    println!("\nFull list: https://openrouter.ai/models");
    Ok(())
}

pub async fn probe(paths: &Paths, text: Option<String>) -> Result<()> {
    let config = load_config(paths)?;
    let chain = ReplyChain::from_config(&config);
    if chain.is_empty() {
        bail!("no language model has an API key configured");
    }

    let text = text.unwrap_or_else(|| PROBE_TEXT.to_string());
    println!("Prompt: {text}\n");
    let mut working = 0;
    for (label, result) in chain.probe(&text).await {
        match result {
            Ok(Some(reply)) => {
                working += 1;
                println!("✅ {label}\n   {reply}\n");
            }
            Ok(None) => println!("⚠️ {label}: empty answer\n"),
            Err(e) => println!("❌ {label}: {e}\n"),
        }
    }
    println!("{working} of {} models answered", chain.labels().len());

    let transcribers = TranscriptionChain::from_config(&config);
    println!("Transcription order: {}", transcribers.names().join(" → "));
    info!("Probe finished");
    Ok(())
}

pub fn show_key(paths: &Paths) -> Result<()> {
    let config = optional_config(paths);
    match minimax_key(config.as_ref()) {
        Some(key) => {
            println!("Source: {}", key.source);
            println!("Key:    {}", mask_key(&key.key));
            Ok(())
        }
        None => {
            println!("MiniMax API key not found. Looked in:");
            println!("  1. minimax_api_key in {}", paths.config.display());
            println!("  2. MINIMAX_API_KEY environment variable");
            for (i, file) in default_mcp_files().iter().enumerate() {
                println!("  {}. {}", i + 3, file.display());
            }
            bail!("MiniMax API key not found")
        }
    }
}

pub fn save_audio(paths: &Paths) -> Result<()> {
    let store = AudioStore::new(&paths.audio_dir, DEFAULT_AUDIO_MAX_FILES);
    let (source, response) = store
        .latest_metadata()
        .with_context(|| format!("no saved TTS response in {}", paths.audio_dir.display()))?;

    let hex = response
        .pointer("/data/audio")
        .and_then(|a| a.as_str())
        .with_context(|| format!("{} has no data.audio", source.display()))?;
    let audio = decode_hex(hex)?;
    let path = store.save_timestamped("audio", &audio, "mp3")?;

    println!("Audio saved: {}", path.display());
    println!("Size: {} bytes", audio.len());
    if let Some(ms) = response.pointer("/extra_info/audio_length").and_then(|v| v.as_f64()) {
        println!("Duration: {:.2} s", ms / 1000.0);
    }
    Ok(())
}

pub fn cleanup(paths: &Paths, keep: Option<usize>) -> Result<()> {
    let config = optional_config(paths);
    let keep = keep.unwrap_or_else(|| config.as_ref().map_or(DEFAULT_AUDIO_MAX_FILES, |c| c.audio_max_files));
    let store = AudioStore::new(&paths.audio_dir, keep);
    let deleted = store.cleanup();
    println!("Deleted {deleted} old audio files (keeping {keep})");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  hello  "), "hello");
        assert_eq!(clean_text("-- hello"), "hello");
        assert_eq!(clean_text("-"), "");
        assert_eq!(clean_text("a-b"), "a-b");
    }

    #[test]
    fn test_input_text_from_args_and_file() {
        assert_eq!(input_text(&["-Привет".into(), "мир".into()]).unwrap(), "Привет мир");

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("text.txt");
        std::fs::write(&file, "  из файла \n").unwrap();
        let arg = format!("@{}", file.display());
        assert_eq!(input_text(&[arg]).unwrap(), "из файла");
    }

    #[test]
    fn test_activation_models() {
        assert_eq!(activation_models("speech-2.6-hd", &[]), vec!["speech-2.6-hd"]);
        let extra = vec!["speech-02-hd".to_string(), " speech-2.6-hd ".to_string(), String::new()];
        assert_eq!(activation_models("speech-2.6-hd", &extra), vec!["speech-2.6-hd", "speech-02-hd"]);
    }

    #[test]
    fn test_input_text_empty_args() {
        assert!(input_text(&["--".into()]).is_err());
    }
}
