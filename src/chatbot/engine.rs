//! The update loop: poll Telegram, decide, transcribe, reply, speak.
//!
//! Updates are handled one at a time. The offset is advanced before any work
//! on an update starts, so a crash mid-update never replays it.

use std::path::PathBuf;
use std::time::Duration;

use teloxide::types::UpdateKind;
use tracing::{debug, info, warn};

use super::audio::{self, AudioStore};
use super::error::{SpeakError, TelegramError};
use super::llm::ReplyChain;
use super::message::{IncomingMessage, Sender};
use super::offset::UpdateOffset;
use super::stt::TranscriptionChain;
use super::telegram::{POLL_TIMEOUT_SECS, TelegramClient};
use super::trigger::{Triage, triage};
use super::tts::TtsClient;
use crate::config::{Config, LlmProvider};

/// Pause after a model chain gave no answer.
const NO_REPLY_BACKOFF: Duration = Duration::from_secs(5);
/// Pause after each sent reply and between polls.
const STEP_PAUSE: Duration = Duration::from_secs(1);

/// Where a spoken reply ended up.
#[derive(Debug)]
pub struct SpokenReply {
    /// Audio as returned by the TTS service.
    pub audio_path: PathBuf,
    /// File that was (or would be) sent; the voice-note conversion when it worked.
    pub voice_path: PathBuf,
}

/// Synthesize `text`, store it, prune old audio, and convert it to a voice note.
pub async fn speak(tts: &TtsClient, store: &AudioStore, text: &str) -> Result<SpokenReply, SpeakError> {
    let synthesis = tts.synthesize(text).await?;
    let audio_path = store.save_numbered(&synthesis.audio, &synthesis.format, &synthesis.raw)?;
    store.cleanup();
    let voice_path = audio::to_voice_note(&audio_path).await;
    Ok(SpokenReply { audio_path, voice_path })
}

/// Speak `text` and send it to `chat_id`, optionally with a caption.
pub async fn speak_and_send(
    telegram: &TelegramClient,
    tts: &TtsClient,
    store: &AudioStore,
    chat_id: i64,
    text: &str,
    caption: Option<&str>,
) -> Result<SpokenReply, SpeakError> {
    let spoken = speak(tts, store, text).await?;
    let data = std::fs::read(&spoken.voice_path)?;
    let file_name = spoken
        .voice_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("voice.ogg")
        .to_string();
    telegram.send_voice(chat_id, data, &file_name, caption).await?;
    Ok(spoken)
}

pub struct Engine {
    chat_id: i64,
    bot_username: Option<String>,
    keywords: Vec<String>,
    telegram: TelegramClient,
    transcriber: TranscriptionChain,
    replies: ReplyChain,
    tts: TtsClient,
    store: AudioStore,
    offset: UpdateOffset,
    step_pause: Duration,
    no_reply_backoff: Duration,
}

impl Engine {
    pub fn new(
        chat_id: i64,
        telegram: TelegramClient,
        transcriber: TranscriptionChain,
        replies: ReplyChain,
        tts: TtsClient,
        store: AudioStore,
        offset: UpdateOffset,
    ) -> Self {
        Self {
            chat_id,
            bot_username: None,
            keywords: Vec::new(),
            telegram,
            transcriber,
            replies,
            tts,
            store,
            offset,
            step_pause: STEP_PAUSE,
            no_reply_backoff: NO_REPLY_BACKOFF,
        }
    }

    /// Lower-case trigger words for plain text messages.
    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    /// Override the pause after each sent reply (and between polls) and the
    /// backoff after the model chain gave no answer.
    pub fn with_pauses(mut self, step: Duration, no_reply: Duration) -> Self {
        self.step_pause = step;
        self.no_reply_backoff = no_reply;
        self
    }

    /// Ask Telegram who we are. Without a username the bot still runs, it
    /// just cannot recognise mentions or tell its own messages from other bots'.
    pub async fn identify(&mut self) {
        match self.telegram.get_me().await {
            Ok(me) => {
                match &me.username {
                    Some(name) => info!("🤖 Bot: @{} ({})", name, me.first_name),
                    None => info!("🤖 Bot: {}", me.first_name),
                }
                self.bot_username = me.username;
            }
            Err(e) => warn!("⚠️ Could not get bot info: {}. Mentions will not be detected.", e),
        }
    }

    /// Log what the bot is about to do.
    pub fn log_startup(&self, config: &Config) {
        info!("🚀 Starting voice bot");
        for provider in &config.llm_order {
            if config.api_key(*provider).is_none() {
                continue;
            }
            match provider {
                LlmProvider::ZenMux => {
                    info!("✅ ZenMux: {}", config.zenmux_model);
                    if !config.fallback_models.is_empty() {
                        info!("   fallback models: {}", config.fallback_models.join(", "));
                    }
                }
                LlmProvider::OpenRouter => info!("✅ OpenRouter: {}", config.openrouter_model),
                LlmProvider::OpenAi => info!("✅ OpenAI: {}", config.openai_model),
                LlmProvider::Groq => info!("✅ Groq: {}", config.groq_model),
            }
        }
        if self.replies.is_empty() {
            warn!("⚠️ No language model is configured; messages will be read but never answered");
        }
        info!("🎙️ Transcription: {}", self.transcriber.names().join(" → "));
        info!("🎭 Personality: {}", config.personality);
        info!("💬 Chat: {}", self.chat_id);
        info!("📋 Answering: replies to the bot, mentions, questions, voice messages, keywords ({})",
            self.keywords.join(", "));
        info!("Press Ctrl+C to stop");
    }

    /// Fetch one batch of updates and handle each. Returns how many replies
    /// were sent (or attempted).
    pub async fn poll_once(&mut self) -> Result<usize, TelegramError> {
        let updates = self
            .telegram
            .get_updates(self.offset.next(), POLL_TIMEOUT_SECS, None)
            .await?;

        let mut replied = 0;
        for update in updates {
            self.offset.advance(i64::from(update.id.0));

            let UpdateKind::Message(msg) = &update.kind else {
                debug!("Skipping non-message update {}", update.id.0);
                continue;
            };
            if msg.chat.id.0 != self.chat_id {
                debug!("Skipping message from chat {}", msg.chat.id.0);
                continue;
            }

            if self.handle(IncomingMessage::from(msg)).await {
                replied += 1;
                tokio::time::sleep(self.step_pause).await;
            }
        }
        Ok(replied)
    }

    /// Returns whether a reply was generated and a send attempted.
    async fn handle(&self, msg: IncomingMessage) -> bool {
        let who = msg
            .sender
            .as_ref()
            .map(Sender::display_name)
            .unwrap_or_else(|| "unknown".to_string());

        let text = match triage(&msg, self.bot_username.as_deref(), &self.keywords) {
            Triage::Ignore => {
                debug!("Not answering {}", who);
                return false;
            }
            Triage::Reply(text) => text,
            Triage::Transcribe { file_id } => {
                info!("🎤 Voice message from {}", who);
                let clip = match self.telegram.download_file(&file_id).await {
                    Ok(clip) => clip,
                    Err(e) => {
                        warn!("Failed to download voice message: {}", e);
                        return false;
                    }
                };
                match self.transcriber.transcribe(&clip).await {
                    Some(text) => text,
                    None => {
                        warn!("Could not transcribe voice message from {}", who);
                        return false;
                    }
                }
            }
        };

        let preview: String = text.chars().take(100).collect();
        info!("💬 {}: \"{}\"", who, preview);

        let Some(reply) = self.replies.generate(&text).await else {
            warn!("No reply generated, backing off");
            tokio::time::sleep(self.no_reply_backoff).await;
            return false;
        };

        match speak_and_send(&self.telegram, &self.tts, &self.store, self.chat_id, &reply, None).await {
            Ok(spoken) => info!("✅ Voice reply sent ({})", spoken.voice_path.display()),
            Err(e) => warn!("Failed to deliver voice reply: {}", e),
        }
        true
    }

    /// Poll until Ctrl+C. Errors are logged and polling continues.
    pub async fn run(self) {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
    }

    /// Poll until `shutdown` completes, whether it fires mid-poll or during
    /// the pause between polls.
    pub async fn run_until<F: Future>(mut self, shutdown: F) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                result = self.poll_once() => {
                    match result {
                        Ok(0) => debug!("No replies this round"),
                        Ok(n) => debug!("Sent {} replies", n),
                        Err(e) => warn!("Polling failed: {}", e),
                    }
                }
            }
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.step_pause) => {}
            }
        }
        info!("👋 Stopping");
    }
}
