//! Telegram client using teloxide.

use std::time::Duration;

use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile};
use tracing::{debug, info, warn};

use super::error::TelegramError;
use super::stt::VoiceClip;

/// Long-poll timeout passed to getUpdates, in seconds.
pub const POLL_TIMEOUT_SECS: u32 = 30;
/// Telegram rejects longer voice captions in some clients; keep them short.
pub const CAPTION_LIMIT: usize = 200;

/// The bot account behind the token.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub first_name: String,
    pub username: Option<String>,
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    /// Create a client whose HTTP timeout outlasts a long poll.
    pub fn new(token: &str) -> Result<Self, TelegramError> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(Duration::from_secs(u64::from(POLL_TIMEOUT_SECS) + 10))
            .build()?;
        Ok(Self { bot: Bot::with_client(token, client) })
    }

    /// Talk to a Bot API server other than api.telegram.org.
    pub fn with_api_url(token: &str, api_url: &str) -> Result<Self, TelegramError> {
        let url = reqwest::Url::parse(api_url).map_err(|_| TelegramError::ApiUrl(api_url.to_string()))?;
        let client = Self::new(token)?;
        Ok(Self { bot: client.bot.set_api_url(url) })
    }

    pub async fn get_me(&self) -> Result<BotIdentity, TelegramError> {
        let me = self.bot.get_me().await?;
        Ok(BotIdentity {
            first_name: me.user.first_name.clone(),
            username: me.user.username.clone(),
        })
    }

    /// Fetch updates starting at `offset`, waiting up to `timeout` seconds.
    pub async fn get_updates(&self, offset: i64, timeout: u32, limit: Option<u8>) -> Result<Vec<Update>, TelegramError> {
        let offset = i32::try_from(offset).unwrap_or(i32::MAX);
        let mut request = self.bot.get_updates().offset(offset).timeout(timeout);
        if let Some(limit) = limit {
            request = request.limit(limit);
        }
        let updates = request.await?;
        debug!("Fetched {} updates from offset {}", updates.len(), offset);
        Ok(updates)
    }

    /// Download a file into memory. The clip is named after the extension
    /// Telegram reports, `voice.ogg` when it reports none.
    pub async fn download_file(&self, file_id: &str) -> Result<VoiceClip, TelegramError> {
        let file = self.bot.get_file(FileId(file_id.to_string())).await?;

        let mut data = Vec::new();
        self.bot.download_file(&file.path, &mut data).await?;

        let name = format!("voice.{}", file_extension(&file.path));
        info!("📥 Downloaded {} ({} bytes)", name, data.len());
        Ok(VoiceClip::new(data, name))
    }

    /// Send a voice message from bytes (OGG Opus for a proper voice note).
    pub async fn send_voice(
        &self,
        chat_id: i64,
        voice_data: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
    ) -> Result<i64, TelegramError> {
        info!("🔊 Sending voice to chat {} ({} bytes)", chat_id, voice_data.len());

        let input_file = InputFile::memory(voice_data).file_name(file_name.to_string());
        let mut request = self.bot.send_voice(ChatId(chat_id), input_file);
        if let Some(cap) = caption {
            request = request.caption(truncate_caption(cap));
        }

        request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
            warn!("Failed to send voice: {e}");
            TelegramError::from(e)
        })
    }
}

/// First [`CAPTION_LIMIT`] characters of `text`.
pub fn truncate_caption(text: &str) -> String {
    text.chars().take(CAPTION_LIMIT).collect()
}

/// Extension of a Telegram file path, `ogg` when there is none.
pub fn file_extension(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext,
        _ => "ogg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_caption() {
        assert_eq!(truncate_caption("short"), "short");
        let long = "я".repeat(300);
        assert_eq!(truncate_caption(&long).chars().count(), 200);
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("voice/file_12.oga"), "oga");
        assert_eq!(file_extension("music/file_3.mp3"), "mp3");
        assert_eq!(file_extension("voice/file_12"), "ogg");
        assert_eq!(file_extension("dir.v2/file"), "ogg");
        assert_eq!(file_extension(""), "ogg");
    }

    #[test]
    fn test_client_builds() {
        assert!(TelegramClient::new("123456:TEST").is_ok());
        assert!(TelegramClient::with_api_url("123456:TEST", "http://127.0.0.1:8081").is_ok());
        assert!(matches!(
            TelegramClient::with_api_url("123456:TEST", "not a url"),
            Err(TelegramError::ApiUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_get_me_against_local_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", mockito::Matcher::Regex(r"(?i)^/bot123456:TEST/getme$".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true,"result":{"id":123456,"is_bot":true,"first_name":"Voice","username":"voice_bot","can_join_groups":true,"can_read_all_group_messages":false,"supports_inline_queries":false,"can_connect_to_business":false,"has_main_web_app":false}}"#)
            .create_async()
            .await;

        let client = TelegramClient::with_api_url("123456:TEST", &server.url()).unwrap();
        let me = client.get_me().await.unwrap();
        assert_eq!(me.first_name, "Voice");
        assert_eq!(me.username.as_deref(), Some("voice_bot"));
        mock.assert_async().await;
    }
}
