//! Owned view of an incoming Telegram message.

use teloxide::types::{Chat, Message};

/// Who wrote a message.
#[derive(Debug, Clone, PartialEq)]
pub struct Sender {
    pub user_id: u64,
    pub first_name: String,
    pub username: Option<String>,
    pub is_bot: bool,
}

impl Sender {
    /// `@username` when there is one, else the first name.
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(u) => format!("@{u}"),
            None => self.first_name.clone(),
        }
    }
}

/// The message a reply points at.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyTarget {
    pub is_bot: bool,
    pub username: Option<String>,
}

/// Voice note or audio file attached to a message.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceAttachment {
    pub file_id: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub sender: Option<Sender>,
    /// Message text, or the caption of a media message.
    pub text: Option<String>,
    pub voice: Option<VoiceAttachment>,
    pub reply_to: Option<ReplyTarget>,
}

impl From<&Message> for IncomingMessage {
    fn from(msg: &Message) -> Self {
        let sender = msg.from.as_ref().map(|u| Sender {
            user_id: u.id.0,
            first_name: u.first_name.clone(),
            username: u.username.clone(),
            is_bot: u.is_bot,
        });

        let voice = msg
            .voice()
            .map(|v| &v.file.id)
            .or_else(|| msg.audio().map(|a| &a.file.id))
            .map(|id| VoiceAttachment { file_id: id.0.clone() });

        let reply_to = msg.reply_to_message().map(|r| ReplyTarget {
            is_bot: r.from.as_ref().is_some_and(|u| u.is_bot),
            username: r.from.as_ref().and_then(|u| u.username.clone()),
        });

        Self {
            chat_id: msg.chat.id.0,
            sender,
            text: msg.text().or_else(|| msg.caption()).map(str::to_string),
            voice,
            reply_to,
        }
    }
}

/// A chat seen in recent updates.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSummary {
    pub id: i64,
    pub kind: &'static str,
    pub title: Option<String>,
    pub username: Option<String>,
}

impl From<&Chat> for ChatSummary {
    fn from(chat: &Chat) -> Self {
        let kind = if chat.is_private() {
            "private"
        } else if chat.is_group() {
            "group"
        } else if chat.is_supergroup() {
            "supergroup"
        } else if chat.is_channel() {
            "channel"
        } else {
            "unknown"
        };
        Self {
            id: chat.id.0,
            kind,
            title: chat
                .title()
                .or_else(|| chat.first_name())
                .map(str::to_string),
            username: chat.username().map(str::to_string),
        }
    }
}
