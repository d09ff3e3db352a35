//! Decides which messages the bot answers.

use super::message::IncomingMessage;

/// What to do with an incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum Triage {
    Ignore,
    /// Transcribe the voice attachment, then answer the transcript.
    Transcribe { file_id: String },
    /// Answer this text.
    Reply(String),
}

/// Why a text message gets an answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReplyReason {
    ReplyToBot,
    Mention,
    Question,
    Keyword,
}

/// Classify a message.
///
/// Voice is always transcribed and answered. Text is answered when it replies
/// to the bot, mentions it, asks a question, or contains a trigger keyword.
/// `keywords` must already be lower-case.
pub fn triage(msg: &IncomingMessage, bot_username: Option<&str>, keywords: &[String]) -> Triage {
    if let Some(voice) = &msg.voice {
        return Triage::Transcribe { file_id: voice.file_id.clone() };
    }

    let Some(text) = msg.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return Triage::Ignore;
    };

    match reply_reason(msg, text, bot_username, keywords) {
        Some(_) => Triage::Reply(text.to_string()),
        None => Triage::Ignore,
    }
}

pub fn reply_reason(
    msg: &IncomingMessage,
    text: &str,
    bot_username: Option<&str>,
    keywords: &[String],
) -> Option<ReplyReason> {
    if let Some(target) = &msg.reply_to {
        let is_us = match (bot_username, target.username.as_deref()) {
            (Some(ours), Some(theirs)) => ours.eq_ignore_ascii_case(theirs),
            (Some(_), None) => false,
            // our own name is unknown, so any bot counts
            (None, _) => true,
        };
        if target.is_bot && is_us {
            return Some(ReplyReason::ReplyToBot);
        }
    }

    let lower = text.to_lowercase();
    if let Some(name) = bot_username {
        let mention = format!("@{}", name.to_lowercase());
        if lower.contains(&mention) {
            return Some(ReplyReason::Mention);
        }
    }

    if text.contains('?') {
        return Some(ReplyReason::Question);
    }

    if keywords.iter().any(|k| !k.is_empty() && lower.contains(k.as_str())) {
        return Some(ReplyReason::Keyword);
    }

    None
}
