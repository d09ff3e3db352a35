//! Text-to-speech tooling and a Telegram voice bot.

pub mod chatbot;
pub mod config;
pub mod tts_config;
