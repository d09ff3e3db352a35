//! Voice chat bot: Telegram in, language model in the middle, speech out.

pub mod audio;
pub mod engine;
pub mod error;
pub mod llm;
pub mod message;
pub mod offset;
pub mod stt;
pub mod telegram;
pub mod trigger;
pub mod tts;
#[cfg(feature = "local-whisper")]
pub mod whisper;

pub use audio::AudioStore;
pub use engine::{Engine, SpokenReply, speak, speak_and_send};
pub use error::{ServiceError, SpeakError, TelegramError};
pub use llm::{ChatModel, ReplyChain};
pub use message::{ChatSummary, IncomingMessage};
pub use offset::UpdateOffset;
pub use stt::{Transcriber, TranscriptionChain, VoiceClip};
pub use telegram::TelegramClient;
pub use trigger::{Triage, triage};
pub use tts::TtsClient;
#[cfg(feature = "local-whisper")]
pub use whisper::Whisper;
