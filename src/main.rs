mod commands;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

use commands::Paths;

/// Text-to-speech tools and a Telegram bot that answers with voice
#[derive(Parser, Debug)]
#[command(name = "voicegram")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Bot configuration file
    #[arg(long, global = true, env = "VOICEGRAM_CONFIG", default_value = "telegram_config.json")]
    config: PathBuf,

    /// Speech settings file
    #[arg(long, global = true, default_value = "tts_config.json")]
    tts_config: PathBuf,

    /// Where generated audio is stored
    #[arg(long, global = true, default_value = "audio")]
    audio_dir: PathBuf,

    /// File holding the last processed update id
    #[arg(long, global = true, default_value = "last_update_id.txt")]
    offset_file: PathBuf,

    /// Log directory
    #[arg(long, global = true, default_value = "logs")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the voice bot (default)
    Run,

    /// Synthesize text and print `AUDIO_FILE:<path>`
    Speak {
        /// Text to speak; `@path` reads a file, nothing reads stdin
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,

        /// Play the result with the system player
        #[arg(long)]
        open: bool,
    },

    /// Synthesize text and send it to the configured chat
    Send {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },

    /// List chats the bot has seen recently
    Chats,

    /// Show pending updates without consuming them
    Updates {
        #[arg(short, long, default_value_t = 10)]
        limit: u8,
    },

    /// Forget the saved update offset
    ResetOffset,

    /// List voices available to the MiniMax account
    Voices {
        /// system, voice_cloning, voice_generation, music_generation or all
        #[arg(long, default_value = "all")]
        voice_type: String,
    },

    /// Change the configured voice id
    SetVoice { voice_id: String },

    /// Make a generated voice permanent by using it once
    ActivateVoice {
        voice_id: Option<String>,

        /// Models to fall back to after the configured one, comma separated
        #[arg(long, value_delimiter = ',')]
        try_models: Vec<String>,
    },

    /// Print speech settings
    TtsSettings,

    /// Browse the OpenRouter model catalog
    Models,

    /// Send a test prompt to every configured language model
    Probe { text: Option<String> },

    /// Show the MiniMax API key (masked) and where it came from
    ShowKey,

    /// Re-extract audio from the newest saved TTS response
    SaveAudio,

    /// Delete old generated audio
    Cleanup {
        /// How many files to keep (default: audio_max_files)
        #[arg(long)]
        keep: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let _guard = init_logging(&cli.log_dir)?;

    let paths = Paths {
        config: cli.config,
        tts_config: cli.tts_config,
        audio_dir: cli.audio_dir,
        offset_file: cli.offset_file,
    };

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => commands::run(&paths).await,
        Command::Speak { text, open } => commands::speak(&paths, &text, open).await,
        Command::Send { text } => commands::send(&paths, &text).await,
        Command::Chats => commands::chats(&paths).await,
        Command::Updates { limit } => commands::updates(&paths, limit).await,
        Command::ResetOffset => commands::reset_offset(&paths),
        Command::Voices { voice_type } => commands::voices(&paths, &voice_type).await,
        Command::SetVoice { voice_id } => commands::set_voice(&paths, &voice_id),
        Command::ActivateVoice { voice_id, try_models } => {
            commands::activate_voice(&paths, voice_id, &try_models).await
        }
        Command::TtsSettings => commands::tts_settings(&paths),
        Command::Models => commands::models().await,
        Command::Probe { text } => commands::probe(&paths, text).await,
        Command::ShowKey => commands::show_key(&paths),
        Command::SaveAudio => commands::save_audio(&paths),
        Command::Cleanup { keep } => commands::cleanup(&paths, keep),
    }
}

/// Logs go to stderr (stdout is reserved for command output) and to
/// `voicegram.log` in `log_dir`.
fn init_logging(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir).with_context(|| format!("failed to create {}", log_dir.display()))?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("voicegram.log"))
        .context("failed to open log file")?;
    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    Ok(guard)
}
