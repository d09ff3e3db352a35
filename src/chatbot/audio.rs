//! Generated audio on disk.
//!
//! Synthesized replies are stored as `N.<ext>` with a `N.json` sidecar that
//! holds the raw TTS response. Manual saves use timestamped names instead.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::SystemTime;

use tokio::process::Command;
use tracing::{debug, info, warn};

/// Extensions counted as stored audio. Voice-note copies (`.ogg`) ride along
/// with their source file and are not counted on their own.
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "pcm"];

pub struct AudioStore {
    dir: PathBuf,
    max_files: usize,
}

impl AudioStore {
    pub fn new<P: Into<PathBuf>>(dir: P, max_files: usize) -> Self {
        Self { dir: dir.into(), max_files }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }

    /// Next sequential index: highest numeric file stem plus one.
    pub fn next_index(&self) -> u64 {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return 1;
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| stem_index(&e.path()))
            .max()
            .map_or(1, |n| n + 1)
    }

    /// Write `N.<ext>` plus the `N.json` sidecar. Returns the audio path.
    pub fn save_numbered(
        &self,
        audio: &[u8],
        ext: &str,
        metadata: &serde_json::Value,
    ) -> std::io::Result<PathBuf> {
        self.ensure_dir()?;
        let index = self.next_index();
        let audio_path = self.dir.join(format!("{index}.{ext}"));
        std::fs::write(&audio_path, audio)?;

        let sidecar = self.dir.join(format!("{index}.json"));
        let json = serde_json::to_string_pretty(metadata).map_err(std::io::Error::other)?;
        if let Err(e) = std::fs::write(&sidecar, json) {
            warn!("Failed to write metadata {:?}: {}", sidecar, e);
        }

        info!("💾 Saved {} ({} bytes)", audio_path.display(), audio.len());
        Ok(audio_path)
    }

    /// Write `<prefix>_YYYYmmdd_HHMMSS.<ext>`.
    pub fn save_timestamped(&self, prefix: &str, audio: &[u8], ext: &str) -> std::io::Result<PathBuf> {
        self.ensure_dir()?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = self.dir.join(format!("{prefix}_{stamp}.{ext}"));
        std::fs::write(&path, audio)?;
        info!("💾 Saved {} ({} bytes)", path.display(), audio.len());
        Ok(path)
    }

    /// Keep the newest `max_files` audio files, deleting older ones with
    /// their sidecars. Returns how many audio files were removed.
    pub fn cleanup(&self) -> usize {
        self.cleanup_keeping(self.max_files)
    }

    pub fn cleanup_keeping(&self, keep: usize) -> usize {
        let mut files = self.files_with(|ext| AUDIO_EXTENSIONS.contains(&ext));
        if files.len() <= keep {
            return 0;
        }

        let total = files.len();
        // equal mtimes: numbered files by index, anything else by name
        files.sort_by(|(a, a_time), (b, b_time)| {
            a_time.cmp(b_time).then_with(|| match (stem_index(a), stem_index(b)) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => a.cmp(b),
            })
        });
        let mut deleted = 0;
        for (path, _) in files.into_iter().take(total - keep) {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    deleted += 1;
                    for sibling in ["json", "ogg"] {
                        let _ = std::fs::remove_file(path.with_extension(sibling));
                    }
                }
                Err(e) => warn!("Failed to delete {:?}: {}", path, e),
            }
        }

        if deleted > 0 {
            info!("🗑️ Deleted {} old audio files ({} before, limit {})", deleted, total, keep);
        }
        deleted
    }

    /// The newest `.json` sidecar and its parsed contents.
    pub fn latest_metadata(&self) -> Option<(PathBuf, serde_json::Value)> {
        let (path, _) = self
            .files_with(|ext| ext == "json")
            .into_iter()
            .max_by_key(|(_, modified)| *modified)?;
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(value) => Some((path, value)),
            Err(e) => {
                warn!("Failed to parse {:?}: {}", path, e);
                None
            }
        }
    }

    fn files_with(&self, keep_ext: impl Fn(&str) -> bool) -> Vec<(PathBuf, SystemTime)> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .and_then(|x| x.to_str())
                    .is_some_and(|x| keep_ext(&x.to_ascii_lowercase()))
            })
            .filter_map(|e| {
                let modified = e.metadata().and_then(|m| m.modified()).ok()?;
                Some((e.path(), modified))
            })
            .collect()
    }
}

/// The `N` of an `N.<ext>` file.
fn stem_index(path: &Path) -> Option<u64> {
    path.file_stem()?.to_str()?.parse().ok()
}

/// Convert an audio file to an OGG Opus voice note next to it.
///
/// Falls back to the original path when ffmpeg is missing or fails, since
/// Telegram still accepts the file (it just shows as audio, not a voice note).
pub async fn to_voice_note(path: &Path) -> PathBuf {
    let available = Command::new("ffmpeg")
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .is_ok_and(|s| s.success());
    if !available {
        debug!("ffmpeg not found, sending {:?} as is", path);
        return path.to_path_buf();
    }

    let output_path = path.with_extension("ogg");
    let output = Command::new("ffmpeg")
        .arg("-i")
        .arg(path)
        .args(["-acodec", "libopus", "-b:a", "64k"])
        .arg(&output_path)
        .arg("-y")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            debug!("Converted {:?} to {:?}", path, output_path);
            output_path
        }
        Ok(out) => {
            warn!("ffmpeg conversion failed: {}", String::from_utf8_lossy(&out.stderr).trim());
            path.to_path_buf()
        }
        Err(e) => {
            warn!("Failed to run ffmpeg: {}", e);
            path.to_path_buf()
        }
    }
}
