//! Persisted Telegram update offset.
//!
//! A single integer in a flat file. Updates are fetched from `last + 1`, so
//! anything already acknowledged is never seen again even across restarts.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

pub struct UpdateOffset {
    path: PathBuf,
    last: i64,
}

impl UpdateOffset {
    /// Read the saved offset. A missing or garbled file counts as 0.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let last = match std::fs::read_to_string(&path) {
            Ok(content) => content.trim().parse::<i64>().unwrap_or_else(|e| {
                warn!("Ignoring unparsable offset file {:?}: {}", path, e);
                0
            }),
            Err(_) => 0,
        };
        debug!("Loaded update offset {} from {:?}", last, path);
        Self { path, last }
    }

    pub fn last(&self) -> i64 {
        self.last
    }

    /// Offset to pass to getUpdates.
    pub fn next(&self) -> i64 {
        self.last + 1
    }

    /// Record an update id. Lower or equal ids are ignored. Returns whether
    /// the offset moved.
    pub fn advance(&mut self, update_id: i64) -> bool {
        if update_id <= self.last {
            return false;
        }
        self.last = update_id;
        if let Err(e) = std::fs::write(&self.path, update_id.to_string()) {
            warn!("Failed to save update offset to {:?}: {}", self.path, e);
        }
        true
    }

    /// Delete the offset file. Returns false when there was nothing to delete.
    pub fn reset<P: AsRef<Path>>(path: P) -> std::io::Result<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let offset = UpdateOffset::load(dir.path().join("last_update_id.txt"));
        assert_eq!(offset.last(), 0);
        assert_eq!(offset.next(), 1);
    }

    #[test]
    fn test_garbage_file_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_update_id.txt");
        std::fs::write(&path, "not a number").unwrap();
        assert_eq!(UpdateOffset::load(&path).last(), 0);
    }

    #[test]
    fn test_advance_is_monotonic_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_update_id.txt");
        let mut offset = UpdateOffset::load(&path);

        assert!(offset.advance(100));
        assert!(!offset.advance(100));
        assert!(!offset.advance(42));
        assert_eq!(offset.last(), 100);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "100");

        let reloaded = UpdateOffset::load(&path);
        assert_eq!(reloaded.next(), 101);
    }

    #[test]
    fn test_unwritable_path_keeps_memory_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut offset = UpdateOffset::load(dir.path().join("missing").join("offset.txt"));
        assert!(offset.advance(7));
        assert_eq!(offset.last(), 7);
    }

    #[test]
    fn test_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_update_id.txt");
        std::fs::write(&path, "5").unwrap();
        assert!(UpdateOffset::reset(&path).unwrap());
        assert!(!UpdateOffset::reset(&path).unwrap());
        assert_eq!(UpdateOffset::load(&path).last(), 0);
    }
}
