//! JSON-file preference store.

use anyhow::Context;
use handoff_core::preferences::{PreferenceStore, Preferences};
use std::path::PathBuf;
use tracing::warn;

pub struct FilePreferenceStore {
    path: PathBuf,
}

impl FilePreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PreferenceStore for FilePreferenceStore {
    /// Missing or unreadable files fall back to defaults.
    fn load(&self) -> Preferences {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return Preferences::default();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Ignoring malformed preferences file");
            Preferences::default()
        })
    }

    fn save(&self, preferences: &Preferences) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(preferences)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_round_trip_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePreferenceStore::new(dir.path().join("preferences.json"));
        assert_eq!(store.load(), Preferences::default());

        let prefs = Preferences {
            push_to_talk: true,
            audio_playback: false,
        };
        store.save(&prefs).unwrap();
        assert_eq!(store.load(), prefs);
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(FilePreferenceStore::new(path).load(), Preferences::default());
    }

    #[test]
    fn test_unwritable_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePreferenceStore::new(dir.path().join("missing").join("prefs.json"));
        assert!(store.save(&Preferences::default()).is_err());
    }
}
