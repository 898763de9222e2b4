//! Operator/user preferences that shape the session configuration.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub push_to_talk: bool,
    pub audio_playback: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            push_to_talk: false,
            audio_playback: true,
        }
    }
}

/// Read once at startup, written on every toggle. Durability is up to the host.
pub trait PreferenceStore: Send + Sync {
    fn load(&self) -> Preferences;
    fn save(&self, preferences: &Preferences) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    current: Mutex<Preferences>,
}

impl MemoryPreferenceStore {
    pub fn new(initial: Preferences) -> Self {
        Self {
            current: Mutex::new(initial),
        }
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn load(&self) -> Preferences {
        *self.current.lock()
    }

    fn save(&self, preferences: &Preferences) -> anyhow::Result<()> {
        *self.current.lock() = *preferences;
        Ok(())
    }
}
