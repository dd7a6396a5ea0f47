//! Client Preferences
//!
//! Durable user toggles, stored as a small JSON file next to the session.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Persisted user preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_sound_enabled")]
    pub sound_enabled: bool,
}

fn default_sound_enabled() -> bool {
    true
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            sound_enabled: default_sound_enabled(),
        }
    }
}

/// Preference store errors
#[derive(Debug, Error)]
pub enum PreferencesError {
    #[error("Failed to access preferences file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to decode preferences file {path:?}: {error}")]
    Serialization { path: PathBuf, error: String },
}

/// File-backed preference store
#[derive(Debug, Clone)]
pub struct PreferencesStore {
    path: PathBuf,
    defaults: Preferences,
}

impl PreferencesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            defaults: Preferences::default(),
        }
    }

    /// Values used while no file has been written
    pub fn with_defaults(mut self, defaults: Preferences) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Preferences, PreferencesError> {
        if !self.path.exists() {
            return Ok(self.defaults.clone());
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| PreferencesError::Io {
            path: self.path.clone(),
            error: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| PreferencesError::Serialization {
            path: self.path.clone(),
            error: e.to_string(),
        })
    }

    pub fn save(&self, preferences: &Preferences) -> Result<(), PreferencesError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PreferencesError::Io {
                path: parent.to_path_buf(),
                error: e.to_string(),
            })?;
        }
        let content = serde_json::to_string_pretty(preferences).map_err(|e| {
            PreferencesError::Serialization {
                path: self.path.clone(),
                error: e.to_string(),
            }
        })?;
        std::fs::write(&self.path, content).map_err(|e| PreferencesError::Io {
            path: self.path.clone(),
            error: e.to_string(),
        })
    }

    pub fn sound_enabled(&self) -> Result<bool, PreferencesError> {
        Ok(self.load()?.sound_enabled)
    }

    pub fn set_sound_enabled(&self, enabled: bool) -> Result<(), PreferencesError> {
        let mut preferences = self.load()?;
        preferences.sound_enabled = enabled;
        self.save(&preferences)?;
        tracing::debug!(enabled, "Notification sound preference saved");
        Ok(())
    }

    /// Flip the sound flag, returning the new value
    pub fn toggle_sound(&self) -> Result<bool, PreferencesError> {
        let enabled = !self.sound_enabled()?;
        self.set_sound_enabled(enabled)?;
        Ok(enabled)
    }
}
