// Settings - Process-wide preferences shared with the preferences layer
// Plain key-value data: loaded once, mutated by the owner, saved explicitly

pub mod recent;

pub use recent::{MAX_RECENT_FILES, RecentFiles};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Application directory name under the user config dir
const APP_DIR: &str = "mymusic_live";
const SETTINGS_FILE: &str = "settings.json";

/// Settings error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No configuration directory available on this system")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// External transport preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Sync with the shared transport at all
    pub enabled: bool,
    /// Drive the shared transport instead of following it
    pub master: bool,
    /// Only take the master role if nobody else holds it
    pub conditional_master: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            master: false,
            conditional_master: true,
        }
    }
}

/// Persisted preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub recent_files: RecentFiles,
    /// Piano-roll key height in pixels (owned by the editor)
    pub editor_key_height: u32,
    /// Leave notes sounding on stop instead of sending NoteOff
    pub resume_note_ons: bool,
    pub transport: TransportSettings,
    /// Clock thread wake-up period
    pub clock_period_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recent_files: RecentFiles::default(),
            editor_key_height: 12,
            resume_note_ons: false,
            transport: TransportSettings::default(),
            clock_period_ms: 2,
        }
    }
}

impl Settings {
    /// `<config dir>/mymusic_live/settings.json`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(dir.join(APP_DIR).join(SETTINGS_FILE))
    }

    /// Load from `path`. A missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let data = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&data)?;
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Write to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        log::debug!("Saved settings to {}", path.display());
        Ok(())
    }

    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(&Self::default_path()?)
    }

    pub fn save_default(&self) -> Result<(), ConfigError> {
        self.save(&Self::default_path()?)
    }
}
