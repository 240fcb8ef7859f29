//! Application settings persistence using dconf
//!
//! Settings are stored in dconf under `/com/rech/voice-memo/`

use log::error;
use std::path::{Path, PathBuf};

const DCONF_PATH: &str = "/com/rech/voice-memo/";

/// Keys for dconf settings
mod keys {
    pub const RECORDINGS_DIR: &str = "recordings-dir";
    pub const CONFIRM_ON_DELETE: &str = "confirm-on-delete";
    pub const ALLOW_OVERLAP: &str = "allow-overlap";
}

fn key(name: &str) -> String {
    format!("{}{}", DCONF_PATH, name)
}

/// Resolved user settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub recordings_dir: PathBuf,
    pub confirm_on_delete: bool,
    pub allow_overlap: bool,
}

impl Settings {
    /// Load settings from dconf, falling back to defaults for missing keys
    pub fn load() -> Self {
        Self {
            recordings_dir: get_recordings_dir().unwrap_or_else(default_recordings_dir),
            confirm_on_delete: get_confirm_on_delete(),
            allow_overlap: get_allow_overlap(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recordings_dir: default_recordings_dir(),
            confirm_on_delete: true,
            allow_overlap: false,
        }
    }
}

/// `~/.local/share/rech/recordings`
pub fn default_recordings_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rech")
        .join("recordings")
}

/// Get the recordings directory override from dconf
pub fn get_recordings_dir() -> Option<PathBuf> {
    dconf_rs::get_string(&key(keys::RECORDINGS_DIR))
        .ok()
        .map(|s| s.trim().trim_matches('\'').to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

/// Set the recordings directory override in dconf
pub fn set_recordings_dir(dir: &Path) {
    if let Err(e) = dconf_rs::set_string(&key(keys::RECORDINGS_DIR), &dir.to_string_lossy()) {
        error!("Failed to save recordings directory to dconf: {}", e);
    }
}

/// Get the confirm on delete setting from dconf (defaults to true)
pub fn get_confirm_on_delete() -> bool {
    dconf_rs::get_boolean(&key(keys::CONFIRM_ON_DELETE)).unwrap_or(true)
}

/// Set the confirm on delete setting in dconf
pub fn set_confirm_on_delete(confirm: bool) {
    if let Err(e) = dconf_rs::set_boolean(&key(keys::CONFIRM_ON_DELETE), confirm) {
        error!("Failed to save confirm on delete setting to dconf: {}", e);
    }
}

/// Get whether recording and playback may overlap (defaults to false)
pub fn get_allow_overlap() -> bool {
    dconf_rs::get_boolean(&key(keys::ALLOW_OVERLAP)).unwrap_or(false)
}

/// Set whether recording and playback may overlap
pub fn set_allow_overlap(allow: bool) {
    if let Err(e) = dconf_rs::set_boolean(&key(keys::ALLOW_OVERLAP), allow) {
        error!("Failed to save overlap setting to dconf: {}", e);
    }
}
