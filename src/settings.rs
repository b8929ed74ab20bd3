use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use uuid::Uuid;

use crate::error::FetchError;

/// Runtime configuration, persisted as `settings.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Absolute path of the SQLite file holding download records.
    pub database_path: String,
    /// Mirror logs into the rolling log file.
    pub debug_logs: bool,
    /// Capacity of the manager's command channel.
    pub command_buffer: usize,
}

const DEFAULT_COMMAND_BUFFER: usize = 64;

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings {
            database_path: default_database_path().to_string_lossy().to_string(),
            debug_logs: false,
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

/// `~/.config/fetch-queue` on Linux, the platform config dir elsewhere.
pub(crate) fn app_support_dir() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| dirs::home_dir().unwrap_or_default());
    base.join("fetch-queue")
}

fn settings_json_path() -> PathBuf {
    app_support_dir().join("settings.json")
}

fn default_database_path() -> PathBuf {
    app_support_dir().join("downloads.db")
}

fn dir_is_writable(p: &Path) -> bool {
    if !p.is_dir() {
        return false;
    }
    let test = p.join(format!(".writecheck-{}.tmp", Uuid::new_v4()));
    match fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&test)
    {
        Ok(_) => {
            let _ = fs::remove_file(test);
            true
        }
        Err(_) => false,
    }
}

/// Validate a candidate database file path. Falls back to the default
/// location when it is relative, its directory cannot be created, or the
/// directory is not writable.
fn validated_database_path(candidate: &str) -> String {
    let path = PathBuf::from(candidate.trim());
    let fallback = || {
        let d = default_database_path();
        if let Some(parent) = d.parent() {
            let _ = fs::create_dir_all(parent);
        }
        d.to_string_lossy().to_string()
    };

    if path.as_os_str().is_empty() || !path.is_absolute() || path.is_dir() {
        return fallback();
    }
    let Some(parent) = path.parent() else {
        return fallback();
    };
    if !parent.exists() && fs::create_dir_all(parent).is_err() {
        return fallback();
    }
    if !dir_is_writable(parent) {
        return fallback();
    }
    path.to_string_lossy().to_string()
}

fn normalized(mut settings: FetchSettings) -> FetchSettings {
    let fixed = validated_database_path(&settings.database_path);
    if settings.database_path != fixed {
        tracing::warn!(from = %settings.database_path, to = %fixed, "database path replaced");
        settings.database_path = fixed;
    }
    settings.command_buffer = settings.command_buffer.max(1);
    settings
}

/// Load settings from the default location, fix invalid values and persist the clean copy.
pub fn load_settings() -> FetchSettings {
    load_settings_from(&settings_json_path())
}

pub fn load_settings_from(path: &Path) -> FetchSettings {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let settings = match fs::read_to_string(path) {
        Ok(s) => serde_json::from_str::<FetchSettings>(&s).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "unreadable settings; using defaults");
            FetchSettings::default()
        }),
        Err(_) => FetchSettings::default(),
    };
    let settings = normalized(settings);

    // Also migrates old or invalid files.
    if let Ok(body) = serde_json::to_string_pretty(&settings) {
        let _ = fs::write(path, body);
    }
    settings
}

pub fn save_settings(settings: &FetchSettings) -> Result<(), FetchError> {
    save_settings_to(&settings_json_path(), settings)
}

pub fn save_settings_to(path: &Path, settings: &FetchSettings) -> Result<(), FetchError> {
    let err = |reason: String| FetchError::Settings { path: path.to_path_buf(), reason };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| err(format!("failed to create settings dir: {e}")))?;
    }

    let to_write = normalized(settings.clone());
    let body = serde_json::to_string_pretty(&to_write).map_err(|e| err(format!("failed to serialize settings: {e}")))?;
    fs::write(path, body).map_err(|e| err(format!("failed to write settings.json: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults_and_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join("settings.json");

        let settings = load_settings_from(&path);

        assert_eq!(settings.command_buffer, DEFAULT_COMMAND_BUFFER);
        assert!(!settings.debug_logs);
        assert!(path.exists());
    }

    #[test]
    fn save_then_load_keeps_valid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let db = dir.path().join("data").join("queue.db");
        let wanted = FetchSettings {
            database_path: db.to_string_lossy().to_string(),
            debug_logs: true,
            command_buffer: 8,
        };

        save_settings_to(&path, &wanted).unwrap();

        assert_eq!(load_settings_from(&path), wanted);
        assert!(db.parent().unwrap().is_dir());
    }

    #[test]
    fn invalid_values_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"database_path":"relative.db","command_buffer":0}"#).unwrap();

        let settings = load_settings_from(&path);

        assert!(Path::new(&settings.database_path).is_absolute());
        assert_eq!(settings.command_buffer, 1);
        let stored: FetchSettings = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored, settings);
    }
}
