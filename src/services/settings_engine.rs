// Linkmirror Settings Engine
// Sync settings persisted as pretty JSON, edited one dot-path key at a time.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::platform;
use crate::types::errors::SettingsError;
use crate::types::settings::{BackendSettings, SyncSettings};

/// Trait defining the settings engine interface.
pub trait SettingsEngineTrait {
    fn load(&mut self) -> Result<SyncSettings, SettingsError>;
    fn save(&self) -> Result<(), SettingsError>;
    fn get_settings(&self) -> &SyncSettings;
    fn set_value(&mut self, key: &str, value: serde_json::Value) -> Result<(), SettingsError>;
    fn reset(&mut self) -> Result<(), SettingsError>;
    fn get_config_path(&self) -> &str;
}

/// Settings engine implementation that persists settings as JSON on disk.
pub struct SettingsEngine {
    config_path: String,
    settings: SyncSettings,
}

impl SettingsEngine {
    /// Uses `path_override`, or `settings.json` in the platform config directory.
    /// Nothing is read until [`SettingsEngineTrait::load`].
    pub fn new(path_override: Option<String>) -> Self {
        let config_path = path_override.unwrap_or_else(|| {
            platform::get_config_dir()
                .join("settings.json")
                .to_string_lossy()
                .into_owned()
        });
        Self {
            config_path,
            settings: SyncSettings::default(),
        }
    }

    /// Resolves the SQLite file used by the local backend.
    ///
    /// Returns `None` when the configured backend is not local.
    pub fn local_database_path(&self) -> Option<PathBuf> {
        match &self.settings.backend {
            BackendSettings::Local { database_path: Some(p) } => Some(PathBuf::from(p)),
            BackendSettings::Local { database_path: None } => {
                Some(platform::get_data_dir().join("linkmirror.db"))
            }
            BackendSettings::Http { .. } => None,
        }
    }
}

impl SettingsEngineTrait for SettingsEngine {
    /// Reads the config file. A missing file yields the defaults; an
    /// unreadable or malformed one is an error and leaves the current
    /// settings untouched.
    fn load(&mut self) -> Result<SyncSettings, SettingsError> {
        self.settings = match fs::read_to_string(&self.config_path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                SettingsError::SerializationError(format!("{}: {}", self.config_path, e))
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.config_path, "no settings file, using defaults");
                SyncSettings::default()
            }
            Err(e) => {
                return Err(SettingsError::IoError(format!("read {}: {}", self.config_path, e)))
            }
        };
        Ok(self.settings.clone())
    }

    fn save(&self) -> Result<(), SettingsError> {
        let path = Path::new(&self.config_path);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .map_err(|e| SettingsError::IoError(format!("create {}: {}", dir.display(), e)))?;
        }

        let json = serde_json::to_vec_pretty(&self.settings)
            .map_err(|e| SettingsError::SerializationError(e.to_string()))?;
        fs::write(path, json)
            .map_err(|e| SettingsError::IoError(format!("write {}: {}", self.config_path, e)))
    }

    fn get_settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Replaces one value addressed by a dot path such as
    /// `realtime.subscribe_timeout_ms` or `backend`, then persists.
    ///
    /// The key must already exist. The edited document has to deserialize
    /// back into [`SyncSettings`], so a value of the wrong shape is rejected
    /// and nothing changes.
    fn set_value(&mut self, key: &str, value: serde_json::Value) -> Result<(), SettingsError> {
        let (parent, leaf) = split_key(key)?;

        let mut doc = serde_json::to_value(&self.settings)
            .map_err(|e| SettingsError::SerializationError(e.to_string()))?;
        let slot = doc
            .pointer_mut(&parent)
            .and_then(serde_json::Value::as_object_mut)
            .and_then(|map| map.get_mut(leaf))
            .ok_or_else(|| SettingsError::InvalidKey(key.to_string()))?;
        *slot = value;

        let updated: SyncSettings = serde_json::from_value(doc)
            .map_err(|e| SettingsError::InvalidValue(format!("{}: {}", key, e)))?;
        self.commit(updated)
    }

    fn reset(&mut self) -> Result<(), SettingsError> {
        self.commit(SyncSettings::default())
    }

    fn get_config_path(&self) -> &str {
        &self.config_path
    }
}

impl SettingsEngine {
    fn commit(&mut self, settings: SyncSettings) -> Result<(), SettingsError> {
        self.settings = settings;
        self.save()?;
        debug!(path = %self.config_path, "settings saved");
        Ok(())
    }
}

/// Splits `a.b.c` into the JSON pointer of its parent (`/a/b`) and the leaf (`c`).
fn split_key(key: &str) -> Result<(String, &str), SettingsError> {
    if key.split('.').any(str::is_empty) {
        return Err(SettingsError::InvalidKey(format!("malformed key {:?}", key)));
    }
    let (parent, leaf) = match key.rsplit_once('.') {
        Some((parent, leaf)) => (parent, leaf),
        None => ("", key),
    };
    let pointer = parent
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|s| format!("/{}", s.replace('~', "~0").replace('/', "~1")))
        .collect();
    Ok((pointer, leaf))
}
