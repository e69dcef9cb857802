use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::settings::types::PreviewSettings;

/// Settings persistence errors.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Preview settings backed by a JSON file.
pub struct SettingsStore {
    path: PathBuf,
    data: Mutex<PreviewSettings>,
}

impl SettingsStore {
    /// Open the store at `path`, loading the file if it exists.
    pub fn open(path: PathBuf) -> Result<Self> {
        let data = Self::load(&path)?;
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Load and validate settings from a JSON file, returning defaults when
    /// the file is missing.
    pub fn load(path: &Path) -> Result<PreviewSettings> {
        if !path.exists() {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(PreviewSettings::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let settings: PreviewSettings = serde_json::from_str(&contents)?;
        if let Some(problem) = settings.problem() {
            return Err(SettingsError::Invalid(problem));
        }
        info!(path = %path.display(), "loaded preview settings");
        Ok(settings)
    }

    /// Save current settings to disk atomically (write .tmp then rename).
    pub fn save(&self) -> Result<()> {
        let data = self.data.lock().clone();
        let json = serde_json::to_string_pretty(&data)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json)?;
        std::fs::rename(&tmp_path, &self.path)?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current settings.
    pub fn get(&self) -> PreviewSettings {
        self.data.lock().clone()
    }

    /// Apply `change` and keep the result only if it is still usable.
    pub fn update(&self, change: impl FnOnce(&mut PreviewSettings)) -> Result<()> {
        let mut data = self.data.lock();
        let mut updated = data.clone();
        change(&mut updated);
        if let Some(problem) = updated.problem() {
            return Err(SettingsError::Invalid(problem));
        }
        *data = updated;
        Ok(())
    }

    /// Restore defaults.
    pub fn reset(&self) {
        *self.data.lock() = PreviewSettings::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::types::SessionPreset;
    use crate::settings::types::Renderer;
    use tempfile::TempDir;

    /// Helper: create a store backed by a temp directory.
    fn temp_store() -> (SettingsStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("glcam-preview.json");
        let store = SettingsStore::open(path).unwrap();
        (store, dir)
    }

    #[test]
    fn load_returns_default_when_file_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nonexistent.json");
        let result = SettingsStore::load(&path).unwrap();
        assert_eq!(result, PreviewSettings::default());
    }

    #[test]
    fn load_parses_valid_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("glcam-preview.json");
        let json = r#"{"preset":"hd1280x720","renderer":"software","displayScale":3.0}"#;
        std::fs::write(&path, json).unwrap();

        let result = SettingsStore::load(&path).unwrap();
        assert_eq!(result.preset, SessionPreset::Hd1280x720);
        assert_eq!(result.renderer, Renderer::Software);
        assert_eq!(result.display_scale, 3.0);
    }

    #[test]
    fn load_returns_error_for_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("glcam-preview.json");
        std::fs::write(&path, "not valid json!!!").unwrap();

        let result = SettingsStore::load(&path);
        assert!(matches!(result, Err(SettingsError::Parse(_))));
    }

    #[test]
    fn load_rejects_unusable_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("glcam-preview.json");
        std::fs::write(&path, r#"{"poolSize":0}"#).unwrap();

        let result = SettingsStore::load(&path);
        assert!(matches!(result, Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn save_round_trips_through_load() {
        let (store, dir) = temp_store();
        store
            .update(|s| {
                s.preset = SessionPreset::Vga640x480;
                s.run_seconds = Some(3);
            })
            .unwrap();
        store.save().unwrap();

        let loaded = SettingsStore::load(&dir.path().join("glcam-preview.json")).unwrap();
        assert_eq!(loaded.preset, SessionPreset::Vga640x480);
        assert_eq!(loaded.run_seconds, Some(3));
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deep").join("glcam-preview.json");
        let store = SettingsStore::open(path.clone()).unwrap();
        store.save().unwrap();

        assert!(path.exists());
    }

    #[test]
    fn save_is_atomic() {
        let (store, dir) = temp_store();
        store.save().unwrap();

        // After a successful save, no .tmp file should remain
        let tmp_path = dir.path().join("glcam-preview.json.tmp");
        assert!(
            !tmp_path.exists(),
            ".tmp file should be cleaned up after rename"
        );
    }

    #[test]
    fn update_rejects_invalid_change() {
        let (store, _dir) = temp_store();
        let result = store.update(|s| s.display_scale = -1.0);
        assert!(matches!(result, Err(SettingsError::Invalid(_))));
        assert_eq!(store.get().display_scale, 2.0);
    }

    #[test]
    fn reset_restores_defaults() {
        let (store, _dir) = temp_store();
        store.update(|s| s.pool_size = 8).unwrap();
        store.reset();
        assert_eq!(store.get(), PreviewSettings::default());
    }
}
