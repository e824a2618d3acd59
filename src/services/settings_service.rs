use crate::models::settings::Settings;
use anyhow::{Context, Result};
use log::{debug, error};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "DropsMiner";
const SETTINGS_FILE: &str = "config.json";

/// Get the app data directory (works consistently in dev and release)
pub fn get_app_data_dir() -> Result<PathBuf> {
    // Try to use the standard config directory first
    if let Some(config_dir) = dirs::config_dir() {
        let app_dir = config_dir.join(APP_DIR_NAME);
        debug!("[SETTINGS] Using config directory: {:?}", app_dir);
        return Ok(app_dir);
    }

    if let Some(data_dir) = dirs::data_dir() {
        let app_dir = data_dir.join(APP_DIR_NAME);
        debug!("[SETTINGS] Fallback to data directory: {:?}", app_dir);
        return Ok(app_dir);
    }

    // Last resort: next to the executable (portable install)
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let app_dir = exe_dir.join("data");
            debug!("[SETTINGS] Fallback to exe directory: {:?}", app_dir);
            return Ok(app_dir);
        }
    }

    Err(anyhow::anyhow!("Could not determine app data directory"))
}

/// Reads and writes `Settings` (including the watch queue) as JSON.
#[derive(Clone, Debug)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_app_dir() -> Result<Self> {
        Ok(Self::new(get_app_data_dir()?.join(SETTINGS_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file gives defaults; an unreadable one is logged and replaced by defaults.
    pub fn load(&self) -> Settings {
        if !self.path.exists() {
            return Settings::default();
        }
        match self.read() {
            Ok(settings) => settings,
            Err(e) => {
                error!("[SETTINGS] ⚠️ Failed to load {:?}: {:?}", self.path, e);
                Settings::default()
            }
        }
    }

    fn read(&self) -> Result<Settings> {
        let json = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {:?}", self.path))?;
        let settings = serde_json::from_str(&json).context("Failed to parse settings")?;
        Ok(settings)
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create settings directory")?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, json).with_context(|| format!("Failed to write {:?}", self.path))?;
        debug!("[SETTINGS] ✅ Saved {} queue items", settings.items.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::queue::QueueEntry;

    #[test]
    fn test_round_trip_keeps_queue_progress() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("nested").join("config.json"));

        let mut settings = Settings::default();
        let mut entry = QueueEntry::new("https://kick.com/a", 120)
            .with_campaign("camp-1", vec!["https://kick.com/b".to_string()]);
        entry.tried_channels.push("https://kick.com/a".to_string());
        entry.cumulative_seconds = 900;
        settings.items.push(entry);
        settings.mini_player = true;
        store.save(&settings).unwrap();

        let loaded = store.load();
        assert!(loaded.mini_player);
        assert_eq!(loaded.items, settings.items);
    }

    #[test]
    fn test_missing_or_corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("config.json"));
        assert!(store.load().items.is_empty());

        fs::write(store.path(), "{ not json").unwrap();
        let settings = store.load();
        assert!(settings.mute);
        assert!(settings.items.is_empty());
    }

    #[test]
    fn test_partial_timings_keep_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("config.json"));
        fs::write(
            store.path(),
            r#"{"items":[{"url":"https://kick.com/a","minutes":30}],"timings":{"switch_settle_secs":5}}"#,
        )
        .unwrap();

        let settings = store.load();
        assert_eq!(settings.items.len(), 1);
        assert_eq!(settings.items[0].channel_url, "https://kick.com/a");
        assert_eq!(settings.timings.switch_settle_secs, 5);
        assert_eq!(settings.timings.retry_monitor_secs, 30);
        assert_eq!(settings.timings.initial_load_wait_secs, 5);
    }
}
