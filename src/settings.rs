//! ==============================================================================
//! settings.rs - durable user settings
//! ==============================================================================
//!
//! purpose:
//!     owns the user's thresholds, notification policy and ui preferences.
//!     the store is the only writer; everyone else reads snapshots through
//!     the shared Arc<RwLock<SettingsStore>>.
//!
//! storage:
//!     a single json document at the configured path. on load each top-level
//!     key is decoded on its own over its defaults; missing or malformed keys
//!     fall back to the default for that key, and so do stored thresholds
//!     that fail validation. a missing or unreadable file means defaults.
//!     writes go through a temp file and a rename.
//!
//! merge rules:
//!     `save` is shallow: a patch that carries `thresholds` replaces the whole
//!     thresholds object. use `update_thresholds` to change one bound.
//!
//! ==============================================================================

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::domain::ThresholdConfig;

/// default cooldown the user sees in the settings panel (5 minutes)
pub const DEFAULT_USER_COOLDOWN_MS: u64 = 300_000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotificationSettings {
    pub enabled: bool,
    /// minimum time between two webhook alerts, in ms
    #[serde(alias = "cooldownMs")]
    pub cooldown: u64,
    pub sound: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self { enabled: true, cooldown: DEFAULT_USER_COOLDOWN_MS, sound: false }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiSettings {
    pub theme: String,
    pub language: String,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self { theme: "dark".to_string(), language: "id".to_string() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub thresholds: ThresholdConfig,
    pub notifications: NotificationSettings,
    pub ui: UiSettings,
}

impl Settings {
    /// decode a stored document, key by key over the defaults
    pub fn from_stored(raw: &Value) -> Self {
        let mut settings = Settings::default();
        let Some(map) = raw.as_object() else {
            tracing::warn!("stored settings are not an object, using defaults");
            return settings;
        };
        merge_key(map, "thresholds", &mut settings.thresholds);
        merge_key(map, "notifications", &mut settings.notifications);
        merge_key(map, "ui", &mut settings.ui);
        if let Err(e) = settings.thresholds.validate() {
            tracing::warn!("stored thresholds rejected ({:#}), using defaults", e);
            settings.thresholds = ThresholdConfig::default();
        }
        settings
    }
}

/// a save that would break the settings invariants; nothing was written
#[derive(Debug)]
pub struct InvalidSettings(pub String);

impl std::fmt::Display for InvalidSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rejected settings: {}", self.0)
    }
}

impl std::error::Error for InvalidSettings {}

fn merge_key<T: DeserializeOwned>(map: &Map<String, Value>, key: &str, slot: &mut T) {
    if let Some(raw) = map.get(key) {
        match T::deserialize(raw) {
            Ok(v) => *slot = v,
            Err(e) => {
                tracing::warn!("stored settings key '{}' is invalid ({}), using default", key, e)
            }
        }
    }
}

/// partial settings for `save`; each present key replaces the current one
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsPatch {
    pub thresholds: Option<ThresholdConfig>,
    pub notifications: Option<NotificationSettings>,
    pub ui: Option<UiSettings>,
}

impl SettingsPatch {
    pub fn apply_to(self, base: &Settings) -> Settings {
        Settings {
            thresholds: self.thresholds.unwrap_or(base.thresholds),
            notifications: self.notifications.unwrap_or_else(|| base.notifications.clone()),
            ui: self.ui.unwrap_or_else(|| base.ui.clone()),
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    current: Settings,
}

impl SettingsStore {
    /// open the store at `path`, loading whatever is there
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = load_from(&path);
        Self { path, current }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> &Settings {
        &self.current
    }

    /// read durable storage; never fails, falls back to defaults
    pub fn load(&self) -> Settings {
        load_from(&self.path)
    }

    /// re-read durable storage into the in-memory copy
    pub fn reload(&mut self) -> &Settings {
        self.current = self.load();
        &self.current
    }

    /// shallow-merge `patch`, validate, persist and return the result
    ///
    /// an invalid merge (e.g. safeMax >= warningMax) is rejected with an
    /// `InvalidSettings` error and nothing is written.
    pub fn save(&mut self, patch: SettingsPatch) -> Result<Settings> {
        let merged = patch.apply_to(&self.current);
        merged
            .thresholds
            .validate()
            .map_err(|e| InvalidSettings(format!("{:#}", e)))?;
        self.persist(&merged)?;
        self.current = merged.clone();
        tracing::info!(
            safe_max = merged.thresholds.safe_max,
            warning_max = merged.thresholds.warning_max,
            "settings saved"
        );
        Ok(merged)
    }

    pub fn update_thresholds(
        &mut self,
        safe_max: Option<f64>,
        warning_max: Option<f64>,
    ) -> Result<Settings> {
        let mut thresholds = self.current.thresholds;
        if let Some(v) = safe_max {
            thresholds.safe_max = v;
        }
        if let Some(v) = warning_max {
            thresholds.warning_max = v;
        }
        self.save(SettingsPatch { thresholds: Some(thresholds), ..Default::default() })
    }

    pub fn update_notifications(
        &mut self,
        enabled: Option<bool>,
        cooldown: Option<u64>,
        sound: Option<bool>,
    ) -> Result<Settings> {
        let mut notifications = self.current.notifications.clone();
        if let Some(v) = enabled {
            notifications.enabled = v;
        }
        if let Some(v) = cooldown {
            notifications.cooldown = v;
        }
        if let Some(v) = sound {
            notifications.sound = v;
        }
        self.save(SettingsPatch { notifications: Some(notifications), ..Default::default() })
    }

    /// overwrite durable storage with the built-in defaults
    pub fn reset_to_defaults(&mut self) -> Result<()> {
        let defaults = Settings::default();
        self.persist(&defaults)?;
        self.current = defaults;
        tracing::info!("settings reset to defaults");
        Ok(())
    }

    /// replace the file atomically through a sibling temp file
    fn persist(&self, settings: &Settings) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let json = serde_json::to_string_pretty(settings)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
        tmp.write_all(json.as_bytes())
            .with_context(|| format!("failed to write {}", tmp.path().display()))?;
        tmp.persist(&self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

fn load_from(path: &Path) -> Settings {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("no settings at {}, using defaults", path.display());
            return Settings::default();
        }
        Err(e) => {
            tracing::warn!("failed to read settings {}: {}", path.display(), e);
            return Settings::default();
        }
    };
    match serde_json::from_str::<Value>(&content) {
        Ok(raw) => Settings::from_stored(&raw),
        Err(e) => {
            tracing::warn!("malformed settings {}: {}", path.display(), e);
            Settings::default()
        }
    }
}

/// reload the store whenever its file changes on disk
///
/// returns the watcher; dropping it stops watching.
pub fn watch_settings_file(
    store: Arc<RwLock<SettingsStore>>,
) -> Result<notify::RecommendedWatcher> {
    use notify::{RecursiveMode, Watcher};

    let (path, dir) = {
        let guard = store.try_read().context("settings store busy during watch setup")?;
        let path = guard.path().to_path_buf();
        let dir = path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        (path, dir)
    };
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let file_name = path.file_name().map(|n| n.to_os_string());
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                let touches_file = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if touches_file {
                    let _ = tx.send(());
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("settings watcher error: {}", e),
        }
    })
    .context("failed to create settings watcher")?;
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", dir.display()))?;

    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            let mut guard = store.write().await;
            let before = guard.current().clone();
            if guard.reload() != &before {
                tracing::info!("[HOT RELOAD] settings reloaded from {}", guard.path().display());
            }
        }
    });

    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_in(dir: &tempfile::TempDir) -> SettingsStore {
        SettingsStore::open(dir.path().join("settings.json"))
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.current(), &Settings::default());
        assert_eq!(store.current().thresholds.safe_max, 300.0);
        assert_eq!(store.current().notifications.cooldown, 300_000);
    }

    #[test]
    fn save_then_fresh_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        let saved = store
            .save(SettingsPatch {
                thresholds: Some(ThresholdConfig { safe_max: 200.0, warning_max: 650.0 }),
                notifications: Some(NotificationSettings {
                    enabled: false,
                    cooldown: 60_000,
                    sound: true,
                }),
                ui: None,
            })
            .unwrap();

        let reopened = store_in(&dir);
        assert_eq!(reopened.current(), &saved);
        assert_eq!(reopened.load(), saved);
    }

    #[test]
    fn save_is_shallow_per_top_level_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store
            .save(SettingsPatch {
                ui: Some(UiSettings { theme: "light".into(), language: "en".into() }),
                ..Default::default()
            })
            .unwrap();
        let merged = store
            .save(SettingsPatch {
                thresholds: Some(ThresholdConfig { safe_max: 100.0, warning_max: 400.0 }),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(merged.ui.theme, "light");
        assert_eq!(merged.thresholds.warning_max, 400.0);
    }

    #[test]
    fn inverted_thresholds_are_rejected_and_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        let err = store.update_thresholds(Some(900.0), None);
        assert!(err.is_err());
        assert_eq!(store.current().thresholds, ThresholdConfig::default());
        assert!(!dir.path().join("settings.json").exists());
    }

    #[test]
    fn field_updates_keep_the_other_bound() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        let s = store.update_thresholds(None, Some(1000.0)).unwrap();
        assert_eq!(s.thresholds, ThresholdConfig { safe_max: 300.0, warning_max: 1000.0 });
        let s = store.update_notifications(Some(false), None, None).unwrap();
        assert!(!s.notifications.enabled);
        assert_eq!(s.notifications.cooldown, 300_000);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("settings.json"), "{not json").unwrap();
        assert_eq!(store_in(&dir).current(), &Settings::default());
    }

    #[test]
    fn stored_keys_override_defaults_key_by_key() {
        let raw = json!({
            "thresholds": {"safeMax": 150, "warningMax": 500},
            "notifications": "garbage",
            "extra": true,
        });
        let s = Settings::from_stored(&raw);
        assert_eq!(s.thresholds, ThresholdConfig { safe_max: 150.0, warning_max: 500.0 });
        assert_eq!(s.notifications, NotificationSettings::default());
        assert_eq!(s.ui, UiSettings::default());
    }

    #[test]
    fn reset_overwrites_storage() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.update_thresholds(Some(100.0), Some(200.0)).unwrap();
        store.reset_to_defaults().unwrap();
        assert_eq!(store.current(), &Settings::default());
        assert_eq!(store_in(&dir).current(), &Settings::default());
    }

    #[test]
    fn reload_picks_up_external_edits() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"thresholds": {"safeMax": 50, "warningMax": 75}}"#,
        )
        .unwrap();
        assert_eq!(store.reload().thresholds.safe_max, 50.0);
    }

    #[test]
    fn partial_stored_key_keeps_stored_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"notifications": {"enabled": false}}"#,
        )
        .unwrap();
        let store = store_in(&dir);
        assert!(!store.current().notifications.enabled);
        assert_eq!(store.current().notifications.cooldown, DEFAULT_USER_COOLDOWN_MS);
        assert!(!store.current().notifications.sound);
    }

    #[test]
    fn invalid_stored_thresholds_fall_back_on_open_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("settings.json");
        std::fs::write(&file, r#"{"thresholds": {"safeMax": 900, "warningMax": 100}}"#).unwrap();
        let mut store = store_in(&dir);
        assert_eq!(store.current().thresholds, ThresholdConfig::default());

        std::fs::write(
            &file,
            r#"{"thresholds": {"safeMax": -5, "warningMax": 100}, "ui": {"theme": "light"}}"#,
        )
        .unwrap();
        let reloaded = store.reload();
        assert_eq!(reloaded.thresholds, ThresholdConfig::default());
        assert!(reloaded.thresholds.validate().is_ok());
        assert_eq!(reloaded.ui.theme, "light");
    }

    #[test]
    fn rejected_save_is_typed() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        let err = store
            .save(SettingsPatch {
                thresholds: Some(ThresholdConfig { safe_max: 500.0, warning_max: 500.0 }),
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.is::<InvalidSettings>());
    }

    #[test]
    fn save_leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.update_notifications(Some(false), None, None).unwrap();
        store.update_thresholds(Some(250.0), None).unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("settings.json")]);
        assert!(!store_in(&dir).current().notifications.enabled);
    }

    #[test]
    fn stored_document_uses_camel_case_keys() {
        let json = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(json["notifications"]["cooldown"], 300_000);
        assert_eq!(json["thresholds"]["safeMax"], 300.0);
    }
}
