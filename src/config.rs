//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `monitor.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - FeedConfig: where readings come from (firebase or in-memory demo).
//!     - HistoryConfig: how many chart points to keep.
//!     - NotificationsConfig: webhook target and local timezone for alerts.
//!     - SettingsConfig: where user settings live and whether to watch them.
//!     - ServerConfig / LoggingConfig: api bind address and log level.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MonitorConfig {
    pub feed: FeedConfig,
    pub history: HistoryConfig,
    pub notifications: NotificationsConfig,
    pub settings: SettingsConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedBackend {
    #[default]
    Firebase,
    /// in-process feed with a simulated sensor
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedConfig {
    pub backend: FeedBackend,
    pub database_url: String,
    pub sensor_path: String,
    pub registry_path: String,
    pub auth_token: Option<String>,
    pub reconnect_delay_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            backend: FeedBackend::Firebase,
            database_url: "https://iot-4eeae-default-rtdb.firebaseio.com".to_string(),
            sensor_path: "sensor_gas".to_string(),
            registry_path: "sensors".to_string(),
            auth_token: None,
            reconnect_delay_ms: 3_000,
        }
    }
}

impl FeedConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { capacity: crate::history::DEFAULT_CAPACITY }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotificationsConfig {
    /// alerts are only posted when this is set
    pub webhook_url: Option<String>,
    pub utc_offset_hours: i32,
    pub timeout_ms: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            utc_offset_hours: 7, // Asia/Jakarta
            timeout_ms: 10_000,
        }
    }
}

impl NotificationsConfig {
    pub fn offset(&self) -> FixedOffset {
        self.utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SettingsConfig {
    pub path: PathBuf,
    pub watch: bool,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data").join("gas_sensor_settings.json"),
            watch: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

impl MonitorConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: MonitorConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Load with default fallback
    ///
    /// runs before logging is up, so it reports on stdout like the banner.
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("monitor.toml"),
            PathBuf::from("..").join("config").join("monitor.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let backend = match self.feed.backend {
            FeedBackend::Firebase => "firebase",
            FeedBackend::Memory => "memory (simulated)",
        };
        println!("┌─────────────────────────────────────────┐");
        println!("│         GAS MONITOR CONFIGURATION       │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Feed: {}", backend);
        println!("│ Sensor Path: {}", self.feed.sensor_path);
        println!("│ Registry Path: {}", self.feed.registry_path);
        println!("│ History Points: {}", self.history.capacity);
        println!(
            "│ Webhook: {}",
            if self.notifications.webhook_url.is_some() { "configured" } else { "disabled" }
        );
        println!("│ Settings File: {}", self.settings.path.display());
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config: MonitorConfig = toml::from_str("").unwrap();
        assert_eq!(config.feed.backend, FeedBackend::Firebase);
        assert_eq!(config.feed.sensor_path, "sensor_gas");
        assert_eq!(config.history.capacity, 20);
        assert_eq!(config.notifications.offset().local_minus_utc(), 7 * 3600);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: MonitorConfig = toml::from_str(
            r#"
            [feed]
            backend = "memory"

            [notifications]
            webhook_url = "http://localhost:5678/webhook/iot_notif"
            utc_offset_hours = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.feed.backend, FeedBackend::Memory);
        assert_eq!(config.feed.registry_path, "sensors");
        assert_eq!(config.feed.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(config.notifications.offset().local_minus_utc(), 0);
        assert_eq!(config.notifications.timeout_ms, 10_000);
    }

    #[test]
    fn out_of_range_offset_falls_back_to_utc() {
        let n = NotificationsConfig { utc_offset_hours: 99, ..Default::default() };
        assert_eq!(n.offset().local_minus_utc(), 0);
    }
}
