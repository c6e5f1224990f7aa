//! ==============================================================================
//! domain.rs - shared gas monitor types
//! ==============================================================================
//!
//! purpose:
//!     the normalized types every other module speaks. raw feed payloads are
//!     decoded into these at the boundary (subscriber.rs) so the pipeline
//!     never sees the wire shape.
//!
//! relationships:
//!     - produced by: subscriber.rs (Reading, SensorRegistry)
//!     - consumed by: classifier.rs, history.rs, notifier.rs, stats.rs, server.rs
//!
//! ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// default upper bound (exclusive) of the safe tier, in ppm
pub const DEFAULT_SAFE_MAX: f64 = 300.0;
/// default upper bound (exclusive) of the warning tier, in ppm
pub const DEFAULT_WARNING_MAX: f64 = 800.0;

/// a single normalized gas reading
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    /// gas concentration in ppm
    pub value: f64,
    pub smoke_detected: bool,
    /// arrival time at this host
    pub timestamp: DateTime<Utc>,
}

/// safety tier derived from a reading and the active thresholds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Safe,
    Warning,
    Danger,
    #[default]
    Unknown,
}

impl Status {
    /// lowercase wire name, as sent to the webhook
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Safe => "safe",
            Status::Warning => "warning",
            Status::Danger => "danger",
            Status::Unknown => "unknown",
        }
    }

    /// human-readable label for dashboards and reports
    pub fn label(&self) -> &'static str {
        match self {
            Status::Safe => "SAFE",
            Status::Warning => "WARNING",
            Status::Danger => "DANGER",
            Status::Unknown => "UNKNOWN",
        }
    }

    /// whether the dashboard should raise its alert banner
    pub fn is_alerting(&self) -> bool {
        matches!(self, Status::Warning | Status::Danger)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// tier boundaries; expected to satisfy `0 < safe_max < warning_max`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdConfig {
    pub safe_max: f64,
    pub warning_max: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            safe_max: DEFAULT_SAFE_MAX,
            warning_max: DEFAULT_WARNING_MAX,
        }
    }
}

impl ThresholdConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.safe_max.is_finite() || !self.warning_max.is_finite() {
            anyhow::bail!("thresholds must be finite numbers");
        }
        if self.safe_max <= 0.0 {
            anyhow::bail!("safeMax must be greater than 0 (got {})", self.safe_max);
        }
        if self.safe_max >= self.warning_max {
            anyhow::bail!(
                "safeMax ({}) must be lower than warningMax ({})",
                self.safe_max,
                self.warning_max
            );
        }
        Ok(())
    }
}

/// one point of the rolling chart history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPoint {
    /// chart label, local wall clock "HH.MM.SS"
    pub time: String,
    pub value: f64,
    #[serde(default)]
    pub smoke: bool,
    pub recorded_at: DateTime<Utc>,
}

/// connection state of a feed session
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub connected: bool,
    /// cause of the most recent feed error, cleared by the next snapshot
    pub error: Option<String>,
}

// ==============================================================================
// multi-sensor registry
// ==============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorInfo {
    pub name: String,
    pub location: String,
    pub status: String,
}

impl Default for SensorInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            location: String::new(),
            status: "active".to_string(),
        }
    }
}

/// latest values a sensor node published about itself
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SensorCurrent {
    pub gas: Option<f64>,
    /// firmware sends 0/1 or a boolean; kept as-is
    pub smoke: Option<serde_json::Value>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub last_update: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorEntry {
    pub id: String,
    pub info: SensorInfo,
    pub current: Option<SensorCurrent>,
}

impl SensorEntry {
    /// the entry used when the registry node is absent
    pub fn default_main() -> Self {
        Self {
            id: "main".to_string(),
            info: SensorInfo {
                name: "Gas Sensor - Main".to_string(),
                location: "Default Location".to_string(),
                status: "active".to_string(),
            },
            current: None,
        }
    }
}

/// sensors in the order the backing store delivered them
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorRegistry {
    pub sensors: Vec<SensorEntry>,
}

impl SensorRegistry {
    pub fn with_default_sensor() -> Self {
        Self {
            sensors: vec![SensorEntry::default_main()],
        }
    }

    pub fn get(&self, id: &str) -> Option<&SensorEntry> {
        self.sensors.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn first_id(&self) -> Option<&str> {
        self.sensors.first().map(|s| s.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}
