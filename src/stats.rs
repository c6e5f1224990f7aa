//! date-range filtering and aggregate statistics over chart history.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::classify;
use crate::domain::{HistoryPoint, Status, ThresholdConfig};

/// points recorded within `[start, end]`; a missing bound is open
pub fn filter_by_date_range(
    points: &[HistoryPoint],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Vec<HistoryPoint> {
    points
        .iter()
        .filter(|p| start.map_or(true, |s| p.recorded_at >= s))
        .filter(|p| end.map_or(true, |e| p.recorded_at <= e))
        .cloned()
        .collect()
}

/// quick ranges offered by the history view
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangePreset {
    #[default]
    #[serde(rename = "all")]
    All,
    #[serde(rename = "24h")]
    Last24h,
    #[serde(rename = "7d")]
    Last7d,
    #[serde(rename = "30d")]
    Last30d,
    #[serde(rename = "90d")]
    Last90d,
    #[serde(rename = "custom")]
    Custom,
}

impl RangePreset {
    fn span(&self) -> Option<Duration> {
        match self {
            RangePreset::Last24h => Some(Duration::hours(24)),
            RangePreset::Last7d => Some(Duration::days(7)),
            RangePreset::Last30d => Some(Duration::days(30)),
            RangePreset::Last90d => Some(Duration::days(90)),
            RangePreset::All | RangePreset::Custom => None,
        }
    }

    /// bounds ending at `now`; `All` and `Custom` are unbounded here
    pub fn bounds(&self, now: DateTime<Utc>) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        match self.span() {
            Some(span) => (Some(now - span), Some(now)),
            None => (None, None),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RangePreset::All => "All available data",
            RangePreset::Last24h => "Last 24 hours",
            RangePreset::Last7d => "Last 7 days",
            RangePreset::Last30d => "Last 30 days",
            RangePreset::Last90d => "Last 90 days",
            RangePreset::Custom => "Custom range",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub count: usize,
    /// rounded to the nearest integer
    pub average: f64,
    pub max: f64,
    pub min: f64,
    pub safe_count: usize,
    pub warning_count: usize,
    pub danger_count: usize,
}

impl Statistics {
    /// share of readings in a tier, as a rounded percentage
    pub fn percentage(&self, status: Status) -> u32 {
        if self.count == 0 {
            return 0;
        }
        let n = match status {
            Status::Safe => self.safe_count,
            Status::Warning => self.warning_count,
            Status::Danger => self.danger_count,
            Status::Unknown => 0,
        };
        ((n as f64 / self.count as f64) * 100.0).round() as u32
    }
}

pub fn compute_statistics(points: &[HistoryPoint], thresholds: &ThresholdConfig) -> Statistics {
    if points.is_empty() {
        return Statistics::default();
    }

    let mut stats = Statistics {
        count: points.len(),
        max: f64::NEG_INFINITY,
        min: f64::INFINITY,
        ..Default::default()
    };
    let mut sum = 0.0;
    for p in points {
        sum += p.value;
        stats.max = stats.max.max(p.value);
        stats.min = stats.min.min(p.value);
        match classify(p.value, thresholds) {
            Status::Safe => stats.safe_count += 1,
            Status::Warning => stats.warning_count += 1,
            Status::Danger => stats.danger_count += 1,
            Status::Unknown => {}
        }
    }
    stats.average = (sum / points.len() as f64).round();
    stats
}
