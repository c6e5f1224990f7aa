//! ==============================================================================
//! report.rs - export report assembly
//! ==============================================================================
//!
//! purpose:
//!     everything the csv / spreadsheet / pdf exporters need in one value:
//!     dated file name, sensor info, statistics and one row per reading.
//!     byte-level formatting stays with those exporters.
//!
//! ==============================================================================

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::classify;
use crate::domain::{HistoryPoint, SensorInfo, Status, ThresholdConfig};
use crate::stats::{compute_statistics, Statistics};

pub const DEFAULT_REPORT_NAME: &str = "gas_sensor_data";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRow {
    pub time: String,
    pub value: f64,
    pub status: Status,
    pub smoke: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// base name plus the local date, without extension
    pub filename: String,
    pub generated_at: DateTime<Utc>,
    pub sensor: Option<SensorInfo>,
    pub statistics: Statistics,
    pub rows: Vec<ExportRow>,
}

pub fn build_report(
    points: &[HistoryPoint],
    thresholds: &ThresholdConfig,
    sensor: Option<SensorInfo>,
    base_name: Option<&str>,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Report {
    let base = base_name
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .unwrap_or(DEFAULT_REPORT_NAME);
    let date = now.with_timezone(&offset).format("%Y-%m-%d");

    let rows = points
        .iter()
        .map(|p| ExportRow {
            time: p.time.clone(),
            value: p.value,
            status: classify(p.value, thresholds),
            smoke: p.smoke,
        })
        .collect();

    Report {
        filename: format!("{}_{}", base, date),
        generated_at: now,
        sensor,
        statistics: compute_statistics(points, thresholds),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rows_carry_derived_status() {
        let at = Utc.with_ymd_and_hms(2025, 1, 31, 20, 0, 0).unwrap();
        let points = vec![
            HistoryPoint { time: "03.00.00".into(), value: 120.0, smoke: false, recorded_at: at },
            HistoryPoint { time: "03.00.02".into(), value: 950.0, smoke: true, recorded_at: at },
        ];
        let jakarta = FixedOffset::east_opt(7 * 3600).unwrap();
        let report = build_report(&points, &ThresholdConfig::default(), None, None, at, jakarta);

        assert_eq!(report.filename, "gas_sensor_data_2025-02-01");
        assert_eq!(report.rows[0].status, Status::Safe);
        assert_eq!(report.rows[1].status, Status::Danger);
        assert!(report.rows[1].smoke);
        assert_eq!(report.statistics.count, 2);
    }

    #[test]
    fn blank_names_use_default() {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let utc = FixedOffset::east_opt(0).unwrap();
        let sensor = SensorInfo { name: "Kitchen".into(), ..Default::default() };
        let thresholds = ThresholdConfig::default();
        let report = build_report(&[], &thresholds, Some(sensor), Some("  "), at, utc);
        assert_eq!(report.filename, "gas_sensor_data_2025-06-01");
        assert_eq!(report.sensor.unwrap().name, "Kitchen");
        assert!(report.rows.is_empty());
    }
}
