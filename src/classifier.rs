//! threshold classifier: maps a ppm value onto a safety tier.

use crate::domain::{Status, ThresholdConfig};

/// classify a reading against the given tier boundaries
///
/// `value < safe_max` is safe, `value < warning_max` is warning, anything
/// else is danger. negative values land in safe. never returns `Unknown`;
/// that tier belongs to callers with no reading yet.
pub fn classify(value: f64, thresholds: &ThresholdConfig) -> Status {
    if value < thresholds.safe_max {
        Status::Safe
    } else if value < thresholds.warning_max {
        Status::Warning
    } else {
        Status::Danger
    }
}

/// classify an optional value, reporting `Unknown` when there is none
pub fn classify_latest(value: Option<f64>, thresholds: &ThresholdConfig) -> Status {
    value.map_or(Status::Unknown, |v| classify(v, thresholds))
}
