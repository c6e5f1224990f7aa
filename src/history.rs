//! ==============================================================================
//! history.rs - rolling chart history
//! ==============================================================================
//!
//! purpose:
//!     fixed-capacity, fifo-evicted sequence of recent readings. this is what
//!     the dashboard chart, the statistics cards and the exports read.
//!     never persisted; a new buffer starts empty with each monitor.
//!
//! ==============================================================================

use std::collections::VecDeque;

use chrono::{DateTime, FixedOffset, Offset, Utc};

use crate::domain::{HistoryPoint, Reading};

/// default number of chart points kept
pub const DEFAULT_CAPACITY: usize = 20;

/// chart label for a timestamp, as wall clock time at `offset`
pub fn format_chart_time(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset).format("%H.%M.%S").to_string()
}

#[derive(Clone, Debug)]
pub struct HistoryBuffer {
    points: VecDeque<HistoryPoint>,
    capacity: usize,
    offset: FixedOffset,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl HistoryBuffer {
    /// create an empty buffer; a capacity of 0 is treated as 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
            offset: Utc.fix(),
        }
    }

    /// label chart points with wall clock time at this offset
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// append a point, dropping the oldest ones past capacity
    pub fn append(&mut self, point: HistoryPoint) {
        self.points.push_back(point);
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
    }

    pub fn append_reading(&mut self, reading: &Reading) {
        self.append(HistoryPoint {
            time: format_chart_time(reading.timestamp, self.offset),
            value: reading.value,
            smoke: reading.smoke_detected,
            recorded_at: reading.timestamp,
        });
    }

    /// append a possibly-missing value from a partial payload
    ///
    /// returns whether a point was appended.
    pub fn append_value(&mut self, value: Option<f64>, at: DateTime<Utc>) -> bool {
        match value {
            Some(v) if v.is_finite() => {
                self.append(HistoryPoint {
                    time: format_chart_time(at, self.offset),
                    value: v,
                    smoke: false,
                    recorded_at: at,
                });
                true
            }
            _ => false,
        }
    }

    /// oldest to newest; stable until the next append
    pub fn iter(&self) -> impl Iterator<Item = &HistoryPoint> + '_ {
        self.points.iter()
    }

    pub fn snapshot(&self) -> Vec<HistoryPoint> {
        self.points.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&HistoryPoint> {
        self.points.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn reading(value: f64, secs: i64) -> Reading {
        Reading { value, smoke_detected: false, timestamp: at(secs) }
    }

    #[test]
    fn keeps_last_capacity_items_in_order() {
        let mut buf = HistoryBuffer::new(20);
        for i in 0..57 {
            buf.append_reading(&reading(i as f64, i));
        }
        assert_eq!(buf.len(), 20);
        let values: Vec<f64> = buf.iter().map(|p| p.value).collect();
        let expected: Vec<f64> = (37..57).map(|i| i as f64).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn duplicates_are_retained() {
        let mut buf = HistoryBuffer::default();
        for i in 0..3 {
            buf.append_reading(&reading(420.0, i));
        }
        assert_eq!(buf.len(), 3);
        assert!(buf.iter().all(|p| p.value == 420.0));
    }

    #[test]
    fn missing_values_are_skipped() {
        let mut buf = HistoryBuffer::default();
        assert!(!buf.append_value(None, at(0)));
        assert!(!buf.append_value(Some(f64::NAN), at(0)));
        assert!(buf.append_value(Some(12.0), at(0)));
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn reads_are_repeatable_until_next_append() {
        let mut buf = HistoryBuffer::new(3);
        buf.append_reading(&reading(1.0, 1));
        buf.append_reading(&reading(2.0, 2));
        assert_eq!(buf.snapshot(), buf.snapshot());
        let before = buf.snapshot();
        buf.append_reading(&reading(3.0, 3));
        assert_ne!(before, buf.snapshot());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut buf = HistoryBuffer::new(0);
        buf.append_reading(&reading(1.0, 1));
        buf.append_reading(&reading(2.0, 2));
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.latest().unwrap().value, 2.0);
    }

    #[test]
    fn chart_labels_use_offset() {
        let jakarta = FixedOffset::east_opt(7 * 3600).unwrap();
        let mut buf = HistoryBuffer::new(5).with_offset(jakarta);
        buf.append_reading(&reading(1.0, 0));
        assert_eq!(buf.latest().unwrap().time, "07.00.00");
    }
}
