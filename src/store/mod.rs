//! Durable telemetry: readings, alerts and health history.
//!
//! The monitor writes through [`TelemetryStore`] and never reads back; the
//! CLI and the query API read through [`TelemetryQuery`].

pub mod jsonl;
pub mod memory;

use crate::monitor::alerts::{ConnectionAlert, Severity};
use crate::monitor::health::HealthRecord;
use crate::monitor::reading::SensorReading;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

/// Append-only sink for telemetry.
pub trait TelemetryStore: Send + Sync {
    fn append_reading(&self, reading: &SensorReading) -> Result<(), StoreError>;
    fn append_alert(&self, alert: &ConnectionAlert) -> Result<(), StoreError>;
    fn append_health(&self, records: &[HealthRecord]) -> Result<(), StoreError>;
}

/// Read access to stored telemetry.
pub trait TelemetryQuery: Send + Sync {
    /// Most recent reading of every sensor, ordered by sensor id.
    fn latest_readings(&self) -> Result<Vec<SensorReading>, StoreError>;

    /// Readings of one sensor observed in `[since, until]`, oldest first.
    fn readings(
        &self,
        sensor_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<SensorReading>, StoreError>;

    /// Latest health record of every sensor, ordered by sensor id.
    fn current_health(&self) -> Result<Vec<HealthRecord>, StoreError>;

    /// Alerts at or after `since`, at or above `min_severity`, oldest first.
    fn alerts(
        &self,
        since: DateTime<Utc>,
        min_severity: Option<Severity>,
    ) -> Result<Vec<ConnectionAlert>, StoreError>;
}

pub type SharedStore = Arc<dyn TelemetryStore>;

/// Store errors.
#[derive(Debug)]
pub enum StoreError {
    Io(String),
    Serialization(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "Store IO error: {e}"),
            StoreError::Serialization(e) => write!(f, "Store serialization error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Start of a lookback window of `hours` ending at `now`. `None` when
/// `hours` is not positive or the window reaches past representable time.
pub fn window_start(now: DateTime<Utc>, hours: i64) -> Option<DateTime<Utc>> {
    if hours <= 0 {
        return None;
    }
    Duration::try_hours(hours).and_then(|span| now.checked_sub_signed(span))
}

/// Keep the last entry per key, ordered by key.
pub(crate) fn latest_by<T, K, F>(items: impl IntoIterator<Item = T>, key: F) -> Vec<T>
where
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut latest = std::collections::BTreeMap::new();
    for item in items {
        latest.insert(key(&item), item);
    }
    latest.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_start() {
        let now = Utc::now();
        assert_eq!(window_start(now, 2), Some(now - Duration::hours(2)));
        assert_eq!(window_start(now, 0), None);
        assert_eq!(window_start(now, -3), None);
        assert_eq!(window_start(now, 9_223_372_036_854_775), None);
        assert_eq!(window_start(now, i64::MAX), None);
    }

    #[test]
    fn test_latest_by_keeps_last_per_key() {
        let latest = latest_by(vec![("b", 1), ("a", 2), ("b", 3)], |(k, _)| *k);
        assert_eq!(latest, vec![("a", 2), ("b", 3)]);
    }
}
