//! Bounded in-memory store.
//!
//! Used by tests and by `replay`, and as the query backend when nothing is
//! persisted. Oldest entries are evicted once a table is full.

use super::{latest_by, StoreError, TelemetryQuery, TelemetryStore};
use crate::monitor::alerts::{ConnectionAlert, Severity};
use crate::monitor::health::HealthRecord;
use crate::monitor::reading::SensorReading;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;

pub const DEFAULT_CAPACITY: usize = 100_000;

#[derive(Debug, Default)]
struct Tables {
    readings: VecDeque<SensorReading>,
    alerts: VecDeque<ConnectionAlert>,
    health: VecDeque<HealthRecord>,
}

#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    capacity: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Io("memory store lock poisoned".to_string()))
    }

    fn push<T>(table: &mut VecDeque<T>, item: T, capacity: usize) {
        if table.len() >= capacity {
            table.pop_front();
        }
        table.push_back(item);
    }

    pub fn reading_count(&self) -> usize {
        self.lock().map(|t| t.readings.len()).unwrap_or(0)
    }

    pub fn alert_count(&self) -> usize {
        self.lock().map(|t| t.alerts.len()).unwrap_or(0)
    }

    pub fn health_count(&self) -> usize {
        self.lock().map(|t| t.health.len()).unwrap_or(0)
    }

    /// Every stored alert, oldest first.
    pub fn all_alerts(&self) -> Vec<ConnectionAlert> {
        self.lock()
            .map(|t| t.alerts.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every stored reading, oldest first.
    pub fn all_readings(&self) -> Vec<SensorReading> {
        self.lock()
            .map(|t| t.readings.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryStore for MemoryStore {
    fn append_reading(&self, reading: &SensorReading) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        Self::push(&mut tables.readings, reading.clone(), self.capacity);
        Ok(())
    }

    fn append_alert(&self, alert: &ConnectionAlert) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        Self::push(&mut tables.alerts, alert.clone(), self.capacity);
        Ok(())
    }

    fn append_health(&self, records: &[HealthRecord]) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        for record in records {
            Self::push(&mut tables.health, record.clone(), self.capacity);
        }
        Ok(())
    }
}

impl TelemetryQuery for MemoryStore {
    fn latest_readings(&self) -> Result<Vec<SensorReading>, StoreError> {
        let tables = self.lock()?;
        Ok(latest_by(tables.readings.iter().cloned(), |r| {
            r.sensor_id.clone()
        }))
    }

    fn readings(
        &self,
        sensor_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<SensorReading>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .readings
            .iter()
            .filter(|r| r.sensor_id == sensor_id)
            .filter(|r| r.observed_at >= since && r.observed_at <= until)
            .cloned()
            .collect())
    }

    fn current_health(&self) -> Result<Vec<HealthRecord>, StoreError> {
        let tables = self.lock()?;
        Ok(latest_by(tables.health.iter().cloned(), |h| {
            h.sensor_id.clone()
        }))
    }

    fn alerts(
        &self,
        since: DateTime<Utc>,
        min_severity: Option<Severity>,
    ) -> Result<Vec<ConnectionAlert>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .alerts
            .iter()
            .filter(|a| a.timestamp >= since)
            .filter(|a| min_severity.map_or(true, |min| a.severity >= min))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::ParsedReading;
    use crate::monitor::alerts::AlertType;
    use crate::monitor::health::HealthStatus;
    use chrono::Duration;
    use uuid::Uuid;

    fn reading(sensor: &str, t: f64, at: DateTime<Utc>) -> SensorReading {
        let parsed = ParsedReading {
            temperature: t,
            humidity: 40.0,
            interval_seconds: 1,
        };
        SensorReading::new(sensor, &parsed, "raw", at)
    }

    #[test]
    fn test_latest_reading_per_sensor() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.append_reading(&reading("b", 1.0, now)).unwrap();
        store.append_reading(&reading("a", 2.0, now)).unwrap();
        store.append_reading(&reading("b", 3.0, now)).unwrap();

        let latest = store.latest_readings().unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].sensor_id, "a");
        assert_eq!(latest[1].temperature, 3.0);
    }

    #[test]
    fn test_readings_window() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for offset in 0..5 {
            store
                .append_reading(&reading("a", offset as f64, now + Duration::minutes(offset)))
                .unwrap();
        }
        let window = store
            .readings("a", now + Duration::minutes(1), now + Duration::minutes(3))
            .unwrap();
        assert_eq!(window.len(), 3);
        assert!(store.readings("b", now, now + Duration::hours(1)).unwrap().is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let store = MemoryStore::with_capacity(2);
        let now = Utc::now();
        for t in [1.0, 2.0, 3.0] {
            store.append_reading(&reading("a", t, now)).unwrap();
        }
        let all = store.all_readings();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].temperature, 2.0);
    }

    #[test]
    fn test_alert_and_health_queries() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for (severity, alert_type) in [
            (Severity::Warning, AlertType::DataStale),
            (Severity::Critical, AlertType::ConnectionLost),
        ] {
            store
                .append_alert(&ConnectionAlert {
                    id: Uuid::new_v4(),
                    sensor_id: "a".into(),
                    alert_type,
                    message: "m".into(),
                    severity,
                    timestamp: now,
                })
                .unwrap();
        }
        assert_eq!(store.alerts(now, None).unwrap().len(), 2);
        assert_eq!(store.alerts(now, Some(Severity::Critical)).unwrap().len(), 1);

        let record = |status| HealthRecord {
            sensor_id: "a".into(),
            status,
            data_freshness_seconds: 0.0,
            error_count: 0,
            timestamp: now,
        };
        store
            .append_health(&[record(HealthStatus::Online), record(HealthStatus::Degraded)])
            .unwrap();
        let current = store.current_health().unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].status, HealthStatus::Degraded);
    }
}
