//! JSON Lines store, one file per table in the data directory.

use super::{latest_by, StoreError, TelemetryQuery, TelemetryStore};
use crate::monitor::alerts::{ConnectionAlert, Severity};
use crate::monitor::health::HealthRecord;
use crate::monitor::reading::SensorReading;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

pub const READINGS_FILE: &str = "sensor_readings.jsonl";
pub const ALERTS_FILE: &str = "connection_alerts.jsonl";
pub const HEALTH_FILE: &str = "sensor_health_history.jsonl";

#[derive(Debug)]
pub struct JsonlStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    /// Open (and create if needed) a store in `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn append<T: Serialize>(&self, file: &str, rows: &[T]) -> Result<(), StoreError> {
        let mut buf = Vec::new();
        for row in rows {
            serde_json::to_writer(&mut buf, row)?;
            buf.push(b'\n');
        }

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Io("store write lock poisoned".to_string()))?;
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))?;
        out.write_all(&buf)?;
        Ok(())
    }

    /// Read every row of a table, skipping lines that do not parse.
    fn read_all<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>, StoreError> {
        let path = self.dir.join(file);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(std::fs::File::open(&path)?);
        let mut rows = Vec::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(row) => rows.push(row),
                Err(e) => warn!(file, line = number + 1, error = %e, "skipping malformed row"),
            }
        }
        Ok(rows)
    }
}

impl TelemetryStore for JsonlStore {
    fn append_reading(&self, reading: &SensorReading) -> Result<(), StoreError> {
        self.append(READINGS_FILE, std::slice::from_ref(reading))
    }

    fn append_alert(&self, alert: &ConnectionAlert) -> Result<(), StoreError> {
        self.append(ALERTS_FILE, std::slice::from_ref(alert))
    }

    fn append_health(&self, records: &[HealthRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        self.append(HEALTH_FILE, records)
    }
}

impl TelemetryQuery for JsonlStore {
    fn latest_readings(&self) -> Result<Vec<SensorReading>, StoreError> {
        let rows: Vec<SensorReading> = self.read_all(READINGS_FILE)?;
        Ok(latest_by(rows, |r| r.sensor_id.clone()))
    }

    fn readings(
        &self,
        sensor_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<SensorReading>, StoreError> {
        let rows: Vec<SensorReading> = self.read_all(READINGS_FILE)?;
        Ok(rows
            .into_iter()
            .filter(|r| r.sensor_id == sensor_id)
            .filter(|r| r.observed_at >= since && r.observed_at <= until)
            .collect())
    }

    fn current_health(&self) -> Result<Vec<HealthRecord>, StoreError> {
        let rows: Vec<HealthRecord> = self.read_all(HEALTH_FILE)?;
        Ok(latest_by(rows, |h| h.sensor_id.clone()))
    }

    fn alerts(
        &self,
        since: DateTime<Utc>,
        min_severity: Option<Severity>,
    ) -> Result<Vec<ConnectionAlert>, StoreError> {
        let rows: Vec<ConnectionAlert> = self.read_all(ALERTS_FILE)?;
        Ok(rows
            .into_iter()
            .filter(|a| a.timestamp >= since)
            .filter(|a| min_severity.map_or(true, |min| a.severity >= min))
            .collect())
    }
}
