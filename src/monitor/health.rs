//! Per-sensor connection health.
//!
//! A sensor moves `Unknown -> Online -> Degraded -> Offline` as it goes quiet
//! and back to `Online` on any new line. Repeated failures put it in `Error`
//! until the next clean reading. Status only depends on the evidence seen and
//! the `now` passed in, so the same history always yields the same status.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Connection status of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Nothing heard yet
    #[default]
    Unknown,
    /// Heard from within the timeout
    Online,
    /// Silent for longer than the timeout
    Degraded,
    /// Silent for longer than twice the timeout
    Offline,
    /// Too many failures attributed to the sensor
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Online => "online",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Offline => "offline",
            HealthStatus::Error => "error",
        }
    }

    /// Whether the sensor is currently transmitting.
    pub fn is_connected(&self) -> bool {
        matches!(self, HealthStatus::Online | HealthStatus::Degraded)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of line proved the sensor alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evidence {
    Reading,
    Banner,
    Unknown,
}

/// Health record of one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorHealth {
    pub sensor_id: String,
    pub status: HealthStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub connection_uptime_seconds: f64,
    pub data_freshness_seconds: f64,
    pub error_count: u32,
    pub last_error: Option<String>,
    /// When the current connection started
    pub online_since: Option<DateTime<Utc>>,
    /// When the monitor first learned about this sensor
    pub registered_at: DateTime<Utc>,
}

impl SensorHealth {
    pub fn new(sensor_id: impl Into<String>, registered_at: DateTime<Utc>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            status: HealthStatus::Unknown,
            last_seen: None,
            connection_uptime_seconds: 0.0,
            data_freshness_seconds: 0.0,
            error_count: 0,
            last_error: None,
            online_since: None,
            registered_at,
        }
    }

    /// The persisted form of this record at `timestamp`.
    pub fn to_record(&self, timestamp: DateTime<Utc>) -> HealthRecord {
        HealthRecord {
            sensor_id: self.sensor_id.clone(),
            status: self.status,
            data_freshness_seconds: self.data_freshness_seconds,
            error_count: self.error_count,
            timestamp,
        }
    }
}

/// Row of the health history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub sensor_id: String,
    pub status: HealthStatus,
    pub data_freshness_seconds: f64,
    pub error_count: u32,
    pub timestamp: DateTime<Utc>,
}

/// A status change of one sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub sensor_id: String,
    pub from: HealthStatus,
    pub to: HealthStatus,
    pub at: DateTime<Utc>,
}

/// Thresholds driving the state machine.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub sensor_timeout: Duration,
    pub no_data_grace: Duration,
    pub error_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            sensor_timeout: Duration::seconds(30),
            no_data_grace: Duration::seconds(60),
            error_threshold: 5,
        }
    }
}

impl HealthConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            sensor_timeout: to_chrono(config.sensor_timeout),
            no_data_grace: to_chrono(config.no_data_grace),
            error_threshold: config.error_threshold,
        }
    }
}

pub(crate) fn to_chrono(duration: std::time::Duration) -> Duration {
    let clamped = duration.min(crate::config::MAX_DURATION);
    Duration::milliseconds(i64::try_from(clamped.as_millis()).unwrap_or(i64::MAX))
}

fn seconds(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}

/// Status implied by silence alone.
///
/// Only connected sensors age: `Unknown`, `Offline` and `Error` are left for
/// evidence and errors to change.
pub fn evaluate(
    status: HealthStatus,
    last_seen: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    timeout: Duration,
) -> HealthStatus {
    if !status.is_connected() {
        return status;
    }
    let Some(last_seen) = last_seen else {
        return status;
    };

    let silence = now - last_seen;
    if silence > timeout * 2 {
        HealthStatus::Offline
    } else if silence > timeout {
        HealthStatus::Degraded
    } else {
        HealthStatus::Online
    }
}

/// Owner of every sensor's health record.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    config: HealthConfig,
    sensors: BTreeMap<String, SensorHealth>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            sensors: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Start tracking a sensor that has not been heard from yet.
    pub fn register(&mut self, sensor_id: &str, at: DateTime<Utc>) {
        self.sensors
            .entry(sensor_id.to_string())
            .or_insert_with(|| SensorHealth::new(sensor_id, at));
    }

    /// Record a line attributed to `sensor_id`.
    pub fn record_evidence(
        &mut self,
        sensor_id: &str,
        evidence: Evidence,
        at: DateTime<Utc>,
    ) -> Option<Transition> {
        let mut record = self.current(sensor_id, at);
        let from = record.status;

        if record.last_seen.map_or(true, |seen| at > seen) {
            record.last_seen = Some(at);
        }

        match from {
            HealthStatus::Error if evidence == Evidence::Reading => {
                record.status = HealthStatus::Online;
                record.error_count = 0;
                record.last_error = None;
                record.online_since = Some(at);
            }
            HealthStatus::Error => {}
            HealthStatus::Online => {}
            HealthStatus::Degraded => {
                record.status = HealthStatus::Online;
                record.online_since.get_or_insert(at);
            }
            HealthStatus::Unknown | HealthStatus::Offline => {
                record.status = HealthStatus::Online;
                record.online_since = Some(at);
            }
        }
        refresh(&mut record, at);

        self.replace(record, from, at)
    }

    /// Record a failure attributed to `sensor_id`.
    pub fn record_error(
        &mut self,
        sensor_id: &str,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Option<Transition> {
        let mut record = self.current(sensor_id, at);
        let from = record.status;

        record.error_count = record.error_count.saturating_add(1);
        record.last_error = Some(message.into());
        if record.error_count > self.config.error_threshold {
            record.status = HealthStatus::Error;
            record.online_since = None;
        }

        self.replace(record, from, at)
    }

    /// Re-evaluate every sensor at `now`, returning the transitions.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Transition> {
        let ids: Vec<String> = self.sensors.keys().cloned().collect();
        let mut transitions = Vec::new();

        for id in ids {
            let Some(mut record) = self.sensors.get(&id).cloned() else {
                continue;
            };
            let from = record.status;

            record.status = evaluate(from, record.last_seen, now, self.config.sensor_timeout);
            if from == HealthStatus::Unknown
                && record.last_seen.is_none()
                && now - record.registered_at > self.config.no_data_grace
            {
                record.status = HealthStatus::Offline;
            }
            if record.status == HealthStatus::Offline {
                record.online_since = None;
            }
            refresh(&mut record, now);

            if let Some(transition) = self.replace(record, from, now) {
                transitions.push(transition);
            }
        }

        transitions
    }

    /// Stop tracking a sensor.
    pub fn forget(&mut self, sensor_id: &str) -> Option<SensorHealth> {
        self.sensors.remove(sensor_id)
    }

    pub fn get(&self, sensor_id: &str) -> Option<&SensorHealth> {
        self.sensors.get(sensor_id)
    }

    pub fn status(&self, sensor_id: &str) -> HealthStatus {
        self.get(sensor_id).map(|h| h.status).unwrap_or_default()
    }

    /// Copies of all records, ordered by sensor id.
    pub fn snapshot(&self) -> Vec<SensorHealth> {
        self.sensors.values().cloned().collect()
    }

    /// Health history rows for every sensor.
    pub fn records(&self, timestamp: DateTime<Utc>) -> Vec<HealthRecord> {
        self.sensors
            .values()
            .map(|h| h.to_record(timestamp))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    fn current(&self, sensor_id: &str, at: DateTime<Utc>) -> SensorHealth {
        self.sensors
            .get(sensor_id)
            .cloned()
            .unwrap_or_else(|| SensorHealth::new(sensor_id, at))
    }

    fn replace(
        &mut self,
        record: SensorHealth,
        from: HealthStatus,
        at: DateTime<Utc>,
    ) -> Option<Transition> {
        let transition = (record.status != from).then(|| Transition {
            sensor_id: record.sensor_id.clone(),
            from,
            to: record.status,
            at,
        });
        self.sensors.insert(record.sensor_id.clone(), record);
        transition
    }
}

fn refresh(record: &mut SensorHealth, now: DateTime<Utc>) {
    let since_seen = record.last_seen.unwrap_or(record.registered_at);
    record.data_freshness_seconds = seconds(now - since_seen).max(0.0);
    record.connection_uptime_seconds = match record.online_since {
        Some(since) if record.status.is_connected() => seconds(now - since).max(0.0),
        _ => 0.0,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn secs(n: i64) -> Duration {
        Duration::seconds(n)
    }

    #[test]
    fn test_evaluate_timeout_boundaries() {
        let timeout = secs(30);
        let seen = Some(t0());
        let online = HealthStatus::Online;
        assert_eq!(evaluate(online, seen, t0() + secs(29), timeout), HealthStatus::Online);
        assert_eq!(evaluate(online, seen, t0() + secs(30), timeout), HealthStatus::Online);
        assert_eq!(evaluate(online, seen, t0() + secs(31), timeout), HealthStatus::Degraded);
        assert_eq!(evaluate(online, seen, t0() + secs(61), timeout), HealthStatus::Offline);
    }

    #[test]
    fn test_evaluate_leaves_disconnected_states() {
        let timeout = secs(30);
        let late = t0() + secs(500);
        for status in [HealthStatus::Unknown, HealthStatus::Offline, HealthStatus::Error] {
            assert_eq!(evaluate(status, Some(t0()), late, timeout), status);
        }
    }

    #[test]
    fn test_first_evidence_brings_sensor_online() {
        let mut monitor = HealthMonitor::new(HealthConfig::default());
        let transition = monitor.record_evidence("rack-a", Evidence::Banner, t0()).unwrap();
        assert_eq!(transition.from, HealthStatus::Unknown);
        assert_eq!(transition.to, HealthStatus::Online);
        assert_eq!(monitor.get("rack-a").unwrap().last_seen, Some(t0()));

        // More evidence while online is not a transition
        assert!(monitor
            .record_evidence("rack-a", Evidence::Reading, t0() + secs(1))
            .is_none());
    }

    #[test]
    fn test_monotonic_timeout_via_ticks() {
        let mut monitor = HealthMonitor::new(HealthConfig::default());
        monitor.record_evidence("rack-a", Evidence::Reading, t0());

        monitor.tick(t0() + secs(29));
        assert_eq!(monitor.status("rack-a"), HealthStatus::Online);

        let transitions = monitor.tick(t0() + secs(31));
        assert_eq!(monitor.status("rack-a"), HealthStatus::Degraded);
        assert_eq!(transitions.len(), 1);

        let transitions = monitor.tick(t0() + secs(61));
        assert_eq!(monitor.status("rack-a"), HealthStatus::Offline);
        assert_eq!(transitions[0].from, HealthStatus::Degraded);

        assert!(monitor.tick(t0() + secs(120)).is_empty());
    }

    #[test]
    fn test_missed_ticks_go_straight_offline() {
        let mut monitor = HealthMonitor::new(HealthConfig::default());
        monitor.record_evidence("rack-a", Evidence::Reading, t0());
        let transitions = monitor.tick(t0() + secs(90));
        assert_eq!(transitions[0].from, HealthStatus::Online);
        assert_eq!(transitions[0].to, HealthStatus::Offline);
    }

    #[test]
    fn test_recovery_from_offline_resets_uptime() {
        let mut monitor = HealthMonitor::new(HealthConfig::default());
        monitor.record_evidence("rack-a", Evidence::Reading, t0());
        monitor.tick(t0() + secs(20));
        assert!((monitor.get("rack-a").unwrap().connection_uptime_seconds - 20.0).abs() < 1e-9);

        monitor.tick(t0() + secs(70));
        assert_eq!(monitor.get("rack-a").unwrap().connection_uptime_seconds, 0.0);

        let back = t0() + secs(100);
        let transition = monitor.record_evidence("rack-a", Evidence::Unknown, back).unwrap();
        assert_eq!(transition.from, HealthStatus::Offline);
        assert_eq!(transition.to, HealthStatus::Online);

        monitor.tick(back + secs(5));
        let health = monitor.get("rack-a").unwrap();
        assert!((health.connection_uptime_seconds - 5.0).abs() < 1e-9);
        assert!((health.data_freshness_seconds - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_degraded_recovery_keeps_connection() {
        let mut monitor = HealthMonitor::new(HealthConfig::default());
        monitor.record_evidence("rack-a", Evidence::Reading, t0());
        monitor.tick(t0() + secs(40));
        assert_eq!(monitor.status("rack-a"), HealthStatus::Degraded);

        monitor.record_evidence("rack-a", Evidence::Reading, t0() + secs(45));
        monitor.tick(t0() + secs(50));
        let health = monitor.get("rack-a").unwrap();
        assert_eq!(health.status, HealthStatus::Online);
        assert!((health.connection_uptime_seconds - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_errors_below_threshold_keep_status() {
        let mut monitor = HealthMonitor::new(HealthConfig::default());
        monitor.record_evidence("rack-a", Evidence::Reading, t0());
        for _ in 0..5 {
            assert!(monitor.record_error("rack-a", "range", t0()).is_none());
        }
        let health = monitor.get("rack-a").unwrap();
        assert_eq!(health.status, HealthStatus::Online);
        assert_eq!(health.error_count, 5);
        assert_eq!(health.last_error.as_deref(), Some("range"));
    }

    #[test]
    fn test_error_state_cleared_by_clean_reading() {
        let mut monitor = HealthMonitor::new(HealthConfig::default());
        monitor.record_evidence("rack-a", Evidence::Reading, t0());
        let mut last = None;
        for _ in 0..6 {
            last = monitor.record_error("rack-a", "range", t0());
        }
        assert_eq!(last.unwrap().to, HealthStatus::Error);

        // Banners keep it alive but do not clear the error
        assert!(monitor
            .record_evidence("rack-a", Evidence::Banner, t0() + secs(1))
            .is_none());
        assert_eq!(monitor.status("rack-a"), HealthStatus::Error);

        // Silence does not move a sensor out of error either
        assert!(monitor.tick(t0() + secs(300)).is_empty());

        let cleared = monitor
            .record_evidence("rack-a", Evidence::Reading, t0() + secs(301))
            .unwrap();
        assert_eq!(cleared.to, HealthStatus::Online);
        assert_eq!(monitor.get("rack-a").unwrap().error_count, 0);
    }

    #[test]
    fn test_registered_sensor_without_data_goes_offline_after_grace() {
        let mut monitor = HealthMonitor::new(HealthConfig::default());
        monitor.register("rack-b", t0());
        assert!(monitor.tick(t0() + secs(60)).is_empty());
        assert_eq!(monitor.status("rack-b"), HealthStatus::Unknown);

        let transitions = monitor.tick(t0() + secs(61));
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from, HealthStatus::Unknown);
        assert_eq!(transitions[0].to, HealthStatus::Offline);
    }

    #[test]
    fn test_records_reflect_freshness() {
        let mut monitor = HealthMonitor::new(HealthConfig::default());
        monitor.record_evidence("rack-a", Evidence::Reading, t0());
        monitor.tick(t0() + secs(12));
        let records = monitor.records(t0() + secs(12));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, HealthStatus::Online);
        assert!((records[0].data_freshness_seconds - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_same_history_same_status() {
        let history = [0, 5, 12, 50, 55];
        let run = || {
            let mut monitor = HealthMonitor::new(HealthConfig::default());
            for s in history {
                monitor.record_evidence("rack-a", Evidence::Reading, t0() + secs(s));
            }
            monitor.tick(t0() + secs(100));
            monitor.status("rack-a")
        };
        assert_eq!(run(), run());
        assert_eq!(run(), HealthStatus::Degraded);
    }
}
