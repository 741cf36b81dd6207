//! Alerting on health transitions.
//!
//! Only some transitions are worth telling anyone about. Repeats of the same
//! alert for the same sensor are held back for a cooldown period so a flapping
//! sensor does not flood the log.

use crate::monitor::health::{HealthStatus, Transition};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    ConnectionLost,
    ConnectionRestored,
    DataStale,
    NoData,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::ConnectionLost => "connection_lost",
            AlertType::ConnectionRestored => "connection_restored",
            AlertType::DataStale => "data_stale",
            AlertType::NoData => "no_data",
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionAlert {
    pub id: Uuid,
    pub sensor_id: String,
    pub alert_type: AlertType,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

/// Alert type and severity for a transition, if it is reportable.
pub fn alert_for(from: HealthStatus, to: HealthStatus) -> Option<(AlertType, Severity)> {
    use HealthStatus::*;
    match (from, to) {
        (Online, Offline) | (Degraded, Offline) => {
            Some((AlertType::ConnectionLost, Severity::Critical))
        }
        (Offline, Online) | (Degraded, Online) => {
            Some((AlertType::ConnectionRestored, Severity::Info))
        }
        (Online, Degraded) => Some((AlertType::DataStale, Severity::Warning)),
        (Unknown, Offline) => Some((AlertType::NoData, Severity::Critical)),
        _ => None,
    }
}

fn message_for(alert_type: AlertType, sensor_id: &str) -> String {
    match alert_type {
        AlertType::ConnectionLost => format!("Sensor {sensor_id} stopped transmitting"),
        AlertType::ConnectionRestored => format!("Sensor {sensor_id} is transmitting again"),
        AlertType::DataStale => format!("Sensor {sensor_id} data is stale"),
        AlertType::NoData => format!("Sensor {sensor_id} has not sent any data"),
    }
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Minimum time between two alerts of the same type for one sensor
    pub cooldown: Duration,
    /// How far back the in-memory log reaches
    pub window: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::minutes(5),
            window: Duration::hours(24),
        }
    }
}

impl AlertConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        use crate::monitor::health::to_chrono;
        Self {
            cooldown: to_chrono(config.alert_cooldown),
            window: to_chrono(config.alert_window),
        }
    }
}

/// Owner of the cooldown map and the rolling alert log.
#[derive(Debug, Default)]
pub struct AlertEngine {
    config: AlertConfig,
    last_fired: HashMap<(String, AlertType), DateTime<Utc>>,
    log: VecDeque<ConnectionAlert>,
}

impl AlertEngine {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            last_fired: HashMap::new(),
            log: VecDeque::new(),
        }
    }

    /// Turn a transition into an alert, unless it is not reportable or
    /// the same alert fired for this sensor within the cooldown.
    pub fn on_transition(
        &mut self,
        sensor_id: &str,
        from: HealthStatus,
        to: HealthStatus,
        at: DateTime<Utc>,
    ) -> Option<ConnectionAlert> {
        let (alert_type, severity) = alert_for(from, to)?;
        let key = (sensor_id.to_string(), alert_type);

        if let Some(last) = self.last_fired.get(&key) {
            if at - *last < self.config.cooldown {
                debug!(sensor_id, %alert_type, "alert suppressed by cooldown");
                return None;
            }
        }
        self.last_fired.insert(key, at);

        let alert = ConnectionAlert {
            id: Uuid::new_v4(),
            sensor_id: sensor_id.to_string(),
            alert_type,
            message: message_for(alert_type, sensor_id),
            severity,
            timestamp: at,
        };

        match severity {
            Severity::Critical => warn!(sensor_id, %alert_type, "{}", alert.message),
            _ => info!(sensor_id, %alert_type, "{}", alert.message),
        }

        self.log.push_back(alert.clone());
        self.prune(at);
        Some(alert)
    }

    pub fn handle(&mut self, transition: &Transition) -> Option<ConnectionAlert> {
        self.on_transition(
            &transition.sensor_id,
            transition.from,
            transition.to,
            transition.at,
        )
    }

    /// Drop log entries older than the window, and cooldowns that have expired.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let oldest = now - self.config.window;
        while self.log.front().map_or(false, |a| a.timestamp < oldest) {
            self.log.pop_front();
        }
        let cooldown = self.config.cooldown;
        self.last_fired.retain(|_, fired| now - *fired < cooldown);
    }

    /// Alerts at or after `since`, optionally filtered by minimum severity.
    pub fn recent(
        &self,
        since: DateTime<Utc>,
        min_severity: Option<Severity>,
    ) -> Vec<ConnectionAlert> {
        self.log
            .iter()
            .filter(|a| a.timestamp >= since)
            .filter(|a| min_severity.map_or(true, |min| a.severity >= min))
            .cloned()
            .collect()
    }

    /// All alerts still in the window, oldest first.
    pub fn log(&self) -> impl Iterator<Item = &ConnectionAlert> {
        self.log.iter()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}
