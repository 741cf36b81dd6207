//! Downstream publishing of readings, availability and alerts.
//!
//! Publishing is best effort: a failing target is logged and skipped, and
//! nothing is queued for retry.

pub mod log;

#[cfg(feature = "gateway")]
pub mod gateway;

#[cfg(feature = "mqtt")]
pub mod mqtt;

use crate::monitor::alerts::ConnectionAlert;
use crate::monitor::health::HealthStatus;
use crate::monitor::reading::SensorReading;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use log::LogPublisher;

/// Availability signal derived from a health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Online,
    Offline,
}

impl Availability {
    pub fn from_status(status: HealthStatus) -> Self {
        if status.is_connected() {
            Availability::Online
        } else {
            Availability::Offline
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Online => "online",
            Availability::Offline => "offline",
        }
    }
}

/// Reading as published downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingPayload {
    pub sensor_id: String,
    pub temperature: f64,
    pub humidity: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<&SensorReading> for ReadingPayload {
    fn from(reading: &SensorReading) -> Self {
        Self {
            sensor_id: reading.sensor_id.clone(),
            temperature: reading.temperature,
            humidity: reading.humidity,
            timestamp: reading.observed_at,
        }
    }
}

/// Availability as published downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityPayload {
    pub sensor_id: String,
    pub availability: Availability,
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
}

/// A downstream target.
pub trait Publisher: Send {
    fn name(&self) -> &str;
    fn publish_reading(&mut self, reading: &ReadingPayload) -> Result<(), PublishError>;
    fn publish_availability(&mut self, signal: &AvailabilityPayload) -> Result<(), PublishError>;
    fn publish_alert(&mut self, alert: &ConnectionAlert) -> Result<(), PublishError>;
}

/// Publish errors.
#[derive(Debug)]
pub enum PublishError {
    Config(String),
    Network(String),
    Server { status: u16, message: String },
    Serialization(String),
    /// The target's outgoing queue is full; the message was dropped
    QueueFull,
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishError::Config(msg) => write!(f, "Publish config error: {msg}"),
            PublishError::Network(msg) => write!(f, "Publish network error: {msg}"),
            PublishError::Server { status, message } => {
                write!(f, "Publish server error ({status}): {message}")
            }
            PublishError::Serialization(msg) => write!(f, "Publish serialization error: {msg}"),
            PublishError::QueueFull => write!(f, "Publish queue full, message dropped"),
        }
    }
}

impl std::error::Error for PublishError {}

impl From<serde_json::Error> for PublishError {
    fn from(e: serde_json::Error) -> Self {
        PublishError::Serialization(e.to_string())
    }
}

/// Sends everything to every target, logging failures.
#[derive(Default)]
pub struct Fanout {
    targets: Vec<Box<dyn Publisher>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, target: Box<dyn Publisher>) -> Self {
        self.targets.push(target);
        self
    }

    pub fn push(&mut self, target: Box<dyn Publisher>) {
        self.targets.push(target);
    }

    pub fn names(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Returns the number of targets that failed.
    pub fn reading(&mut self, reading: &SensorReading) -> usize {
        let payload = ReadingPayload::from(reading);
        let mut failed = 0;
        for target in &mut self.targets {
            if let Err(e) = target.publish_reading(&payload) {
                warn!(publisher = target.name(), sensor_id = %payload.sensor_id, error = %e, "reading publish failed");
                failed += 1;
            }
        }
        failed
    }

    pub fn availability(
        &mut self,
        sensor_id: &str,
        status: HealthStatus,
        at: DateTime<Utc>,
    ) -> usize {
        let payload = AvailabilityPayload {
            sensor_id: sensor_id.to_string(),
            availability: Availability::from_status(status),
            status,
            timestamp: at,
        };
        let mut failed = 0;
        for target in &mut self.targets {
            if let Err(e) = target.publish_availability(&payload) {
                warn!(publisher = target.name(), sensor_id, error = %e, "availability publish failed");
                failed += 1;
            }
        }
        failed
    }

    pub fn alert(&mut self, alert: &ConnectionAlert) -> usize {
        let mut failed = 0;
        for target in &mut self.targets {
            if let Err(e) = target.publish_alert(alert) {
                warn!(
                    publisher = target.name(),
                    sensor_id = %alert.sensor_id,
                    alert_type = %alert.alert_type,
                    error = %e,
                    "alert publish failed"
                );
                failed += 1;
            }
        }
        failed
    }
}

/// `hidsense-<hostname>-<8 hex>`, unique per process. Used as the MQTT
/// client id and the gateway agent id.
pub fn agent_id() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!(
        "hidsense-{}-{}",
        hostname,
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    )
}

/// Build the publishers named in the configuration.
pub fn from_config(config: &crate::config::PublishConfig) -> Fanout {
    #[allow(unused_mut)]
    let mut fanout = Fanout::new().with(Box::new(LogPublisher::new()));

    #[cfg(feature = "mqtt")]
    if let Some(mqtt_config) = &config.mqtt {
        fanout.push(Box::new(mqtt::MqttPublisher::connect(mqtt_config)));
    }
    #[cfg(not(feature = "mqtt"))]
    if config.mqtt.is_some() {
        warn!("mqtt publishing configured but the mqtt feature is not enabled");
    }

    #[cfg(feature = "gateway")]
    if let Some(gateway_config) = &config.gateway {
        match gateway::GatewayPublisher::spawn(gateway_config.clone()) {
            Ok(client) => fanout.push(Box::new(client)),
            Err(e) => warn!(error = %e, "gateway publisher disabled"),
        }
    }
    #[cfg(not(feature = "gateway"))]
    if config.gateway.is_some() {
        warn!("gateway publishing configured but the gateway feature is not enabled");
    }

    fanout
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records what it is asked to publish; optionally fails.
    struct Recording {
        fail: bool,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Publisher for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn publish_reading(&mut self, reading: &ReadingPayload) -> Result<(), PublishError> {
            self.seen.lock().unwrap().push(format!("reading:{}", reading.sensor_id));
            if self.fail {
                Err(PublishError::Network("down".into()))
            } else {
                Ok(())
            }
        }

        fn publish_availability(
            &mut self,
            signal: &AvailabilityPayload,
        ) -> Result<(), PublishError> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", signal.sensor_id, signal.availability.as_str()));
            Ok(())
        }

        fn publish_alert(&mut self, alert: &ConnectionAlert) -> Result<(), PublishError> {
            self.seen.lock().unwrap().push(alert.alert_type.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_availability_from_status() {
        assert_eq!(Availability::from_status(HealthStatus::Online), Availability::Online);
        assert_eq!(Availability::from_status(HealthStatus::Degraded), Availability::Online);
        assert_eq!(Availability::from_status(HealthStatus::Offline), Availability::Offline);
        assert_eq!(Availability::from_status(HealthStatus::Error), Availability::Offline);
    }

    #[test]
    fn test_fanout_continues_past_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut fanout = Fanout::new()
            .with(Box::new(Recording {
                fail: true,
                seen: seen.clone(),
            }))
            .with(Box::new(Recording {
                fail: false,
                seen: seen.clone(),
            }));

        let reading = SensorReading {
            sensor_id: "rack-a".into(),
            temperature: 20.0,
            humidity: 40.0,
            interval_seconds: 1,
            raw_text: "20.00[C]40.00[%RH]1S".into(),
            observed_at: Utc::now(),
        };
        assert_eq!(fanout.reading(&reading), 1);
        assert_eq!(fanout.availability("rack-a", HealthStatus::Offline, Utc::now()), 0);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[2], "rack-a:offline");
    }

    #[test]
    fn test_agent_id_format() {
        let id = agent_id();
        assert!(id.starts_with("hidsense-"));
        assert_ne!(id, agent_id());
    }

    #[test]
    fn test_default_publishers() {
        let fanout = from_config(&crate::config::PublishConfig::default());
        assert_eq!(fanout.names(), vec!["log".to_string()]);
    }
}
