//! MQTT publisher.
//!
//! Topics are `<prefix>/<sensor_id>/reading`, `<prefix>/<sensor_id>/availability`
//! (retained) and `<prefix>/<sensor_id>/alert`. Publishing never blocks: if
//! the client queue is full the message is refused and reported as an error.

use super::{AvailabilityPayload, PublishError, Publisher, ReadingPayload};
use crate::config::MqttConfig;
use crate::monitor::alerts::ConnectionAlert;
use rumqttc::{Client, MqttOptions, QoS};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const QUEUE_CAPACITY: usize = 64;

pub struct MqttPublisher {
    client: Client,
    topic_prefix: String,
}

impl MqttPublisher {
    /// Create the client and start its network thread. Connection happens
    /// in the background and is retried on failure.
    pub fn connect(config: &MqttConfig) -> Self {
        let client_id = super::agent_id();
        let mut opts = MqttOptions::new(client_id.clone(), &config.host, config.port);
        opts.set_keep_alive(Duration::from_secs(15));

        let (client, mut connection) = Client::new(opts, QUEUE_CAPACITY);
        let host = format!("{}:{}", config.host, config.port);
        thread::spawn(move || {
            for notification in connection.iter() {
                match notification {
                    Ok(event) => debug!(?event, "mqtt event"),
                    Err(e) => {
                        warn!(broker = %host, error = %e, "mqtt connection error");
                        thread::sleep(Duration::from_secs(2));
                    }
                }
            }
        });
        debug!(client_id = %client_id, "mqtt publisher started");

        Self {
            client,
            topic_prefix: config.topic_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn topic(&self, sensor_id: &str, kind: &str) -> String {
        topic(&self.topic_prefix, sensor_id, kind)
    }

    fn send<T: serde::Serialize>(
        &mut self,
        topic: String,
        retain: bool,
        payload: &T,
    ) -> Result<(), PublishError> {
        let body = serde_json::to_vec(payload)?;
        self.client
            .try_publish(topic, QoS::AtLeastOnce, retain, body)
            .map_err(|e| PublishError::Network(e.to_string()))
    }
}

pub fn topic(prefix: &str, sensor_id: &str, kind: &str) -> String {
    format!("{prefix}/{sensor_id}/{kind}")
}

impl Publisher for MqttPublisher {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn publish_reading(&mut self, reading: &ReadingPayload) -> Result<(), PublishError> {
        let topic = self.topic(&reading.sensor_id, "reading");
        self.send(topic, false, reading)
    }

    fn publish_availability(&mut self, signal: &AvailabilityPayload) -> Result<(), PublishError> {
        let topic = self.topic(&signal.sensor_id, "availability");
        self.send(topic, true, signal)
    }

    fn publish_alert(&mut self, alert: &ConnectionAlert) -> Result<(), PublishError> {
        let topic = self.topic(&alert.sensor_id, "alert");
        self.send(topic, false, alert)
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        let _ = self.client.try_disconnect();
    }
}
