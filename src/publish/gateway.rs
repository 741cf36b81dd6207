//! HTTP gateway publisher.
//!
//! Posts every reading, availability change and alert as JSON to an HTTP
//! collector:
//!
//! - `POST <url>/v1/readings`
//! - `POST <url>/v1/availability`
//! - `POST <url>/v1/alerts`

use super::{agent_id, AvailabilityPayload, PublishError, Publisher, ReadingPayload};
use crate::config::GatewayConfig;
use crate::monitor::alerts::ConnectionAlert;
use crossbeam_channel::{bounded, Sender, TrySendError};
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Messages that may wait for the gateway before new ones are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1_024;

impl GatewayConfig {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            token,
        }
    }

    fn base(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    pub fn readings_url(&self) -> String {
        format!("{}/v1/readings", self.base())
    }

    pub fn availability_url(&self) -> String {
        format!("{}/v1/availability", self.base())
    }

    pub fn alerts_url(&self) -> String {
        format!("{}/v1/alerts", self.base())
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.base())
    }
}

/// Body of every gateway request.
#[derive(Debug, Serialize)]
pub struct Envelope<'a, T: Serialize> {
    /// Identifies this agent instance
    pub agent_id: &'a str,
    pub source: &'static str,
    pub version: &'static str,
    pub payload: &'a T,
}

/// Async gateway client.
pub struct GatewayClient {
    config: GatewayConfig,
    client: reqwest::Client,
    agent_id: String,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PublishError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            client,
            agent_id: agent_id(),
        })
    }

    pub async fn test_connection(&self) -> Result<bool, PublishError> {
        let response = self
            .client
            .get(self.config.health_url())
            .send()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    pub async fn post<T: Serialize>(&self, url: String, payload: &T) -> Result<(), PublishError> {
        let envelope = Envelope {
            agent_id: &self.agent_id,
            source: "hidsense-agent",
            version: env!("CARGO_PKG_VERSION"),
            payload,
        };

        let mut request = self.client.post(url).json(&envelope);
        if let Some(token) = &self.config.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PublishError::Server {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    async fn send(&self, message: &Outgoing) -> Result<(), PublishError> {
        match message {
            Outgoing::Reading(reading) => self.post(self.config.readings_url(), reading).await,
            Outgoing::Availability(signal) => {
                self.post(self.config.availability_url(), signal).await
            }
            Outgoing::Alert(alert) => self.post(self.config.alerts_url(), alert).await,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// Messages waiting to be posted.
#[derive(Debug)]
enum Outgoing {
    Reading(ReadingPayload),
    Availability(AvailabilityPayload),
    Alert(ConnectionAlert),
}

impl Outgoing {
    fn kind(&self) -> &'static str {
        match self {
            Outgoing::Reading(_) => "reading",
            Outgoing::Availability(_) => "availability",
            Outgoing::Alert(_) => "alert",
        }
    }
}

/// Gateway publisher for the pipeline thread.
///
/// Publishing only queues the message; a background thread posts it, so
/// a slow or unreachable gateway never holds up health ticks. When the
/// queue is full the message is dropped.
pub struct GatewayPublisher {
    sender: Sender<Outgoing>,
    agent_id: String,
}

impl GatewayPublisher {
    pub fn spawn(config: GatewayConfig) -> Result<Self, PublishError> {
        Self::with_capacity(config, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(config: GatewayConfig, capacity: usize) -> Result<Self, PublishError> {
        let client = GatewayClient::new(config)?;
        let agent_id = client.agent_id().to_string();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PublishError::Config(format!("Failed to create runtime: {e}")))?;

        let (sender, receiver) = bounded::<Outgoing>(capacity.max(1));
        std::thread::Builder::new()
            .name("gateway-publisher".to_string())
            .spawn(move || {
                // Ends once the publisher and its sender are dropped.
                for message in receiver.iter() {
                    if let Err(e) = runtime.block_on(client.send(&message)) {
                        warn!(kind = message.kind(), error = %e, "gateway post failed");
                    }
                }
            })
            .map_err(|e| PublishError::Config(format!("Failed to start gateway thread: {e}")))?;

        Ok(Self { sender, agent_id })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn enqueue(&self, message: Outgoing) -> Result<(), PublishError> {
        match self.sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(PublishError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(PublishError::Network(
                "gateway publisher thread has stopped".to_string(),
            )),
        }
    }
}

impl Publisher for GatewayPublisher {
    fn name(&self) -> &str {
        "gateway"
    }

    fn publish_reading(&mut self, reading: &ReadingPayload) -> Result<(), PublishError> {
        self.enqueue(Outgoing::Reading(reading.clone()))
    }

    fn publish_availability(&mut self, signal: &AvailabilityPayload) -> Result<(), PublishError> {
        self.enqueue(Outgoing::Availability(signal.clone()))
    }

    fn publish_alert(&mut self, alert: &ConnectionAlert) -> Result<(), PublishError> {
        self.enqueue(Outgoing::Alert(alert.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_urls() {
        let config = GatewayConfig::new("http://127.0.0.1:8080/", None);
        assert_eq!(config.readings_url(), "http://127.0.0.1:8080/v1/readings");
        assert_eq!(config.alerts_url(), "http://127.0.0.1:8080/v1/alerts");
        assert_eq!(config.health_url(), "http://127.0.0.1:8080/health");
    }

    fn reading() -> ReadingPayload {
        ReadingPayload {
            sensor_id: "rack-a".into(),
            temperature: 20.0,
            humidity: 40.0,
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_an_error() {
        let client = GatewayClient::new(GatewayConfig::new("http://127.0.0.1:1", None)).unwrap();
        let result = client
            .post(client.config().readings_url(), &reading())
            .await;
        assert!(matches!(result, Err(PublishError::Network(_))));
    }

    #[test]
    fn test_publishing_does_not_wait_for_the_gateway() {
        let mut publisher =
            GatewayPublisher::with_capacity(GatewayConfig::new("http://127.0.0.1:1", None), 4)
                .unwrap();

        let started = std::time::Instant::now();
        for _ in 0..50 {
            match publisher.publish_reading(&reading()) {
                Ok(()) | Err(PublishError::QueueFull) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(publisher.agent_id().starts_with("hidsense-"));
    }
}
