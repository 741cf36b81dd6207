//! Publisher that writes to the log. Always enabled.

use super::{AvailabilityPayload, PublishError, Publisher, ReadingPayload};
use crate::monitor::alerts::ConnectionAlert;
use tracing::info;

#[derive(Debug, Default)]
pub struct LogPublisher;

impl LogPublisher {
    pub fn new() -> Self {
        Self
    }
}

impl Publisher for LogPublisher {
    fn name(&self) -> &str {
        "log"
    }

    fn publish_reading(&mut self, reading: &ReadingPayload) -> Result<(), PublishError> {
        info!(
            sensor_id = %reading.sensor_id,
            temperature = reading.temperature,
            humidity = reading.humidity,
            "reading"
        );
        Ok(())
    }

    fn publish_availability(&mut self, signal: &AvailabilityPayload) -> Result<(), PublishError> {
        info!(
            sensor_id = %signal.sensor_id,
            availability = signal.availability.as_str(),
            status = %signal.status,
            "availability"
        );
        Ok(())
    }

    fn publish_alert(&mut self, alert: &ConnectionAlert) -> Result<(), PublishError> {
        info!(
            sensor_id = %alert.sensor_id,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            "alert published"
        );
        Ok(())
    }
}
