//! Event types flowing out of the input devices.
//!
//! Raw key events are ephemeral: they live only as long as it takes the
//! decoder to turn them into characters.

use crate::decode::{classify_detailed, LineClass};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single key transition reported by an input device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawKeyEvent {
    /// Device the event came from (usually an evdev path such as `event3`)
    pub device_id: String,
    /// Linux input key code
    pub code: u16,
    /// Whether this is a key press (true) or release (false)
    pub is_down: bool,
    /// Timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
}

impl RawKeyEvent {
    pub fn new(device_id: impl Into<String>, code: u16, is_down: bool) -> Self {
        Self::at(device_id, code, is_down, Utc::now())
    }

    pub fn at(
        device_id: impl Into<String>,
        code: u16,
        is_down: bool,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            code,
            is_down,
            timestamp,
        }
    }
}

/// A completed line of text typed by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedLine {
    pub device_id: String,
    pub text: String,
    pub observed_at: DateTime<Utc>,
}

/// A decoded and classified line, ready for the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorEvent {
    pub device_id: String,
    pub raw_text: String,
    pub class: LineClass,
    pub observed_at: DateTime<Utc>,
    /// Why a reading-shaped line was refused, e.g. values out of range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<String>,
}

impl SensorEvent {
    pub fn from_line(line: DecodedLine, class: LineClass) -> Self {
        Self {
            device_id: line.device_id,
            raw_text: line.text,
            class,
            observed_at: line.observed_at,
            rejection: None,
        }
    }

    /// Classify a decoded line.
    pub fn classify(line: DecodedLine) -> Self {
        let (class, rejection) = classify_detailed(&line.text);
        let mut event = Self::from_line(line, class);
        event.rejection = rejection.map(|e| e.to_string());
        event
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.observed_at
    }
}
