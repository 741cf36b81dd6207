//! Key event collection.
//!
//! A [`KeySource`] yields raw key events for one device. Each source is
//! driven by its own worker thread, which decodes and classifies lines and
//! hands them to the monitor over a bounded channel.

pub mod keymap;
pub mod noop;
pub mod replay;
pub mod types;
pub mod worker;

#[cfg(target_os = "linux")]
pub mod evdev;

pub use noop::NoopSource;
pub use replay::ReplaySource;
pub use types::{DecodedLine, RawKeyEvent, SensorEvent};
pub use worker::{Collector, DeviceWorker, DEFAULT_CHANNEL_CAPACITY};

#[cfg(target_os = "linux")]
pub use evdev::{discover, EvdevSource, InputDeviceInfo};

/// Outcome of one poll of a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Key(RawKeyEvent),
    /// Nothing to report right now
    Idle,
    /// The source is exhausted or the device went away
    Closed,
}

/// A stream of key events from one device.
pub trait KeySource: Send {
    fn device_id(&self) -> &str;

    /// Next event. May block; returning `Idle` lets the worker check its
    /// stop flag.
    fn next_event(&mut self) -> Result<SourceEvent, CollectorError>;
}

/// Errors that can occur during event collection.
#[derive(Debug)]
pub enum CollectorError {
    AlreadyRunning,
    NoDevices,
    Io { device: String, message: String },
    InvalidEvent(String),
}

impl std::fmt::Display for CollectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectorError::AlreadyRunning => write!(f, "Collector is already running"),
            CollectorError::NoDevices => write!(f, "No input devices to read"),
            CollectorError::Io { device, message } => {
                write!(f, "Input device {device}: {message}")
            }
            CollectorError::InvalidEvent(msg) => write!(f, "Invalid input event: {msg}"),
        }
    }
}

impl std::error::Error for CollectorError {}
