//! hidsense agent - telemetry and liveness for USB sensors that type.
//!
//! Temperature/humidity sensors such as the PCsensor TEMPerHUM enumerate as
//! HID keyboards and report each measurement by typing a line like
//! `29.54[C]39.58[%RH]1S`. This library turns those keystrokes back into
//! readings, attributes them to logical sensors, and tracks whether every
//! sensor is still transmitting.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         hidsense agent                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌───────────┐   ┌────────────┐                 │
//! │  │   evdev    │──▶│  Decoder  │──▶│ Classifier │   one worker    │
//! │  │  (device)  │   │  (lines)  │   │  + Parser  │   per device    │
//! │  └────────────┘   └───────────┘   └────────────┘                 │
//! │                                         │ SensorEvent            │
//! │                                         ▼                        │
//! │  ┌──────────────────────────────────────────────────┐            │
//! │  │ Pipeline: identity ─▶ health ─▶ alerts            │──▶ store  │
//! │  │           latest reading per sensor               │──▶ publish│
//! │  └──────────────────────────────────────────────────┘            │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use hidsense_agent::collector::{Collector, ReplaySource, DEFAULT_CHANNEL_CAPACITY};
//! use hidsense_agent::{monitor::Pipeline, publish::Fanout, stats, store::MemoryStore, Config};
//! use std::sync::{atomic::AtomicBool, Arc};
//!
//! let config = Config::default();
//! let mut collector = Collector::new(DEFAULT_CHANNEL_CAPACITY, stats::create_shared_stats());
//! collector
//!     .start(vec![Box::new(ReplaySource::new("event3", "29.54[C]39.58[%RH]1S\n"))])
//!     .expect("Failed to start collector");
//!
//! let mut pipeline = Pipeline::new(&config, Arc::new(MemoryStore::new()), Fanout::new());
//! pipeline.drain(collector.receiver(), &AtomicBool::new(true));
//! ```

pub mod collector;
pub mod config;
pub mod decode;
pub mod monitor;
pub mod publish;
pub mod stats;
pub mod store;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use collector::{Collector, CollectorError, KeySource, SensorEvent};
pub use config::{Config, ConfigError};
pub use decode::{classify, parse, KeystrokeDecoder, LineClass, ParsedReading};
pub use monitor::{
    AlertEngine, ConnectionAlert, HealthMonitor, HealthStatus, Pipeline, SensorIdentityResolver,
    SensorReading,
};
pub use publish::{Publisher, PublishError};
pub use stats::{IngestStats, SharedStats};
pub use store::{JsonlStore, MemoryStore, StoreError, TelemetryQuery, TelemetryStore};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
