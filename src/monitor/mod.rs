//! Sensor identity, health and alerting.

pub mod alerts;
pub mod health;
pub mod identity;
pub mod pipeline;
pub mod reading;

pub use alerts::{AlertConfig, AlertEngine, AlertType, ConnectionAlert, Severity};
pub use health::{
    evaluate, Evidence, HealthConfig, HealthMonitor, HealthRecord, HealthStatus, SensorHealth,
    Transition,
};
pub use identity::{SensorIdentityResolver, UNASSIGNED};
pub use pipeline::Pipeline;
pub use reading::{ReadingSummary, SensorReading, SeriesStats};
