//! Attribution of lines to logical sensors.
//!
//! Two units of the same model type byte-identical text, so the interval a
//! sensor is configured with is the only thing that tells them apart. When a
//! line has no interval (banners, unknown lines) or the interval is not in the
//! table, the device the keystrokes came from is used instead.

use crate::config::Config;
use std::collections::HashMap;

/// Sensor id used when nothing identifies the sender.
pub const UNASSIGNED: &str = "unassigned";

/// Resolves `(device, interval)` pairs to sensor ids.
#[derive(Debug, Clone, Default)]
pub struct SensorIdentityResolver {
    by_interval: HashMap<u32, String>,
    by_device: HashMap<String, String>,
    distinct_device_paths: bool,
}

impl SensorIdentityResolver {
    pub fn new(distinct_device_paths: bool) -> Self {
        Self {
            distinct_device_paths,
            ..Self::default()
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut resolver = Self::new(config.distinct_device_paths);
        for mapping in &config.sensors {
            resolver = resolver.with_interval(mapping.interval_seconds, &mapping.sensor_id);
        }
        for mapping in &config.devices {
            resolver = resolver.with_device(&mapping.device_id, &mapping.sensor_id);
        }
        resolver
    }

    pub fn with_interval(mut self, interval_seconds: u32, sensor_id: impl Into<String>) -> Self {
        self.by_interval.insert(interval_seconds, sensor_id.into());
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>, sensor_id: impl Into<String>) -> Self {
        self.by_device.insert(device_id.into(), sensor_id.into());
        self
    }

    /// Resolve the sensor id for a line.
    ///
    /// Order: interval table, device table, the device id itself when device
    /// paths are distinct, and finally [`UNASSIGNED`].
    pub fn resolve(&self, device_id: &str, interval_seconds: Option<u32>) -> String {
        if let Some(sensor_id) = interval_seconds.and_then(|i| self.by_interval.get(&i)) {
            return sensor_id.clone();
        }
        self.resolve_device(device_id)
    }

    /// Resolve using only the device, ignoring any interval.
    pub fn resolve_device(&self, device_id: &str) -> String {
        if let Some(sensor_id) = self.by_device.get(device_id) {
            return sensor_id.clone();
        }
        if self.distinct_device_paths && !device_id.is_empty() {
            return device_id.to_string();
        }
        UNASSIGNED.to_string()
    }

    /// Whether the interval has an entry in the table.
    pub fn knows_interval(&self, interval_seconds: u32) -> bool {
        self.by_interval.contains_key(&interval_seconds)
    }

    /// Whether the device has an entry in the device table.
    pub fn maps_device(&self, device_id: &str) -> bool {
        self.by_device.contains_key(device_id)
    }

    /// Sensor ids reachable through the interval table, deduplicated and sorted.
    pub fn interval_sensors(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.by_interval.values().map(String::as_str).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}
