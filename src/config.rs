//! Configuration for the HID sensor agent.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables recognised by [`Config::with_env_overrides`].
pub const ENV_SENSOR_TIMEOUT_SECONDS: &str = "SENSOR_TIMEOUT_SECONDS";
pub const ENV_HEALTH_CHECK_INTERVAL: &str = "HEALTH_CHECK_INTERVAL";
pub const ENV_ALERT_COOLDOWN_MINUTES: &str = "ALERT_COOLDOWN_MINUTES";
pub const ENV_ERROR_THRESHOLD: &str = "ERROR_THRESHOLD";
pub const ENV_ALERT_WINDOW_HOURS: &str = "ALERT_WINDOW_HOURS";
pub const ENV_SHUTDOWN_GRACE_SECONDS: &str = "SHUTDOWN_GRACE_SECONDS";

/// Longest accepted value for any configured duration.
pub const MAX_DURATION: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Silence after which an online sensor is considered degraded.
    /// Twice this makes it offline.
    #[serde(with = "duration_serde")]
    pub sensor_timeout: Duration,

    /// How often sensor health is re-evaluated
    #[serde(with = "duration_serde")]
    pub health_check_interval: Duration,

    /// Minimum time between two alerts of the same type for one sensor
    #[serde(with = "duration_serde")]
    pub alert_cooldown: Duration,

    /// Lookback kept in the in-memory alert log
    #[serde(with = "duration_serde")]
    pub alert_window: Duration,

    /// How long a configured sensor may stay silent after startup before a
    /// `no_data` alert is raised
    #[serde(with = "duration_serde")]
    pub no_data_grace: Duration,

    /// Time given to device workers to exit on shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_grace: Duration,

    /// Parse/IO failures tolerated before a sensor is put in error
    pub error_threshold: u32,

    /// Interval field to sensor id table
    pub sensors: Vec<SensorMapping>,

    /// Explicit device to sensor id table
    pub devices: Vec<DeviceMapping>,

    /// Whether each physical sensor shows up under its own device path.
    /// When set, unmapped devices are tracked under their device id.
    pub distinct_device_paths: bool,

    /// Input devices to read. Empty means auto-discovery.
    pub input_devices: Vec<PathBuf>,

    /// Path for storing readings, alerts, health history and stats
    pub data_path: PathBuf,

    /// Downstream publishing
    pub publish: PublishConfig,

    /// Port for the query API
    pub server_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hidsense-agent");

        Self {
            sensor_timeout: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(10),
            alert_cooldown: Duration::from_secs(5 * 60),
            alert_window: Duration::from_secs(24 * 60 * 60),
            no_data_grace: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
            error_threshold: 5,
            sensors: Vec::new(),
            devices: Vec::new(),
            distinct_device_paths: true,
            input_devices: Vec::new(),
            data_path: data_dir,
            publish: PublishConfig::default(),
            server_port: 8087,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a file, falling back to defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config: Config = if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hidsense-agent")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Apply the recognised environment variables on top of this configuration.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str| -> Result<Option<u64>, ConfigError> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|e| ConfigError::ParseError(format!("{key}={raw}: {e}"))),
                None => Ok(None),
            }
        };

        if let Some(secs) = number(ENV_SENSOR_TIMEOUT_SECONDS)? {
            self.sensor_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = number(ENV_HEALTH_CHECK_INTERVAL)? {
            self.health_check_interval = Duration::from_secs(secs);
        }
        if let Some(minutes) = number(ENV_ALERT_COOLDOWN_MINUTES)? {
            self.alert_cooldown = scaled(ENV_ALERT_COOLDOWN_MINUTES, minutes, 60)?;
        }
        if let Some(count) = number(ENV_ERROR_THRESHOLD)? {
            self.error_threshold = u32::try_from(count)
                .map_err(|e| ConfigError::ParseError(format!("{ENV_ERROR_THRESHOLD}: {e}")))?;
        }
        if let Some(hours) = number(ENV_ALERT_WINDOW_HOURS)? {
            self.alert_window = scaled(ENV_ALERT_WINDOW_HOURS, hours, 60 * 60)?;
        }
        if let Some(secs) = number(ENV_SHUTDOWN_GRACE_SECONDS)? {
            self.shutdown_grace = Duration::from_secs(secs);
        }

        self.validate()
    }

    /// Reject configurations the monitor cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sensor_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "sensor_timeout must be greater than zero".to_string(),
            ));
        }
        if self.health_check_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "health_check_interval must be greater than zero".to_string(),
            ));
        }

        for (name, value) in [
            ("sensor_timeout", self.sensor_timeout),
            ("health_check_interval", self.health_check_interval),
            ("alert_cooldown", self.alert_cooldown),
            ("alert_window", self.alert_window),
            ("no_data_grace", self.no_data_grace),
            ("shutdown_grace", self.shutdown_grace),
        ] {
            if value > MAX_DURATION {
                return Err(ConfigError::Invalid(format!(
                    "{name} exceeds {}s",
                    MAX_DURATION.as_secs()
                )));
            }
        }

        // Two sensors sharing an interval cannot be told apart.
        let mut intervals = HashSet::new();
        for mapping in &self.sensors {
            if !intervals.insert(mapping.interval_seconds) {
                return Err(ConfigError::Invalid(format!(
                    "interval {}s is assigned to more than one sensor",
                    mapping.interval_seconds
                )));
            }
        }

        let mut devices = HashSet::new();
        for mapping in &self.devices {
            if !devices.insert(mapping.device_id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "device {} is mapped more than once",
                    mapping.device_id
                )));
            }
        }

        Ok(())
    }

    /// Every sensor id named in the mapping tables.
    pub fn configured_sensor_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sensors
            .iter()
            .map(|m| m.sensor_id.clone())
            .chain(self.devices.iter().map(|m| m.sensor_id.clone()))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Maps the interval a sensor reports to its logical id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorMapping {
    pub interval_seconds: u32,
    pub sensor_id: String,
}

impl SensorMapping {
    pub fn new(interval_seconds: u32, sensor_id: impl Into<String>) -> Self {
        Self {
            interval_seconds,
            sensor_id: sensor_id.into(),
        }
    }

    /// Parse `interval=sensor_id` (as given on the command line).
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let (interval, sensor_id) = s
            .split_once('=')
            .ok_or_else(|| ConfigError::ParseError(format!("expected INTERVAL=SENSOR, got {s}")))?;
        let interval_seconds = interval
            .trim()
            .trim_end_matches(['s', 'S'])
            .parse()
            .map_err(|e| ConfigError::ParseError(format!("{interval}: {e}")))?;
        let sensor_id = sensor_id.trim();
        if sensor_id.is_empty() {
            return Err(ConfigError::ParseError(format!("empty sensor id in {s}")));
        }
        Ok(Self::new(interval_seconds, sensor_id))
    }
}

/// Maps a device id (evdev name or path) to a logical sensor id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMapping {
    pub device_id: String,
    pub sensor_id: String,
}

/// Downstream publishing targets. Unset targets are skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub mqtt: Option<MqttConfig>,
    pub gateway: Option<GatewayConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Topics are `<prefix>/<sensor_id>/{reading,availability,alert}`
    pub topic_prefix: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            topic_prefix: "hidsense/sensors".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL, e.g. `http://127.0.0.1:8080`
    pub url: String,
    /// Bearer authentication token
    pub token: Option<String>,
}

/// `value` units of `factor` seconds each.
fn scaled(key: &str, value: u64, factor: u64) -> Result<Duration, ConfigError> {
    value
        .checked_mul(factor)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::ParseError(format!("{key}={value}: too large")))
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sensor_timeout, Duration::from_secs(30));
        assert_eq!(config.health_check_interval, Duration::from_secs(10));
        assert_eq!(config.alert_cooldown, Duration::from_secs(300));
        assert_eq!(config.alert_window, Duration::from_secs(86_400));
        assert_eq!(config.error_threshold, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_SENSOR_TIMEOUT_SECONDS, "45"),
            (ENV_ALERT_COOLDOWN_MINUTES, "2"),
            (ENV_HEALTH_CHECK_INTERVAL, " 5 "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.sensor_timeout, Duration::from_secs(45));
        assert_eq!(config.alert_cooldown, Duration::from_secs(120));
        assert_eq!(config.health_check_interval, Duration::from_secs(5));
        assert_eq!(config.error_threshold, 5);
    }

    #[test]
    fn test_bad_override_is_rejected() {
        let mut config = Config::default();
        let result = config.apply_overrides(|key| {
            (key == ENV_SENSOR_TIMEOUT_SECONDS).then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(ConfigError::ParseError(_))));

        let mut config = Config::default();
        let result = config.apply_overrides(|key| {
            (key == ENV_SENSOR_TIMEOUT_SECONDS).then(|| "0".to_string())
        });
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_oversized_override_is_rejected() {
        for key in [ENV_ALERT_COOLDOWN_MINUTES, ENV_ALERT_WINDOW_HOURS] {
            let mut config = Config::default();
            let result = config.apply_overrides(|k| (k == key).then(|| u64::MAX.to_string()));
            assert!(matches!(result, Err(ConfigError::ParseError(_))), "{key}");
        }

        let mut config = Config::default();
        let result = config.apply_overrides(|k| {
            (k == ENV_SENSOR_TIMEOUT_SECONDS).then(|| "18446744073709551615".to_string())
        });
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_duplicate_interval_rejected() {
        let config = Config {
            sensors: vec![SensorMapping::new(1, "rack-a"), SensorMapping::new(1, "rack-b")],
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_sensor_mapping_parse() {
        assert_eq!(
            SensorMapping::parse("1=rack-a").unwrap(),
            SensorMapping::new(1, "rack-a")
        );
        assert_eq!(
            SensorMapping::parse("10s = cold-room").unwrap(),
            SensorMapping::new(10, "cold-room")
        );
        assert!(SensorMapping::parse("rack-a").is_err());
        assert!(SensorMapping::parse("x=rack-a").is_err());
        assert!(SensorMapping::parse("1=").is_err());
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config {
            sensors: vec![SensorMapping::new(2, "freezer")],
            sensor_timeout: Duration::from_secs(12),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.sensors, config.sensors);
        assert_eq!(loaded.sensor_timeout, Duration::from_secs(12));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"sensors":[{"interval_seconds":1,"sensor_id":"a"}]}"#).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.sensors.len(), 1);
        assert_eq!(loaded.sensor_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_configured_sensor_ids() {
        let config = Config {
            sensors: vec![SensorMapping::new(1, "b"), SensorMapping::new(2, "a")],
            devices: vec![DeviceMapping {
                device_id: "event7".into(),
                sensor_id: "a".into(),
            }],
            ..Config::default()
        };
        assert_eq!(config.configured_sensor_ids(), vec!["a", "b"]);
    }
}
