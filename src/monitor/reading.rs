//! Attributed sensor readings and summaries over them.

use crate::decode::ParsedReading;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// A parsed reading attributed to a sensor. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor_id: String,
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity in percent
    pub humidity: f64,
    pub interval_seconds: u32,
    pub raw_text: String,
    pub observed_at: DateTime<Utc>,
}

impl SensorReading {
    pub fn new(
        sensor_id: impl Into<String>,
        parsed: &ParsedReading,
        raw_text: impl Into<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            temperature: parsed.temperature,
            humidity: parsed.humidity,
            interval_seconds: parsed.interval_seconds,
            raw_text: raw_text.into(),
            observed_at,
        }
    }
}

/// Descriptive statistics of one quantity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub mean: f64,
    /// Sample standard deviation (NaN-free: 0 for fewer than two samples)
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl SeriesStats {
    fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let std_dev = if values.len() > 1 {
            Statistics::std_dev(values.iter())
        } else {
            0.0
        };
        Some(Self {
            mean: Statistics::mean(values.iter()),
            std_dev,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Summary of a sensor's readings over a time range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingSummary {
    pub sensor_id: String,
    pub count: usize,
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
    pub temperature: SeriesStats,
    pub humidity: SeriesStats,
}

impl ReadingSummary {
    /// Summarise readings of one sensor. Returns `None` when there are none.
    pub fn from_readings(sensor_id: &str, readings: &[SensorReading]) -> Option<Self> {
        let own: Vec<&SensorReading> = readings
            .iter()
            .filter(|r| r.sensor_id == sensor_id)
            .collect();

        let temperatures: Vec<f64> = own.iter().map(|r| r.temperature).collect();
        let humidities: Vec<f64> = own.iter().map(|r| r.humidity).collect();

        Some(Self {
            sensor_id: sensor_id.to_string(),
            count: own.len(),
            first: own.iter().map(|r| r.observed_at).min()?,
            last: own.iter().map(|r| r.observed_at).max()?,
            temperature: SeriesStats::from_values(&temperatures)?,
            humidity: SeriesStats::from_values(&humidities)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reading(sensor: &str, t: f64, h: f64, offset: i64) -> SensorReading {
        let parsed = ParsedReading {
            temperature: t,
            humidity: h,
            interval_seconds: 1,
        };
        SensorReading::new(
            sensor,
            &parsed,
            format!("{t:.2}[C]{h:.2}[%RH]1S"),
            Utc::now() + Duration::seconds(offset),
        )
    }

    #[test]
    fn test_summary_statistics() {
        let readings = vec![
            reading("rack-a", 20.0, 40.0, 0),
            reading("rack-a", 22.0, 44.0, 1),
            reading("rack-a", 24.0, 48.0, 2),
            reading("rack-b", 99.0, 99.0, 3),
        ];
        let summary = ReadingSummary::from_readings("rack-a", &readings).unwrap();
        assert_eq!(summary.count, 3);
        assert!((summary.temperature.mean - 22.0).abs() < 1e-9);
        assert!((summary.temperature.std_dev - 2.0).abs() < 1e-9);
        assert_eq!(summary.temperature.min, 20.0);
        assert_eq!(summary.humidity.max, 48.0);
        assert!(summary.first < summary.last);
    }

    #[test]
    fn test_single_reading_has_zero_spread() {
        let readings = vec![reading("rack-a", 21.5, 40.0, 0)];
        let summary = ReadingSummary::from_readings("rack-a", &readings).unwrap();
        assert_eq!(summary.temperature.std_dev, 0.0);
        assert_eq!(summary.temperature.min, summary.temperature.max);
    }

    #[test]
    fn test_no_readings_no_summary() {
        assert!(ReadingSummary::from_readings("rack-a", &[]).is_none());
    }
}
