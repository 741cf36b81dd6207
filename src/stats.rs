//! Ingest statistics.
//!
//! Counts what the agent has seen, without keeping any of it, and persists
//! the totals so `hidsense status` can report them between runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::decode::LineClass;

pub const STATS_FILE: &str = "ingest_stats.json";

#[derive(Debug)]
pub struct IngestStats {
    lines: AtomicU64,
    readings: AtomicU64,
    banners: AtomicU64,
    unknown: AtomicU64,
    /// Readings outside the accepted range
    rejected: AtomicU64,
    /// Events dropped because the pipeline was behind
    dropped: AtomicU64,
    alerts: AtomicU64,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            lines: AtomicU64::new(0),
            readings: AtomicU64::new(0),
            banners: AtomicU64::new(0),
            unknown: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            alerts: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Stats that continue from, and save back to, `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);
        if let Err(e) = stats.load() {
            debug!(error = %e, "no previous ingest stats loaded");
        }
        stats
    }

    /// Count one classified line.
    pub fn record_line(&self, class: &LineClass) {
        self.lines.fetch_add(1, Ordering::Relaxed);
        let counter = match class {
            LineClass::Reading(_) => &self.readings,
            LineClass::Banner(_) => &self.banners,
            LineClass::Unknown(_) => &self.unknown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alerts(&self, count: u64) {
        self.alerts.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines: self.lines.load(Ordering::Relaxed),
            readings: self.readings.load(Ordering::Relaxed),
            banners: self.banners.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            alerts: self.alerts.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    pub fn summary(&self) -> String {
        self.snapshot().summary()
    }

    pub fn save(&self) -> Result<(), std::io::Error> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let snapshot = self.snapshot();
        let persisted = PersistedStats {
            lines: snapshot.lines,
            readings: snapshot.readings,
            banners: snapshot.banners,
            unknown: snapshot.unknown,
            rejected: snapshot.rejected,
            dropped: snapshot.dropped,
            alerts: snapshot.alerts,
            last_updated: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let persisted = read_persisted(path)?;
        self.lines.store(persisted.lines, Ordering::Relaxed);
        self.readings.store(persisted.readings, Ordering::Relaxed);
        self.banners.store(persisted.banners, Ordering::Relaxed);
        self.unknown.store(persisted.unknown, Ordering::Relaxed);
        self.rejected.store(persisted.rejected, Ordering::Relaxed);
        self.dropped.store(persisted.dropped, Ordering::Relaxed);
        self.alerts.store(persisted.alerts, Ordering::Relaxed);
        Ok(())
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub lines: u64,
    pub readings: u64,
    pub banners: u64,
    pub unknown: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub alerts: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

impl StatsSnapshot {
    pub fn summary(&self) -> String {
        format!(
            "Ingest Statistics:\n\
             - Lines decoded: {}\n\
             - Readings: {}\n\
             - Banners: {}\n\
             - Unrecognised lines: {}\n\
             - Out-of-range readings: {}\n\
             - Dropped events: {}\n\
             - Alerts raised: {}\n\
             - Session duration: {} seconds",
            self.lines,
            self.readings,
            self.banners,
            self.unknown,
            self.rejected,
            self.dropped,
            self.alerts,
            self.session_duration_secs
        )
    }
}

/// On-disk form of the counters.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedStats {
    pub lines: u64,
    pub readings: u64,
    pub banners: u64,
    pub unknown: u64,
    pub rejected: u64,
    #[serde(default)]
    pub dropped: u64,
    pub alerts: u64,
    pub last_updated: DateTime<Utc>,
}

pub fn read_persisted(path: &std::path::Path) -> Result<PersistedStats, std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(std::io::Error::other)
}

pub type SharedStats = Arc<IngestStats>;

pub fn create_shared_stats() -> SharedStats {
    Arc::new(IngestStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedStats {
    Arc::new(IngestStats::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::ParsedReading;

    #[test]
    fn test_counts_by_class() {
        let stats = IngestStats::new();
        stats.record_line(&LineClass::Reading(ParsedReading {
            temperature: 20.0,
            humidity: 40.0,
            interval_seconds: 1,
        }));
        stats.record_line(&LineClass::Banner("PCSENSOR".into()));
        stats.record_line(&LineClass::Unknown("???".into()));
        stats.record_line(&LineClass::Unknown("!!!".into()));
        stats.record_rejected();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.lines, 4);
        assert_eq!(snapshot.readings, 1);
        assert_eq!(snapshot.banners, 1);
        assert_eq!(snapshot.unknown, 2);
        assert_eq!(snapshot.rejected, 1);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STATS_FILE);

        let stats = IngestStats::with_persistence(path.clone());
        stats.record_alerts(3);
        stats.record_dropped();
        stats.save().unwrap();

        let reloaded = IngestStats::with_persistence(path);
        let snapshot = reloaded.snapshot();
        assert_eq!(snapshot.alerts, 3);
        assert_eq!(snapshot.dropped, 1);
    }

    #[test]
    fn test_summary_format() {
        let summary = IngestStats::new().summary();
        assert!(summary.contains("Lines decoded: 0"));
        assert!(summary.contains("Alerts raised"));
    }
}
