//! The single owner of monitor state.
//!
//! Device workers only decode and classify; everything that has to agree
//! across devices (identity, health, cooldowns, the latest reading of each
//! sensor) lives here and is touched from one thread.

use crate::collector::types::SensorEvent;
use crate::config::Config;
use crate::decode::LineClass;
use crate::monitor::alerts::{AlertConfig, AlertEngine, ConnectionAlert};
use crate::monitor::health::{Evidence, HealthConfig, HealthMonitor, Transition};
use crate::monitor::identity::{SensorIdentityResolver, UNASSIGNED};
use crate::monitor::reading::SensorReading;
use crate::publish::Fanout;
use crate::stats::{create_shared_stats, SharedStats};
use crate::store::SharedStore;
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct Pipeline {
    resolver: SensorIdentityResolver,
    health: HealthMonitor,
    alerts: AlertEngine,
    latest: BTreeMap<String, SensorReading>,
    /// Sensor each device last sent a mapped reading for
    claims: HashMap<String, String>,
    configured: HashSet<String>,
    store: SharedStore,
    publishers: Fanout,
    stats: SharedStats,
    tick_interval: Duration,
}

impl Pipeline {
    pub fn new(config: &Config, store: SharedStore, publishers: Fanout) -> Self {
        Self {
            resolver: SensorIdentityResolver::from_config(config),
            health: HealthMonitor::new(HealthConfig::from_config(config)),
            alerts: AlertEngine::new(AlertConfig::from_config(config)),
            latest: BTreeMap::new(),
            claims: HashMap::new(),
            configured: config.configured_sensor_ids().into_iter().collect(),
            store,
            publishers,
            stats: create_shared_stats(),
            tick_interval: config.health_check_interval,
        }
    }

    pub fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_resolver(mut self, resolver: SensorIdentityResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Track the configured sensors from `at`, before they send anything.
    pub fn register_sensors<I, S>(&mut self, sensor_ids: I, at: DateTime<Utc>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in sensor_ids {
            self.health.register(id.as_ref(), at);
        }
    }

    /// Apply one classified line. Returns the reading it produced, if any.
    pub fn handle_event(&mut self, event: SensorEvent) -> Option<SensorReading> {
        self.stats.record_line(&event.class);
        let at = event.observed_at;

        let (sensor_id, evidence) = match &event.class {
            LineClass::Reading(parsed) => (
                self.reading_sensor(&event.device_id, parsed.interval_seconds),
                Evidence::Reading,
            ),
            LineClass::Banner(_) => (self.device_sensor(&event.device_id), Evidence::Banner),
            LineClass::Unknown(_) => (self.device_sensor(&event.device_id), Evidence::Unknown),
        };
        debug!(
            device_id = %event.device_id,
            sensor_id = %sensor_id,
            kind = event.class.kind(),
            "line"
        );

        if let Some(transition) = self.health.record_evidence(&sensor_id, evidence, at) {
            self.on_transition(&transition);
        }

        if let Some(reason) = &event.rejection {
            warn!(
                device_id = %event.device_id,
                sensor_id = %sensor_id,
                error = %reason,
                "rejected reading"
            );
            self.stats.record_rejected();
            if let Some(transition) = self.health.record_error(&sensor_id, reason.clone(), at) {
                self.on_transition(&transition);
            }
        }

        let LineClass::Reading(parsed) = &event.class else {
            return None;
        };
        let reading = SensorReading::new(&sensor_id, parsed, event.raw_text, at);

        if let Err(e) = self.store.append_reading(&reading) {
            warn!(sensor_id = %sensor_id, error = %e, "failed to store reading");
        }
        self.publishers.reading(&reading);
        self.latest.insert(sensor_id, reading.clone());
        Some(reading)
    }

    /// Sensor for a reading. A reading whose interval is in the table also
    /// claims the device it came from.
    fn reading_sensor(&mut self, device_id: &str, interval_seconds: u32) -> String {
        let sensor_id = self.resolver.resolve(device_id, Some(interval_seconds));
        if self.resolver.knows_interval(interval_seconds) {
            self.claim(device_id, &sensor_id);
        }
        sensor_id
    }

    /// Sensor for a line that carries no interval: the sensor that claimed
    /// the device, else the only unclaimed interval sensor, else the
    /// device fallback.
    fn device_sensor(&self, device_id: &str) -> String {
        if let Some(sensor_id) = self.claims.get(device_id) {
            return sensor_id.clone();
        }
        if !self.resolver.maps_device(device_id) {
            let mut unclaimed = self
                .resolver
                .interval_sensors()
                .into_iter()
                .filter(|id| !self.claims.values().any(|claimed| claimed.as_str() == *id));
            if let (Some(only), None) = (unclaimed.next(), unclaimed.next()) {
                return only.to_string();
            }
        }
        self.resolver.resolve_device(device_id)
    }

    fn claim(&mut self, device_id: &str, sensor_id: &str) {
        if self.claims.get(device_id).map(String::as_str) == Some(sensor_id) {
            return;
        }
        info!(device_id, sensor_id, "device attributed to sensor");
        self.claims
            .insert(device_id.to_string(), sensor_id.to_string());

        // Evidence seen before the claim may have landed on the device itself.
        let fallback = self.resolver.resolve_device(device_id);
        if fallback != sensor_id
            && fallback != UNASSIGNED
            && !self.configured.contains(&fallback)
            && self.health.forget(&fallback).is_some()
        {
            debug!(device_id, sensor_id = %fallback, "dropped device fallback record");
        }
    }

    /// Re-evaluate health at `now`, raise alerts and persist a health row
    /// per sensor. Returns the alerts raised.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<ConnectionAlert> {
        let mut raised = Vec::new();
        for transition in self.health.tick(now) {
            if let Some(alert) = self.on_transition(&transition) {
                raised.push(alert);
            }
        }
        self.alerts.prune(now);

        if let Err(e) = self.store.append_health(&self.health.records(now)) {
            warn!(error = %e, "failed to store health records");
        }
        raised
    }

    fn on_transition(&mut self, transition: &Transition) -> Option<ConnectionAlert> {
        info!(
            sensor_id = %transition.sensor_id,
            from = %transition.from,
            to = %transition.to,
            "health transition"
        );
        self.publishers
            .availability(&transition.sensor_id, transition.to, transition.at);

        let alert = self.alerts.handle(transition)?;
        self.stats.record_alerts(1);
        if let Err(e) = self.store.append_alert(&alert) {
            warn!(sensor_id = %alert.sensor_id, error = %e, "failed to store alert");
        }
        self.publishers.alert(&alert);
        Some(alert)
    }

    /// Consume events and tick every `tick_interval` until `running` is
    /// cleared. Health keeps being evaluated after every device worker has
    /// gone, so sensors that stop sending still go offline.
    pub fn run(&mut self, receiver: &Receiver<SensorEvent>, running: &AtomicBool) {
        let poll = self.tick_interval.min(Duration::from_millis(100));
        let mut last_tick = Instant::now();
        let mut connected = true;

        while running.load(Ordering::SeqCst) {
            if connected {
                match receiver.recv_timeout(poll) {
                    Ok(event) => {
                        self.handle_event(event);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        warn!("all device workers have stopped, monitoring health only");
                        connected = false;
                    }
                }
            } else {
                std::thread::sleep(poll);
            }

            if last_tick.elapsed() >= self.tick_interval {
                self.tick(Utc::now());
                last_tick = Instant::now();
            }
        }

        // Whatever is already queued still counts.
        while let Ok(event) = receiver.try_recv() {
            self.handle_event(event);
        }
        self.tick(Utc::now());
    }

    /// Consume events until every sender is gone, then tick once. For
    /// finite sources such as replays.
    pub fn drain(&mut self, receiver: &Receiver<SensorEvent>, running: &AtomicBool) {
        let mut last_tick = Instant::now();

        while running.load(Ordering::SeqCst) {
            match receiver.recv_timeout(self.tick_interval) {
                Ok(event) => {
                    self.handle_event(event);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if last_tick.elapsed() >= self.tick_interval {
                self.tick(Utc::now());
                last_tick = Instant::now();
            }
        }
        self.tick(Utc::now());
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    pub fn latest(&self, sensor_id: &str) -> Option<&SensorReading> {
        self.latest.get(sensor_id)
    }

    /// Latest reading of every sensor, ordered by sensor id.
    pub fn latest_readings(&self) -> impl Iterator<Item = &SensorReading> {
        self.latest.values()
    }
}
