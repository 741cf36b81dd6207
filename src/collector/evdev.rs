//! Linux evdev input.
//!
//! Reads `struct input_event` records straight from `/dev/input/event*`.
//! Only `EV_KEY` press and release events are kept; auto-repeat and every
//! other event type are skipped.

use super::{CollectorError, KeySource, SourceEvent};
use crate::collector::types::RawKeyEvent;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Size of `struct input_event` on 64-bit Linux.
pub const INPUT_EVENT_SIZE: usize = 24;

pub const EV_KEY: u16 = 0x01;

const VALUE_UP: i32 = 0;
const VALUE_DOWN: i32 = 1;

pub const PROC_DEVICES: &str = "/proc/bus/input/devices";

/// Device names that identify the supported sensors.
pub const DEFAULT_NAME_PATTERNS: &[&str] = &["pcsensor", "temper"];

/// Decode one `input_event` record. Returns `None` for anything that is not
/// a key press or release.
pub fn decode_record(device_id: &str, record: &[u8; INPUT_EVENT_SIZE]) -> Option<RawKeyEvent> {
    let sec = i64::from_ne_bytes(record[0..8].try_into().ok()?);
    let usec = i64::from_ne_bytes(record[8..16].try_into().ok()?);
    let kind = u16::from_ne_bytes(record[16..18].try_into().ok()?);
    let code = u16::from_ne_bytes(record[18..20].try_into().ok()?);
    let value = i32::from_ne_bytes(record[20..24].try_into().ok()?);

    if kind != EV_KEY {
        return None;
    }
    let is_down = match value {
        VALUE_DOWN => true,
        VALUE_UP => false,
        _ => return None,
    };

    let nanos = u32::try_from(usec.clamp(0, 999_999) * 1_000).unwrap_or(0);
    let timestamp = DateTime::<Utc>::from_timestamp(sec, nanos).unwrap_or_else(Utc::now);
    Some(RawKeyEvent::at(device_id, code, is_down, timestamp))
}

/// Key events from one evdev node.
pub struct EvdevSource {
    device_id: String,
    path: PathBuf,
    file: File,
}

impl EvdevSource {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CollectorError> {
        let path = path.into();
        let device_id = device_id_for(&path);
        let file = File::open(&path).map_err(|e| CollectorError::Io {
            device: path.display().to_string(),
            message: e.to_string(),
        })?;
        debug!(device_id = %device_id, path = %path.display(), "opened input device");
        Ok(Self {
            device_id,
            path,
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeySource for EvdevSource {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn next_event(&mut self) -> Result<SourceEvent, CollectorError> {
        let mut record = [0u8; INPUT_EVENT_SIZE];
        loop {
            match self.file.read_exact(&mut record) {
                Ok(()) => {
                    if let Some(event) = decode_record(&self.device_id, &record) {
                        return Ok(SourceEvent::Key(event));
                    }
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(SourceEvent::Closed),
                Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(SourceEvent::Idle),
                Err(e) => {
                    return Err(CollectorError::Io {
                        device: self.device_id.clone(),
                        message: e.to_string(),
                    })
                }
            }
        }
    }
}

/// Short device id for a node, e.g. `event3` for `/dev/input/event3`.
pub fn device_id_for(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// An input device as listed in `/proc/bus/input/devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDeviceInfo {
    pub name: String,
    pub handlers: Vec<String>,
}

impl InputDeviceInfo {
    /// The `/dev/input/event*` node of this device, if it has one.
    pub fn event_path(&self) -> Option<PathBuf> {
        self.handlers
            .iter()
            .find(|h| h.starts_with("event"))
            .map(|h| Path::new("/dev/input").join(h))
    }

    pub fn matches(&self, patterns: &[&str]) -> bool {
        let name = self.name.to_lowercase();
        patterns.iter().any(|p| name.contains(&p.to_lowercase()))
    }
}

/// Parse the contents of `/proc/bus/input/devices`.
pub fn parse_proc_devices(content: &str) -> Vec<InputDeviceInfo> {
    let mut devices = Vec::new();
    let mut name: Option<String> = None;
    let mut handlers: Vec<String> = Vec::new();

    for line in content.lines().chain(std::iter::once("")) {
        let line = line.trim();
        if line.is_empty() {
            if let Some(name) = name.take() {
                devices.push(InputDeviceInfo {
                    name,
                    handlers: std::mem::take(&mut handlers),
                });
            }
            handlers.clear();
            continue;
        }

        if let Some(rest) = line.strip_prefix("N: Name=") {
            name = Some(rest.trim_matches('"').to_string());
        } else if let Some(rest) = line.strip_prefix("H: Handlers=") {
            handlers = rest.split_whitespace().map(str::to_string).collect();
        }
    }

    devices
}

/// Event nodes of every attached device whose name matches `patterns`.
pub fn discover(patterns: &[&str]) -> Result<Vec<PathBuf>, CollectorError> {
    let content = std::fs::read_to_string(PROC_DEVICES).map_err(|e| CollectorError::Io {
        device: PROC_DEVICES.to_string(),
        message: e.to_string(),
    })?;

    let paths: Vec<PathBuf> = parse_proc_devices(&content)
        .into_iter()
        .filter(|d| d.matches(patterns))
        .filter_map(|d| d.event_path())
        .collect();
    debug!(count = paths.len(), "discovered sensor input devices");
    Ok(paths)
}
