//! Replays recorded sensor text as keystrokes.
//!
//! Each line of the input is typed out the way a sensor would, so the
//! whole decode path runs exactly as it does for a live device.

use super::{CollectorError, KeySource, SourceEvent};
use crate::collector::types::RawKeyEvent;
use crate::decode::keystrokes_for;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

pub struct ReplaySource {
    device_id: String,
    pending: VecDeque<RawKeyEvent>,
    lines: VecDeque<String>,
    /// Pause between two lines
    pace: Duration,
}

impl ReplaySource {
    pub fn new(device_id: impl Into<String>, text: &str) -> Self {
        Self {
            device_id: device_id.into(),
            pending: VecDeque::new(),
            lines: text.lines().map(str::to_string).collect(),
            pace: Duration::ZERO,
        }
    }

    pub fn from_file(device_id: impl Into<String>, path: &Path) -> Result<Self, CollectorError> {
        let text = std::fs::read_to_string(path).map_err(|e| CollectorError::Io {
            device: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self::new(device_id, &text))
    }

    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    /// Lines not yet typed.
    pub fn remaining_lines(&self) -> usize {
        self.lines.len()
    }
}

impl KeySource for ReplaySource {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn next_event(&mut self) -> Result<SourceEvent, CollectorError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(SourceEvent::Key(event));
        }

        let Some(line) = self.lines.pop_front() else {
            return Ok(SourceEvent::Closed);
        };
        if !self.pace.is_zero() {
            std::thread::sleep(self.pace);
        }
        self.pending
            .extend(keystrokes_for(&self.device_id, &format!("{line}\n")));
        Ok(self
            .pending
            .pop_front()
            .map(SourceEvent::Key)
            .unwrap_or(SourceEvent::Idle))
    }
}
