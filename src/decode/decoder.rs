//! Keystroke to line reassembly.
//!
//! Each device types its readings one key at a time. The decoder keeps one
//! pending line per device and emits it when the device presses enter.

use crate::collector::keymap::{self, LINE_TERMINATOR};
use crate::collector::types::{DecodedLine, RawKeyEvent};
use std::collections::HashMap;
use tracing::warn;

/// Upper bound on the pending text of a single device.
pub const MAX_LINE_LEN: usize = 4096;

/// Pending text for one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceLineBuffer {
    pub device_id: String,
    pending_text: String,
    shift: bool,
}

impl DeviceLineBuffer {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            pending_text: String::new(),
            shift: false,
        }
    }

    /// Text typed since the last terminator. Never contains a terminator.
    pub fn pending_text(&self) -> &str {
        &self.pending_text
    }

    fn take_line(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.pending_text);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// Reassembles key events into lines, one buffer per device.
#[derive(Debug)]
pub struct KeystrokeDecoder {
    buffers: HashMap<String, DeviceLineBuffer>,
    max_line_len: usize,
}

impl KeystrokeDecoder {
    pub fn new() -> Self {
        Self::with_max_line_len(MAX_LINE_LEN)
    }

    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            max_line_len,
        }
    }

    /// Feed one key event. Returns a line when the event completes one.
    pub fn feed(&mut self, device_id: &str, event: &RawKeyEvent) -> Option<DecodedLine> {
        let buffer = self
            .buffers
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceLineBuffer::new(device_id));

        if keymap::is_shift(event.code) {
            buffer.shift = event.is_down;
            return None;
        }

        if !event.is_down {
            return None;
        }

        let ch = keymap::key_to_char(event.code, buffer.shift)?;

        if ch == LINE_TERMINATOR {
            return buffer.take_line().map(|text| DecodedLine {
                device_id: device_id.to_string(),
                text,
                observed_at: event.timestamp,
            });
        }

        if buffer.pending_text.len() >= self.max_line_len {
            warn!(
                device_id,
                discarded = buffer.pending_text.len(),
                "line buffer overflow, discarding pending text"
            );
            buffer.pending_text.clear();
            return None;
        }

        buffer.pending_text.push(ch);
        None
    }

    /// Pending buffer for a device, if it has typed anything yet.
    pub fn buffer(&self, device_id: &str) -> Option<&DeviceLineBuffer> {
        self.buffers.get(device_id)
    }

    /// Drop all pending text (e.g. on stop).
    pub fn reset(&mut self) {
        self.buffers.clear();
    }
}

impl Default for KeystrokeDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the key events that type `text` on a device, shift included.
///
/// Characters without a key are skipped.
pub fn keystrokes_for(device_id: &str, text: &str) -> Vec<RawKeyEvent> {
    let mut events = Vec::new();
    for ch in text.chars() {
        let Some((code, shifted)) = keymap::char_to_key(ch) else {
            continue;
        };
        if shifted {
            events.push(RawKeyEvent::new(device_id, keymap::KEY_LEFTSHIFT, true));
        }
        events.push(RawKeyEvent::new(device_id, code, true));
        events.push(RawKeyEvent::new(device_id, code, false));
        if shifted {
            events.push(RawKeyEvent::new(device_id, keymap::KEY_LEFTSHIFT, false));
        }
    }
    events
}
