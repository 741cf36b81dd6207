//! Decoding of keystroke streams into typed sensor lines.
//!
//! - Reassembly of key events into lines, per device
//! - Classification into readings, banners and unknown lines
//! - Extraction of temperature, humidity and interval from readings

pub mod classifier;
pub mod decoder;
pub mod parser;

// Re-export commonly used types
pub use classifier::{classify, classify_detailed, is_banner, LineClass};
pub use decoder::{keystrokes_for, DeviceLineBuffer, KeystrokeDecoder, MAX_LINE_LEN};
pub use parser::{parse, parse_detailed, ParseError, ParsedReading};
