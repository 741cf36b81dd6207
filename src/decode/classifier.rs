//! Line classification.
//!
//! Every decoded line is exactly one of: a structured reading, a banner the
//! device types to identify itself, or something we cannot interpret. All
//! three count as proof that the device is alive.

use crate::decode::parser::{self, ParseError, ParsedReading};
use serde::{Deserialize, Serialize};

/// Substrings (compared case-insensitively) that mark a self-identification line.
pub const BANNER_MARKERS: &[&str] = &[
    "PCSENSOR",
    "WWW.",
    "CAPS LOCK",
    "NUM LOCK",
    "TYPE:",
    "TEMPERHUM",
    "TEMPER",
];

/// Outcome of classifying a line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LineClass {
    Reading(ParsedReading),
    Banner(String),
    Unknown(String),
}

impl LineClass {
    pub fn kind(&self) -> &'static str {
        match self {
            LineClass::Reading(_) => "reading",
            LineClass::Banner(_) => "banner",
            LineClass::Unknown(_) => "unknown",
        }
    }

    pub fn reading(&self) -> Option<&ParsedReading> {
        match self {
            LineClass::Reading(reading) => Some(reading),
            _ => None,
        }
    }
}

/// Check whether a line identifies the device rather than reporting data.
pub fn is_banner(line: &str) -> bool {
    let upper = line.to_uppercase();
    BANNER_MARKERS.iter().any(|marker| upper.contains(marker))
}

/// Classify a line. Never fails.
pub fn classify(line: &str) -> LineClass {
    classify_detailed(line).0
}

/// Classify a line and keep the parse error, if any, for lines that looked
/// like readings but were rejected.
pub fn classify_detailed(line: &str) -> (LineClass, Option<ParseError>) {
    if is_banner(line) {
        return (LineClass::Banner(line.to_string()), None);
    }

    match parser::parse_detailed(line) {
        Ok(reading) => (LineClass::Reading(reading), None),
        Err(ParseError::NoMatch) => (LineClass::Unknown(line.to_string()), None),
        Err(e) => (LineClass::Unknown(line.to_string()), Some(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_lines() {
        for line in [
            "WWW.PCSENSOR.COM",
            "www.pcsensor.com",
            "Caps Lock: on/off",
            "NUM LOCK",
            "Type:TEMPerHum v1.2",
        ] {
            assert!(matches!(classify(line), LineClass::Banner(_)), "{line}");
        }
    }

    #[test]
    fn test_reading_line() {
        match classify("29.54[C]39.58[%RH]1S") {
            LineClass::Reading(reading) => assert_eq!(reading.interval_seconds, 1),
            other => panic!("expected reading, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_line() {
        assert_eq!(
            classify("hello world"),
            LineClass::Unknown("hello world".to_string())
        );
    }

    #[test]
    fn test_out_of_range_is_unknown_with_error() {
        let (class, error) = classify_detailed("200.00[C]39.58[%RH]1S");
        assert_eq!(class.kind(), "unknown");
        assert!(matches!(error, Some(ParseError::OutOfRange { .. })));
    }

    #[test]
    fn test_banner_wins_over_reading() {
        let class = classify("TYPE: 29.54[C]39.58[%RH]1S");
        assert_eq!(class.kind(), "banner");
        assert!(class.reading().is_none());
    }
}
