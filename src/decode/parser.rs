//! Reading extraction from decoded lines.
//!
//! Devices emit `<temp>[C]<humidity>[%RH]<interval>S`, but spacing and tab
//! placement vary between units and firmware revisions. Formats are tried in
//! order and the first one that matches decides the result.

use serde::{Deserialize, Serialize};

pub const MIN_TEMPERATURE: f64 = -50.0;
pub const MAX_TEMPERATURE: f64 = 100.0;
pub const MIN_HUMIDITY: f64 = 0.0;
pub const MAX_HUMIDITY: f64 = 100.0;

/// Values extracted from one reading line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParsedReading {
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity in percent
    pub humidity: f64,
    /// Sampling interval reported by the device
    pub interval_seconds: u32,
}

/// Why a line did not yield a reading.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// No known format matched
    NoMatch,
    /// A format matched but a number did not convert
    InvalidNumber(String),
    /// Values outside the plausible sensor range
    OutOfRange { temperature: f64, humidity: f64 },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::NoMatch => write!(f, "line matches no reading format"),
            ParseError::InvalidNumber(s) => write!(f, "invalid number: {s}"),
            ParseError::OutOfRange {
                temperature,
                humidity,
            } => write!(
                f,
                "reading out of range: {temperature}°C, {humidity}%RH"
            ),
        }
    }
}

impl std::error::Error for ParseError {}

/// Raw fields as captured by a format, before numeric conversion.
struct Captured<'a> {
    temperature: &'a str,
    humidity: &'a str,
    interval: &'a str,
}

/// A format sees both the line as typed and the line with all whitespace removed.
type Format = for<'a> fn(&'a str, &'a str) -> Option<Captured<'a>>;

/// Formats in preference order.
const FORMATS: &[(&str, Format)] = &[("canonical", canonical), ("loose", loose)];

/// Parse a line, returning `None` for anything that is not a valid reading.
pub fn parse(line: &str) -> Option<ParsedReading> {
    parse_detailed(line).ok()
}

/// Parse a line, keeping the reason for rejection.
pub fn parse_detailed(line: &str) -> Result<ParsedReading, ParseError> {
    let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();

    for (name, format) in FORMATS {
        if let Some(captured) = format(line, &compact) {
            tracing::trace!(format = %name, "reading format matched");
            return convert(captured);
        }
    }

    Err(ParseError::NoMatch)
}

fn convert(captured: Captured<'_>) -> Result<ParsedReading, ParseError> {
    let temperature: f64 = captured
        .temperature
        .parse()
        .map_err(|_| ParseError::InvalidNumber(captured.temperature.to_string()))?;
    let humidity: f64 = captured
        .humidity
        .parse()
        .map_err(|_| ParseError::InvalidNumber(captured.humidity.to_string()))?;
    let interval_seconds: u32 = captured
        .interval
        .parse()
        .map_err(|_| ParseError::InvalidNumber(captured.interval.to_string()))?;

    let temperature_ok = (MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&temperature);
    let humidity_ok = (MIN_HUMIDITY..=MAX_HUMIDITY).contains(&humidity);
    if !temperature_ok || !humidity_ok {
        return Err(ParseError::OutOfRange {
            temperature,
            humidity,
        });
    }

    Ok(ParsedReading {
        temperature,
        humidity,
        interval_seconds,
    })
}

/// `<float>\s*[C]\s*<float>\s*[%RH]\s*<int>S`, matching the whole line.
fn canonical<'a>(line: &'a str, _compact: &'a str) -> Option<Captured<'a>> {
    let mut cursor = Cursor::new(line.trim());
    let temperature = cursor.float()?;
    cursor.skip_whitespace();
    cursor.literal("[C]")?;
    cursor.skip_whitespace();
    let humidity = cursor.float()?;
    cursor.skip_whitespace();
    cursor.literal("[%RH]")?;
    cursor.skip_whitespace();
    let interval = cursor.integer()?;
    cursor.literal("S")?;
    cursor.at_end().then_some(Captured {
        temperature,
        humidity,
        interval,
    })
}

/// Same shape on whitespace-stripped input, tolerating leading and trailing noise.
fn loose<'a>(_line: &'a str, compact: &'a str) -> Option<Captured<'a>> {
    let upper = compact.to_ascii_uppercase();
    let marker = upper.find("[C]")?;

    let head = &compact[..marker];
    let start = trailing_float_start(head)?;
    let temperature = &head[start..];

    let mut cursor = Cursor::new(&compact[marker + "[C]".len()..]);
    let humidity = cursor.float()?;
    cursor.literal("[%RH]")?;
    let interval = cursor.integer()?;
    cursor.literal("S")?;

    Some(Captured {
        temperature,
        humidity,
        interval,
    })
}

/// Start index of the float that ends `s`, if any.
fn trailing_float_start(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut start = bytes.len();
    let mut seen_dot = false;
    while start > 0 {
        let b = bytes[start - 1];
        if b.is_ascii_digit() {
            start -= 1;
        } else if b == b'.' && !seen_dot {
            seen_dot = true;
            start -= 1;
        } else {
            break;
        }
    }
    if start > 0 && bytes[start - 1] == b'-' {
        start -= 1;
    }
    let candidate = &s[start..];
    candidate
        .bytes()
        .any(|b| b.is_ascii_digit())
        .then_some(start)
}

/// Minimal ASCII scanner over a line.
struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn digits(&mut self) -> usize {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        self.pos - start
    }

    /// `[-+]?\d+(\.\d*)?` or `[-+]?\.\d+`
    fn float(&mut self) -> Option<&'a str> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'-') | Some(b'+')) {
            self.pos += 1;
        }
        let mut count = self.digits();
        if self.peek() == Some(b'.') {
            self.pos += 1;
            count += self.digits();
        }
        if count == 0 {
            self.pos = start;
            return None;
        }
        Some(&self.input[start..self.pos])
    }

    fn integer(&mut self) -> Option<&'a str> {
        let start = self.pos;
        if self.digits() == 0 {
            return None;
        }
        Some(&self.input[start..self.pos])
    }

    /// Case-insensitive literal.
    fn literal(&mut self, expected: &str) -> Option<()> {
        let end = self.pos + expected.len();
        let found = self.input.get(self.pos..end)?;
        if found.eq_ignore_ascii_case(expected) {
            self.pos = end;
            Some(())
        } else {
            None
        }
    }

    fn at_end(&self) -> bool {
        self.pos == self.input.len()
    }
}
