//! NMEA 0183 sentence parsing for the positioning reports
//!
//! While positioning is running (`AT+KLBS=1`) the unit streams GNSS
//! sentences on the signal channel. Only two of them carry what a fix
//! needs:
//! - RMC: Recommended Minimum Navigation Information (time, date, position)
//! - GST: Pseudorange Noise Statistics (error ellipse, used as accuracy)
//!
//! Everything else is kept as [`NmeaSentence::Other`].

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use thiserror::Error;

/// NMEA sentence types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NmeaSentenceType {
    RMC, // Recommended minimum
    GST, // Pseudorange noise statistics
    Unknown(String),
}

impl NmeaSentenceType {
    pub fn from_tag(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "RMC" | "GPRMC" | "GNRMC" => Self::RMC,
            "GST" | "GPGST" | "GNGST" => Self::GST,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Geographic coordinate
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Coordinate {
    pub degrees: f64,
    pub direction: char, // N/S for lat, E/W for lon
}

impl Coordinate {
    /// Parse NMEA coordinate format (DDDMM.MMMM)
    pub fn parse(value: &str, direction: &str) -> Option<Self> {
        if value.is_empty() || direction.is_empty() {
            return None;
        }

        let value: f64 = value.parse().ok()?;
        let dir = direction.chars().next()?;

        let degrees = (value / 100.0).floor();
        let minutes = value - (degrees * 100.0);
        let decimal_degrees = degrees + (minutes / 60.0);

        Some(Self {
            degrees: decimal_degrees,
            direction: dir,
        })
    }

    /// Signed decimal degrees, north and east positive
    pub fn to_decimal(&self) -> f64 {
        match self.direction {
            'S' | 'W' => -self.degrees,
            _ => self.degrees,
        }
    }
}

/// Parsed RMC sentence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RmcData {
    pub time: Option<NaiveTime>,
    pub status: char, // A=Active, V=Void
    pub latitude: Option<Coordinate>,
    pub longitude: Option<Coordinate>,
    pub date: Option<NaiveDate>,
}

impl RmcData {
    /// Does the receiver report a valid fix?
    pub fn is_valid(&self) -> bool {
        self.status == 'A'
    }

    /// UTC instant of the fix
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        Some(self.date?.and_time(self.time?).and_utc())
    }
}

/// Parsed GST sentence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GstData {
    /// Raw UTC time field, empty when the report is not tied to a fix
    pub time_field: String,
    pub rms: Option<f64>,
    pub semi_major: Option<f64>,
    pub semi_minor: Option<f64>,
}

impl GstData {
    /// Is this report associated with a measurement epoch?
    pub fn has_time(&self) -> bool {
        !self.time_field.is_empty()
    }

    /// Worst axis of the error ellipse, in meters
    pub fn accuracy(&self) -> Option<f64> {
        match (self.semi_major, self.semi_minor) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Generic NMEA sentence
#[derive(Debug, Clone, PartialEq)]
pub enum NmeaSentence {
    Rmc(RmcData),
    Gst(GstData),
    Other { sentence_type: String, fields: Vec<String> },
}

/// NMEA parser errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NmeaError {
    #[error("not an NMEA sentence")]
    InvalidFormat,
    #[error("checksum mismatch: expected {expected:02X}, got {got:02X}")]
    ChecksumMismatch { expected: u8, got: u8 },
    #[error("{0}")]
    ParseError(String),
}

/// Calculate NMEA checksum
pub fn calculate_checksum(data: &str) -> u8 {
    data.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Verify NMEA sentence checksum, `Ok(false)` when none is present
pub fn verify_checksum(sentence: &str) -> Result<bool, NmeaError> {
    let sentence = sentence.trim();
    if !sentence.starts_with('$') && !sentence.starts_with('!') {
        return Err(NmeaError::InvalidFormat);
    }

    let Some(star_pos) = sentence.rfind('*') else {
        return Ok(false);
    };
    let data = &sentence[1..star_pos];
    let checksum_str = &sentence[star_pos + 1..];

    let expected = u8::from_str_radix(checksum_str.trim(), 16)
        .map_err(|_| NmeaError::ParseError("Invalid checksum format".to_string()))?;

    let calculated = calculate_checksum(data);
    if calculated != expected {
        return Err(NmeaError::ChecksumMismatch {
            expected,
            got: calculated,
        });
    }
    Ok(true)
}

/// Parse time from HHMMSS.sss format
fn parse_time(s: &str) -> Option<NaiveTime> {
    if s.len() < 6 || !s.is_char_boundary(2) || !s.is_char_boundary(4) {
        return None;
    }

    let hours: u32 = s[0..2].parse().ok()?;
    let minutes: u32 = s[2..4].parse().ok()?;
    let seconds: f64 = s[4..].parse().ok()?;

    let secs = seconds.floor() as u32;
    let nanos = ((seconds - seconds.floor()) * 1_000_000_000.0).round() as u32;

    NaiveTime::from_hms_nano_opt(hours, minutes, secs, nanos)
}

/// Parse date from DDMMYY format; the unit only reports 20xx dates
fn parse_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 6 || !s.is_ascii() {
        return None;
    }

    let day: u32 = s[0..2].parse().ok()?;
    let month: u32 = s[2..4].parse().ok()?;
    let year: i32 = s[4..6].parse().ok()?;

    NaiveDate::from_ymd_opt(2000 + year, month, day)
}

fn field<'a>(fields: &[&'a str], index: usize) -> &'a str {
    fields.get(index).copied().unwrap_or_default()
}

fn parse_rmc(fields: &[&str]) -> RmcData {
    RmcData {
        time: parse_time(field(fields, 1)),
        status: field(fields, 2).chars().next().unwrap_or('V'),
        latitude: Coordinate::parse(field(fields, 3), field(fields, 4)),
        longitude: Coordinate::parse(field(fields, 5), field(fields, 6)),
        date: parse_date(field(fields, 9)),
    }
}

fn parse_gst(fields: &[&str]) -> GstData {
    GstData {
        time_field: field(fields, 1).to_string(),
        rms: field(fields, 2).parse().ok(),
        semi_major: field(fields, 3).parse().ok(),
        semi_minor: field(fields, 4).parse().ok(),
    }
}

impl NmeaSentence {
    /// Parse a single NMEA sentence
    pub fn parse(sentence: &str) -> Result<Self, NmeaError> {
        let sentence = sentence.trim();
        verify_checksum(sentence)?;

        let data = match sentence.rfind('*') {
            Some(star_pos) => &sentence[1..star_pos],
            None => &sentence[1..],
        };
        let fields: Vec<&str> = data.split(',').collect();

        Ok(match NmeaSentenceType::from_tag(fields[0]) {
            NmeaSentenceType::RMC => Self::Rmc(parse_rmc(&fields)),
            NmeaSentenceType::GST => Self::Gst(parse_gst(&fields)),
            NmeaSentenceType::Unknown(t) => Self::Other {
                sentence_type: t,
                fields: fields[1..].iter().map(|s| s.to_string()).collect(),
            },
        })
    }
}
