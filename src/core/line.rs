//! Classified signal channel lines

use std::fmt;

/// What a received line carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// `$`-prefixed positioning report, split on the first comma
    Location { key: String, value: String },
    /// `+`-prefixed result report `+KEY: value`, key without the `+`
    Result { key: String, value: String },
    /// Command echo, final result codes and connection markers
    Plain,
}

/// One line received on the signal channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    text: String,
    kind: LineKind,
}

impl Line {
    /// Classify a line by its first character
    ///
    /// Returns `None` for `$`/`+` lines that do not have the key/value
    /// shape their prefix promises; such noise is not routed anywhere.
    pub fn classify(text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        let kind = if text.starts_with('$') {
            let (key, value) = text.split_once(',')?;
            LineKind::Location {
                key: key.to_string(),
                value: value.to_string(),
            }
        } else if text.starts_with('+') {
            let (key, value) = split_result(&text)?;
            LineKind::Result {
                key: key[1..].to_string(),
                value: value.to_string(),
            }
        } else {
            LineKind::Plain
        };
        Some(Self { text, kind })
    }

    /// Plain line, bypassing classification
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: LineKind::Plain,
        }
    }

    /// Raw text without the line terminator
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> &LineKind {
        &self.kind
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.text.starts_with(prefix)
    }

    pub fn is_location(&self) -> bool {
        matches!(self.kind, LineKind::Location { .. })
    }

    pub fn is_result(&self) -> bool {
        matches!(self.kind, LineKind::Result { .. })
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Split `+KEY: value` at the first colon that is followed by whitespace
fn split_result(text: &str) -> Option<(&str, &str)> {
    let bytes = text.as_bytes();
    let colon = (0..bytes.len().saturating_sub(1))
        .find(|&i| bytes[i] == b':' && bytes[i + 1].is_ascii_whitespace())?;
    Some((&text[..colon], &text[colon + 2..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_line() {
        let line = Line::classify("$GNRMC,123519.00,A").unwrap();
        assert_eq!(
            line.kind(),
            &LineKind::Location { key: "$GNRMC".into(), value: "123519.00,A".into() }
        );
        assert!(Line::classify("$GNTXT").is_none());
    }

    #[test]
    fn test_result_line() {
        let line = Line::classify("+CCLK: \"24/01/01,00:00:00+36\"").unwrap();
        assert_eq!(
            line.kind(),
            &LineKind::Result { key: "CCLK".into(), value: "\"24/01/01,00:00:00+36\"".into() }
        );
        let line = Line::classify("+KGTEMP:  +31").unwrap();
        assert_eq!(line.kind(), &LineKind::Result { key: "KGTEMP".into(), value: " +31".into() });
    }

    #[test]
    fn test_malformed_result_dropped() {
        assert!(Line::classify("+CME ERROR").is_none());
        assert!(Line::classify("+X:1").is_none());
        assert!(Line::classify("+").is_none());
    }

    #[test]
    fn test_plain_line() {
        let line = Line::classify("NO CARRIER4NP:4").unwrap();
        assert_eq!(line.kind(), &LineKind::Plain);
        assert_eq!(line.text(), "NO CARRIER4NP:4");
    }
}
