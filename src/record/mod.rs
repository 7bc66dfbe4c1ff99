//! # Record Module
//!
//! Location/motion readings and their transport-ready line form.
//!
//! This module handles:
//! - The fixed-schema [`Reading`] value produced by the acquisition side
//! - The [`Record`] line stored in the queue and posted to the collector
//! - Encoding a reading into a record and decoding it back

pub mod codec;
pub mod reading;

pub use codec::{decode, encode};
pub use reading::Reading;

use std::fmt;

use crate::error::{FieldlinkError, Result};

/// Serialized form of one [`Reading`]
///
/// A record is a single, non-empty line of text with no embedded line breaks.
/// Its identity is its position in the queue, never its content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record(String);

impl Record {
    /// Wrap an existing line as a record
    ///
    /// # Errors
    ///
    /// Returns `Parse` if the line is empty or contains `\n` or `\r`.
    pub fn from_line(line: impl Into<String>) -> Result<Self> {
        let line = line.into();

        if line.is_empty() {
            return Err(FieldlinkError::Parse("record line is empty".to_string()));
        }

        if line.contains(['\n', '\r']) {
            return Err(FieldlinkError::Parse(
                "record line contains a line break".to_string(),
            ));
        }

        Ok(Self(line))
    }

    /// The record line, without a trailing newline
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length of the line in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false: a record can never be empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_line_accepts_single_line() {
        let record = Record::from_line("{\"bus_id\":1}").unwrap();
        assert_eq!(record.as_str(), "{\"bus_id\":1}");
        assert_eq!(record.len(), 12);
        assert!(!record.is_empty());
    }

    #[test]
    fn test_from_line_rejects_empty() {
        assert!(matches!(Record::from_line(""), Err(FieldlinkError::Parse(_))));
    }

    #[test]
    fn test_from_line_rejects_line_breaks() {
        assert!(Record::from_line("a\nb").is_err());
        assert!(Record::from_line("a\r").is_err());
    }

    #[test]
    fn test_display_matches_line() {
        let record = Record::from_line("abc").unwrap();
        assert_eq!(record.to_string(), "abc");
        assert_eq!(record.into_string(), "abc");
    }
}
