//! Normalization of formatted sample timestamps.
//!
//! Results files store the `timeStamp` column either as epoch milliseconds or
//! as a formatted date. Every consumer reads epoch milliseconds, so formatted
//! values are rewritten before samples reach them.
//!
//! Patterns use `strftime` syntax, for instance `%Y/%m/%d %H:%M:%S%.3f`.
//! Values without a UTC offset are read as UTC.

use chrono::{
    DateTime, NaiveDate, NaiveDateTime,
    format::{Item, StrftimeItems},
};
use tracing::debug;

use super::{Sample, column};

/// Errors produced by [`TimestampFormat`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The pattern holds an unknown or incomplete specifier.
    #[error("Invalid timestamp pattern {pattern:?}")]
    InvalidPattern {
        /// The rejected pattern
        pattern: String,
    },
    /// The value does not match the pattern.
    #[error("Timestamp {value:?} does not match {pattern:?}")]
    Mismatch {
        /// The unparsed value
        value: String,
        /// The pattern it was parsed with
        pattern: String,
    },
}

/// A validated timestamp pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampFormat {
    pattern: String,
}

impl TimestampFormat {
    /// Validate `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if `pattern` is not a valid
    /// `strftime` pattern.
    pub fn new(pattern: impl Into<String>) -> Result<Self, Error> {
        let pattern = pattern.into();
        if StrftimeItems::new(&pattern).any(|item| matches!(item, Item::Error)) {
            return Err(Error::InvalidPattern { pattern });
        }
        Ok(Self { pattern })
    }

    /// The `strftime` pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Epoch milliseconds of `value`.
    ///
    /// Tries, in order, a full date and time with offset, a date and time
    /// read as UTC, and a bare date at midnight UTC.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mismatch`] if `value` does not match the pattern.
    pub fn parse(&self, value: &str) -> Result<i64, Error> {
        let value = value.trim();
        if let Ok(parsed) = DateTime::parse_from_str(value, &self.pattern) {
            return Ok(parsed.timestamp_millis());
        }
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, &self.pattern) {
            return Ok(parsed.and_utc().timestamp_millis());
        }
        NaiveDate::parse_from_str(value, &self.pattern)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|midnight| midnight.and_utc().timestamp_millis())
            .ok_or_else(|| Error::Mismatch {
                value: value.to_string(),
                pattern: self.pattern.clone(),
            })
    }

    /// `sample` with its timestamp rewritten to epoch milliseconds.
    ///
    /// Returns `None` when there is nothing to rewrite: the column is absent,
    /// already numeric, or does not match the pattern. An unmatched value is
    /// left as is and reads back as 0.
    #[must_use]
    pub fn normalize(&self, sample: &Sample) -> Option<Sample> {
        let raw = sample.field(column::TIMESTAMP).ok()?;
        if raw.trim().parse::<i64>().is_ok() {
            return None;
        }
        match self.parse(raw) {
            Ok(millis) => Some(sample.with_field(column::TIMESTAMP, millis.to_string())),
            Err(err) => {
                debug!(row = sample.row(), error = %err, "Leaving timestamp as is");
                None
            }
        }
    }
}
