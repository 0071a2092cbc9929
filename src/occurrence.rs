use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use serde::Serialize;
use std::{fmt, str::FromStr};
use thiserror::Error;

const KEY_FORMAT: &str = "%Y-%m-%dT%H:%M";

// Naive layouts we accept from storage, tried in order after RFC 3339.
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// The stable identity of one occurrence of a schedule event.
///
/// Keys have the exact form `YYYY-MM-DDThh:mm` and are built from the *local* calendar
/// fields of the occurrence's start, so the same wall-clock moment always produces the same
/// key no matter how the underlying instant was stored. A key joins a generated occurrence
/// to the exception record that modifies or suppresses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OccurrenceKey(String);

#[derive(Error, Debug, PartialEq)]
pub enum OccurrenceKeyError {
    #[error("'{0}' is not an occurrence key of the form YYYY-MM-DDThh:mm")]
    Malformed(String),
}

impl OccurrenceKey {
    /// Derive the key for a local wall-clock moment.
    pub fn from_local(at: NaiveDateTime) -> Self {
        OccurrenceKey(at.format(KEY_FORMAT).to_string())
    }

    /// Derive the key for an absolute instant, as seen on a wall clock in `local`.
    pub fn from_instant<Tz: TimeZone>(at: &DateTime<Tz>, local: &FixedOffset) -> Self {
        Self::from_local(at.with_timezone(local).naive_local())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The wall-clock start this key was derived from, to the minute.
    pub fn local_start(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.0, KEY_FORMAT).ok()
    }
}

impl FromStr for OccurrenceKey {
    type Err = OccurrenceKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = NaiveDateTime::parse_from_str(s, KEY_FORMAT)
            .map_err(|_| OccurrenceKeyError::Malformed(s.to_owned()))?;

        // `parse_from_str` tolerates unpadded fields; a key must be canonical to join.
        let key = Self::from_local(parsed);
        if key.0 != s {
            return Err(OccurrenceKeyError::Malformed(s.to_owned()));
        }

        Ok(key)
    }
}

impl fmt::Display for OccurrenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Interpret a stored timestamp as local wall-clock time.
///
/// Strings carrying an offset (RFC 3339, e.g. `2024-03-04T15:30:00.000Z`) are converted into
/// the `local` zone first. Naive strings are taken to already be local, and a bare date means
/// local midnight. Returns `None` when nothing matches.
pub fn parse_wall_clock(raw: &str, local: &FixedOffset) -> Option<NaiveDateTime> {
    let raw = raw.trim();

    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Some(instant.with_timezone(local).naive_local());
    }

    for format in NAIVE_FORMATS.iter() {
        if let Ok(at) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(at);
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN))
}
