//! Date windows over which metrics are summed.
//!
//! Callers pass windows as `"<start>/<end>"`, where each side is an RFC 3339
//! timestamp or a bare `YYYY-MM-DD` date (read as midnight UTC).

use std::fmt;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::error::{AppError, Result};

/// A closed interval `[start, end]` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end < start {
            return Err(AppError::invalid(format!(
                "window end {} is before start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse a `start/end` range string.
    pub fn parse(range: &str) -> Result<Self> {
        let (start, end) = range
            .trim()
            .split_once('/')
            .ok_or_else(|| AppError::invalid(format!("date range '{range}' must be 'start/end'")))?;

        let start = parse_instant(start)
            .ok_or_else(|| AppError::invalid(format!("invalid start date '{start}'")))?;
        let end = parse_instant(end)
            .ok_or_else(|| AppError::invalid(format!("invalid end date '{end}'")))?;

        Self::new(start, end)
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// Parse a document or request date: RFC 3339 first, then a bare date.
pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_bare_dates() {
        let window = DateWindow::parse("2024-01-01/2024-01-31").unwrap();
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap());
    }

    #[test]
    fn parses_timestamps() {
        let window =
            DateWindow::parse("2024-01-01T00:00:00.000Z/2024-01-07T12:30:00+00:00").unwrap();
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 1, 7, 12, 30, 0).unwrap());
    }

    #[test]
    fn rejects_malformed_ranges() {
        assert!(DateWindow::parse("2024-01-01").is_err());
        assert!(DateWindow::parse("yesterday/today").is_err());
        assert!(DateWindow::parse("2024-02-01/2024-01-01").is_err());
    }

    #[test]
    fn bounds_are_inclusive() {
        let window = DateWindow::parse("2024-01-01/2024-01-02").unwrap();
        assert!(window.contains(window.start));
        assert!(window.contains(window.end));
        assert!(!window.contains(window.end + chrono::Duration::seconds(1)));
    }

    #[test]
    fn display_is_canonical() {
        let window = DateWindow::parse("2024-01-01/2024-01-02T00:00:00.000Z").unwrap();
        assert_eq!(window.to_string(), "2024-01-01T00:00:00Z/2024-01-02T00:00:00Z");
    }
}
