//! Calendar windows used to select sales and customers.
//!
//! Windows compare the *local server* date components (day, month, year) of
//! a timestamp, not a rolling 24 hour range. Two servers in different
//! timezones can therefore disagree about which day a sale near midnight
//! belongs to.

use std::fmt;

use chrono::{Datelike, Local, NaiveDate};

use crate::error::ValidationError;
use crate::{Clock, Timestamp};

/// Anything that can decide whether a timestamp falls inside it.
pub trait DateWindow {
    fn contains(&self, at: Timestamp) -> bool;
}

/// Local calendar date of a timestamp.
pub fn local_date(at: Timestamp) -> NaiveDate {
    at.with_timezone(&Local).date_naive()
}

/// A single local calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CalendarDay(NaiveDate);

impl CalendarDay {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    /// The local day a timestamp falls on.
    pub fn of(at: Timestamp) -> Self {
        Self(local_date(at))
    }

    /// Today according to the given clock.
    pub fn today(clock: &dyn Clock) -> Self {
        Self::of(clock.now())
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Document key for this day, `YYYY-MM-DD`.
    pub fn key(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }
}

impl DateWindow for CalendarDay {
    fn contains(&self, at: Timestamp) -> bool {
        let date = local_date(at);
        date.day() == self.0.day() && date.month() == self.0.month() && date.year() == self.0.year()
    }
}

impl fmt::Display for CalendarDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// An inclusive range of local calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    start: NaiveDate,
    end: NaiveDate,
}

impl Period {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationError> {
        if end < start {
            return Err(ValidationError::InvalidValue {
                field: "period".to_string(),
                reason: format!("end {} is before start {}", end, start),
            });
        }
        Ok(Self { start, end })
    }

    pub fn day(day: CalendarDay) -> Self {
        Self {
            start: day.date(),
            end: day.date(),
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }
}

impl DateWindow for Period {
    fn contains(&self, at: Timestamp) -> bool {
        let date = local_date(at);
        date >= self.start && date <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> Timestamp {
        Local
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_calendar_day_matches_local_components() {
        let day = CalendarDay::from_ymd(2026, 3, 14).unwrap();
        assert!(day.contains(local(2026, 3, 14, 0, 1)));
        assert!(day.contains(local(2026, 3, 14, 23, 59)));
        assert!(!day.contains(local(2026, 3, 15, 0, 1)));
        assert!(!day.contains(local(2025, 3, 14, 12, 0)));
    }

    #[test]
    fn test_calendar_day_key_format() {
        let day = CalendarDay::from_ymd(2026, 1, 5).unwrap();
        assert_eq!(day.key(), "2026-01-05");
        assert_eq!(day.to_string(), "2026-01-05");
    }

    #[test]
    fn test_period_rejects_reversed_range() {
        let start = NaiveDate::from_ymd_opt(2026, 2, 10).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        assert!(Period::new(start, end).is_err());
    }

    #[test]
    fn test_period_is_inclusive() {
        let start = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 2, 3).unwrap();
        let period = Period::new(start, end).unwrap();
        assert!(period.contains(local(2026, 2, 1, 0, 0)));
        assert!(period.contains(local(2026, 2, 3, 23, 0)));
        assert!(!period.contains(local(2026, 2, 4, 0, 0)));
    }
}
