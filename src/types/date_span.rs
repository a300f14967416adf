//! Inclusive calendar-day ranges and the hourly bounds derived from them.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of hourly observations in one calendar day at the provider's native step.
pub const HOURS_PER_DAY: i64 = 24;

/// An inclusive range of whole days, `start <= end`.
///
/// ```
/// use chrono::NaiveDate;
/// use weather_ingest::DateSpan;
///
/// let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
/// let end = NaiveDate::from_ymd_opt(2023, 2, 7).unwrap();
/// let span = DateSpan::new(start, end).unwrap();
/// assert_eq!(span.days(), 38);
/// assert_eq!(span.expected_hours(), 38 * 24);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateSpan {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateSpan {
    /// Returns `None` when `start` is after `end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// A span covering exactly one day.
    pub fn single_day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of calendar days in the span, both ends included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Number of hourly values a gap-free response for this span must contain.
    pub fn expected_hours(&self) -> usize {
        // days() is always >= 1
        (self.days() * HOURS_PER_DAY) as usize
    }

    /// Splits the span into consecutive, non-overlapping windows of at most
    /// `window_days` days. The last window may be shorter.
    ///
    /// Returns an empty vector if `window_days` is zero.
    pub fn windows(&self, window_days: u32) -> Vec<DateSpan> {
        if window_days == 0 {
            return Vec::new();
        }
        let step = Duration::days(i64::from(window_days));
        let mut windows = Vec::new();
        let mut cursor = self.start;
        while cursor <= self.end {
            let window_end = cursor
                .checked_add_signed(step - Duration::days(1))
                .map_or(self.end, |d| d.min(self.end));
            windows.push(DateSpan {
                start: cursor,
                end: window_end,
            });
            match window_end.succ_opt() {
                Some(next) => cursor = next,
                None => break,
            }
        }
        windows
    }
}

impl fmt::Display for DateSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}
