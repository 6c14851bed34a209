//! In-game calendar time.
//!
//! The calendar is fixed: 60-minute hours, 24-hour days, 30-day months and
//! 12-month years. Ordering is lexicographic over
//! (year, month, day, hour, minute), which the derived `Ord` gives us for free
//! because the fields are declared in that order.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const MINUTES_PER_HOUR: i64 = 60;
pub const HOURS_PER_DAY: i64 = 24;
pub const DAYS_PER_MONTH: i64 = 30;
pub const MONTHS_PER_YEAR: i64 = 12;

/// A point on the in-game calendar.
///
/// Months and days are 1-based; hours and minutes are 0-based. Missing fields
/// deserialize from the default clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockTime {
    #[serde(rename = "年", alias = "year")]
    pub year: i64,
    #[serde(rename = "月", alias = "month")]
    pub month: i64,
    #[serde(rename = "日", alias = "day")]
    pub day: i64,
    #[serde(rename = "时", alias = "hour")]
    pub hour: i64,
    #[serde(rename = "分", alias = "minute")]
    pub minute: i64,
}

impl ClockTime {
    /// Build a clock time, carrying any overflow upward.
    pub fn new(year: i64, month: i64, day: i64, hour: i64, minute: i64) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
        }
        .normalized()
    }

    /// Carry overflow minute→hour→day→month→year.
    ///
    /// Underflow borrows the same way, so `(1000, 1, 1, 0, -1)` becomes the last
    /// minute of year 999. Carries saturate at the ends of `i64`.
    pub fn normalized(self) -> Self {
        let mut hour = self.hour.saturating_add(self.minute.div_euclid(MINUTES_PER_HOUR));
        let minute = self.minute.rem_euclid(MINUTES_PER_HOUR);

        let mut day0 = self
            .day
            .saturating_sub(1)
            .saturating_add(hour.div_euclid(HOURS_PER_DAY));
        hour = hour.rem_euclid(HOURS_PER_DAY);

        let mut month0 = self
            .month
            .saturating_sub(1)
            .saturating_add(day0.div_euclid(DAYS_PER_MONTH));
        day0 = day0.rem_euclid(DAYS_PER_MONTH);

        let year = self.year.saturating_add(month0.div_euclid(MONTHS_PER_YEAR));
        month0 = month0.rem_euclid(MONTHS_PER_YEAR);

        Self {
            year,
            month: month0 + 1,
            day: day0 + 1,
            hour,
            minute,
        }
    }

    pub fn advance_minutes(&mut self, minutes: i64) {
        self.minute = self.minute.saturating_add(minutes);
        *self = self.normalized();
    }

    pub fn advance_hours(&mut self, hours: i64) {
        self.hour = self.hour.saturating_add(hours);
        *self = self.normalized();
    }

    pub fn advance_days(&mut self, days: i64) {
        self.day = self.day.saturating_add(days);
        *self = self.normalized();
    }

    pub fn advance_months(&mut self, months: i64) {
        self.month = self.month.saturating_add(months);
        *self = self.normalized();
    }

    pub fn advance_years(&mut self, years: i64) {
        self.year = self.year.saturating_add(years);
    }

    /// A copy of this time shifted forward by whole years, saturating.
    pub fn plus_years(mut self, years: i64) -> Self {
        self.advance_years(years);
        self
    }

    /// Like [`plus_years`](Self::plus_years), but `None` past the last
    /// representable year.
    pub fn checked_plus_years(self, years: i64) -> Option<Self> {
        let year = self.year.checked_add(years)?;
        Some(Self { year, ..self })
    }

    /// Whether this time is at or after `other`.
    pub fn has_reached(&self, other: &ClockTime) -> bool {
        self >= other
    }
}

impl Default for ClockTime {
    fn default() -> Self {
        Self::new(1000, 1, 1, 0, 0)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}年{}月{}日 {:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute
        )
    }
}
