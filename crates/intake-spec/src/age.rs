//! Clock and age arithmetic.
//!
//! Dates are local and naive: `YYYY-MM-DD` or `YYYY-MM-DDTHH:mm`, no offset.
//! Age is recomputed against the clock on every call.

use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};

pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const MILLIS_PER_YEAR: f64 = 365.25 * 24.0 * 60.0 * 60.0 * 1000.0;

/// Source of the current local date/time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock pinned to one instant, for reproducible validation.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Parses a local date or minute-precision date/time. Seconds are accepted and dropped.
pub fn parse_local(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(datetime) = NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT) {
        return Some(datetime);
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return truncate_to_minute(datetime);
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// True when `raw` carries a time component.
pub fn has_time(raw: &str) -> bool {
    raw.trim().contains('T')
}

pub fn format_local(datetime: NaiveDateTime) -> String {
    datetime.format(DATETIME_FORMAT).to_string()
}

pub fn format_date(datetime: NaiveDateTime) -> String {
    datetime.format(DATE_FORMAT).to_string()
}

pub fn truncate_to_minute(datetime: NaiveDateTime) -> Option<NaiveDateTime> {
    datetime.with_second(0)?.with_nanosecond(0)
}

/// Fractional age in years using an average year of 365.25 days.
pub fn age_in_years(dob: NaiveDateTime, now: NaiveDateTime) -> f64 {
    (now - dob).num_milliseconds() as f64 / MILLIS_PER_YEAR
}

/// Age in whole months, used only as a lookup key. Negative ages clamp to zero.
pub fn age_months(years: f64) -> u32 {
    (years * 12.0).round().max(0.0) as u32
}
