//! Timestamp and day file naming utilities

use chrono::{DateTime, Local, NaiveDate};

/// Extension carried by every day file
pub const DAY_FILE_EXTENSION: &str = "json";

/// Source of the current time
///
/// The store asks the clock for "now" whenever it stamps a record, so tests
/// can pin both the calendar date and the epoch timestamp.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// Wall clock in the device's local time zone
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Clock frozen at a single instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Local>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}

/// Calendar date as `YYYY-MM-DD`
pub fn calendar_date(at: &DateTime<Local>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// Epoch milliseconds rendered as a decimal string
pub fn epoch_millis(at: &DateTime<Local>) -> String {
    at.timestamp_millis().to_string()
}

/// Day file name for a calendar date, e.g. `2024-03-07.json`
pub fn day_file_name(date: NaiveDate) -> String {
    format!("{}.{}", date.format("%Y-%m-%d"), DAY_FILE_EXTENSION)
}

/// Day file name for the clock's current local date
pub fn today_file_name(clock: &dyn Clock) -> String {
    day_file_name(clock.now().date_naive())
}
