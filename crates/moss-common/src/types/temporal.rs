//! Temporal column types for MossDB.
//!
//! Dates are stored as day counts and datetimes as second counts, both
//! relative to the Unix epoch; they compare as their integer backing.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A calendar date stored as days since the Unix epoch.
///
/// # Example
///
/// ```rust
/// use moss_common::types::Date;
///
/// let date = Date::from_ymd(1970, 1, 2).unwrap();
/// assert_eq!(date.days(), 1);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Date(i32);

impl Date {
    /// The Unix epoch (1970-01-01).
    pub const EPOCH: Self = Self(0);

    /// Creates a date from a raw day count.
    #[inline]
    #[must_use]
    pub const fn new(days: i32) -> Self {
        Self(days)
    }

    /// Returns the raw day count.
    #[inline]
    #[must_use]
    pub const fn days(self) -> i32 {
        self.0
    }

    /// Creates a date from a calendar year, month and day.
    ///
    /// Returns `None` for out-of-range components.
    #[must_use]
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
        Some(Self(date.signed_duration_since(epoch).num_days() as i32))
    }

    /// Returns today's date in UTC.
    #[must_use]
    pub fn today() -> Self {
        let days = NaiveDate::from_ymd_opt(1970, 1, 1)
            .map(|epoch| {
                Utc::now()
                    .date_naive()
                    .signed_duration_since(epoch)
                    .num_days()
            })
            .unwrap_or(0);
        Self(days as i32)
    }
}

impl fmt::Debug for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Date({})", self.0)
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let calendar = NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(i64::from(self.0))));
        match calendar {
            Some(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            None => write!(f, "{}d", self.0),
        }
    }
}

impl From<i32> for Date {
    #[inline]
    fn from(days: i32) -> Self {
        Self::new(days)
    }
}

/// A point in time stored as seconds since the Unix epoch.
///
/// # Example
///
/// ```rust
/// use moss_common::types::DateTime;
///
/// let dt = DateTime::new(86_400);
/// assert_eq!(dt.seconds(), 86_400);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DateTime(i64);

impl DateTime {
    /// The Unix epoch.
    pub const EPOCH: Self = Self(0);

    /// Creates a datetime from a raw second count.
    #[inline]
    #[must_use]
    pub const fn new(seconds: i64) -> Self {
        Self(seconds)
    }

    /// Returns the raw second count.
    #[inline]
    #[must_use]
    pub const fn seconds(self) -> i64 {
        self.0
    }

    /// Returns the current time in UTC.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }
}

impl fmt::Debug for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DateTime({}s)", self.0)
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match chrono::DateTime::from_timestamp(self.0, 0) {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%SZ")),
            None => write!(f, "{}s", self.0),
        }
    }
}

impl From<i64> for DateTime {
    #[inline]
    fn from(seconds: i64) -> Self {
        Self::new(seconds)
    }
}
