//! Day Identifier
//!
//! Every piece of leaderboard state is partitioned by a [`DayId`]: the UTC
//! calendar date encoded as the integer `YYYYMMDD` (e.g. `20251211`).
//!
//! All functions here are pure and total. Invalid integers are never a panic,
//! they simply fail [`is_valid_day_id`] or the fallible constructors.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};

/// Smallest eight digit value
const MIN_ENCODED: i64 = 10_000_000;
/// Largest eight digit value
const MAX_ENCODED: i64 = 99_999_999;

/// UTC calendar day key (`YYYYMMDD`)
///
/// Holds the decoded date so that a constructed `DayId` always decomposes into
/// a real calendar date. Ordering matches the ordering of the integer encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct DayId(NaiveDate);

impl DayId {
    /// Day containing `now`, truncated to the UTC date
    pub fn current(now: DateTime<Utc>) -> CoreResult<Self> {
        Self::from_date(now.date_naive())
    }

    /// Day id for an arbitrary calendar date
    pub fn from_date(date: NaiveDate) -> CoreResult<Self> {
        if !(1000..=9999).contains(&date.year()) {
            return Err(CoreError::DateOutOfRange(date.to_string()));
        }
        Ok(Self(date))
    }

    /// Decode an integer day id, validating it
    pub fn new(value: i64) -> CoreResult<Self> {
        parse_day_id(value)
            .map(Self)
            .ok_or_else(|| CoreError::InvalidDayId(value.to_string()))
    }

    /// Calendar date of this day
    pub fn to_date(&self) -> NaiveDate {
        self.0
    }

    /// Integer encoding `YYYYMMDD`
    pub fn as_u32(&self) -> u32 {
        // year is in 1000..=9999, so the encoding always fits
        (self.0.year() as u32) * 10_000 + self.0.month() * 100 + self.0.day()
    }

    /// The day before, if still encodable
    pub fn previous(&self) -> Option<Self> {
        self.0.pred_opt().and_then(|d| Self::from_date(d).ok())
    }

    /// The day after, if still encodable
    pub fn next(&self) -> Option<Self> {
        self.0.succ_opt().and_then(|d| Self::from_date(d).ok())
    }

    /// Start of the day window (inclusive)
    pub fn starts_at(&self) -> DateTime<Utc> {
        self.0.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    /// Whether `now` has moved past this day's window
    pub fn has_closed(&self, now: DateTime<Utc>) -> bool {
        now.date_naive() > self.0
    }
}

/// Inverse of the encoding: the calendar date an integer names, if any
pub fn parse_day_id(value: i64) -> Option<NaiveDate> {
    if !(MIN_ENCODED..=MAX_ENCODED).contains(&value) {
        return None;
    }
    let year = (value / 10_000) as i32;
    let month = ((value / 100) % 100) as u32;
    let day = (value % 100) as u32;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Eight digits whose year/month/day substrings form a real UTC date
pub fn is_valid_day_id(value: i64) -> bool {
    parse_day_id(value).is_some()
}

impl TryFrom<u32> for DayId {
    type Error = CoreError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value as i64)
    }
}

impl TryFrom<i64> for DayId {
    type Error = CoreError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DayId> for u32 {
    fn from(day: DayId) -> Self {
        day.as_u32()
    }
}

impl FromStr for DayId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CoreError::InvalidDayId(s.to_string()));
        }
        let value: i64 = s
            .parse()
            .map_err(|_| CoreError::InvalidDayId(s.to_string()))?;
        Self::new(value)
    }
}

impl fmt::Display for DayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_current_truncates_to_utc_date() {
        let now = Utc.with_ymd_and_hms(2025, 12, 11, 23, 59, 59).unwrap();
        assert_eq!(DayId::current(now).unwrap().as_u32(), 20251211);

        let midnight = Utc.with_ymd_and_hms(2025, 12, 12, 0, 0, 0).unwrap();
        assert_eq!(DayId::current(midnight).unwrap().as_u32(), 20251212);
    }

    #[test]
    fn test_valid_day_ids() {
        assert!(is_valid_day_id(20251231));
        assert!(is_valid_day_id(20250101));
        assert!(is_valid_day_id(20240229));
        assert!(is_valid_day_id(20000229));
        assert!(is_valid_day_id(10000101));
        assert!(is_valid_day_id(99991231));
    }

    #[test]
    fn test_invalid_day_ids() {
        assert!(!is_valid_day_id(20251232));
        assert!(!is_valid_day_id(20251301));
        assert!(!is_valid_day_id(20250001));
        assert!(!is_valid_day_id(20250100));
        assert!(!is_valid_day_id(202513));
        assert!(!is_valid_day_id(2025121));
        assert!(!is_valid_day_id(202512111));
        assert!(!is_valid_day_id(0));
        assert!(!is_valid_day_id(-20251211));
        assert!(!is_valid_day_id(i64::MAX));
        assert!(!is_valid_day_id(i64::MIN));
    }

    #[test]
    fn test_leap_years() {
        // divisible by 4
        assert!(is_valid_day_id(20240229));
        // not divisible by 4
        assert!(!is_valid_day_id(20250229));
        // century, not divisible by 400
        assert!(!is_valid_day_id(19000229));
        assert!(!is_valid_day_id(21000229));
        // divisible by 400
        assert!(is_valid_day_id(20000229));
        assert!(!is_valid_day_id(20240230));
    }

    #[test]
    fn test_month_lengths() {
        let thirty = [4, 6, 9, 11];
        for month in 1..=12i64 {
            let last = if month == 2 {
                28
            } else if thirty.contains(&month) {
                30
            } else {
                31
            };
            let base = 2025_0000 + month * 100;
            assert!(is_valid_day_id(base + last), "month {} day {}", month, last);
            assert!(!is_valid_day_id(base + last + 1), "month {} day {}", month, last + 1);
        }
    }

    #[test]
    fn test_round_trip_through_date() {
        let day = DayId::new(20250601).unwrap();
        assert_eq!(day.to_date(), NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
        assert_eq!(DayId::from_date(day.to_date()).unwrap(), day);
        assert_eq!(parse_day_id(20250601), Some(day.to_date()));
    }

    #[test]
    fn test_from_date_out_of_range() {
        let ancient = NaiveDate::from_ymd_opt(999, 12, 31).unwrap();
        assert!(matches!(
            DayId::from_date(ancient),
            Err(CoreError::DateOutOfRange(_))
        ));
        let far = NaiveDate::from_ymd_opt(10000, 1, 1).unwrap();
        assert!(DayId::from_date(far).is_err());
    }

    #[test]
    fn test_previous_and_next_cross_boundaries() {
        let new_year = DayId::new(20260101).unwrap();
        assert_eq!(new_year.previous().unwrap().as_u32(), 20251231);

        let march_first = DayId::new(20240301).unwrap();
        assert_eq!(march_first.previous().unwrap().as_u32(), 20240229);

        let march_first = DayId::new(20250301).unwrap();
        assert_eq!(march_first.previous().unwrap().as_u32(), 20250228);

        let year_end = DayId::new(20251231).unwrap();
        assert_eq!(year_end.next().unwrap().as_u32(), 20260101);

        assert!(DayId::new(10000101).unwrap().previous().is_none());
        assert!(DayId::new(99991231).unwrap().next().is_none());
    }

    #[test]
    fn test_has_closed() {
        let day = DayId::new(20250601).unwrap();
        let same_day = Utc.with_ymd_and_hms(2025, 6, 1, 23, 0, 0).unwrap();
        let next_day = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 1).unwrap();
        assert!(!day.has_closed(same_day));
        assert!(day.has_closed(next_day));
        assert_eq!(day.starts_at(), Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_from_str_and_display() {
        let day: DayId = "20251211".parse().unwrap();
        assert_eq!(day.to_string(), "20251211");
        assert!("2025-12-11".parse::<DayId>().is_err());
        assert!("+2025121".parse::<DayId>().is_err());
        assert!("20251232".parse::<DayId>().is_err());
    }

    #[test]
    fn test_serde_as_integer() {
        let day = DayId::new(20251211).unwrap();
        assert_eq!(serde_json::to_string(&day).unwrap(), "20251211");
        let parsed: DayId = serde_json::from_str("20251211").unwrap();
        assert_eq!(parsed, day);
        assert!(serde_json::from_str::<DayId>("20251232").is_err());
    }

    #[test]
    fn test_ordering_matches_encoding() {
        let a = DayId::new(20251231).unwrap();
        let b = DayId::new(20260101).unwrap();
        assert!(a < b);
        assert!(a.as_u32() < b.as_u32());
    }
}
