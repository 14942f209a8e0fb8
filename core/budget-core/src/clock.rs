//! Calendar-day identifiers and the clocks that produce them.
//!
//! The budget is valid for exactly one local calendar day. [`DayId`] is the
//! persisted form of that day (`YYYY-MM-DD`), which sorts lexicographically in
//! the same order as the dates themselves.

use chrono::{Days, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

const DAY_FORMAT: &str = "%Y-%m-%d";

/// A local calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DayId(NaiveDate);

impl DayId {
    pub fn new(date: NaiveDate) -> Self {
        DayId(date)
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(DayId)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// The following calendar day. Saturates at the end of chrono's range.
    pub fn next(&self) -> Self {
        DayId(self.0.checked_add_days(Days::new(1)).unwrap_or(self.0))
    }
}

impl fmt::Display for DayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DAY_FORMAT))
    }
}

impl FromStr for DayId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(value.trim(), DAY_FORMAT)
            .map(DayId)
            .map_err(|err| format!("invalid day id {:?}: {}", value, err))
    }
}

impl TryFrom<String> for DayId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DayId> for String {
    fn from(day: DayId) -> String {
        day.to_string()
    }
}

/// Source of "today" for day-boundary detection.
pub trait Clock {
    fn today(&self) -> DayId;
}

/// Wall clock in the machine's local timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> DayId {
        DayId(Local::now().date_naive())
    }
}

/// Clock that only moves when told to. Clones share the same day, so a test
/// can hand one copy to the tracker and keep another to advance time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    day: Arc<Mutex<DayId>>,
}

impl ManualClock {
    pub fn new(day: DayId) -> Self {
        ManualClock {
            day: Arc::new(Mutex::new(day)),
        }
    }

    pub fn set(&self, day: DayId) {
        match self.day.lock() {
            Ok(mut guard) => *guard = day,
            Err(poisoned) => *poisoned.into_inner() = day,
        }
    }

    pub fn advance_day(&self) {
        let next = self.today().next();
        self.set(next);
    }
}

impl Clock for ManualClock {
    fn today(&self) -> DayId {
        match self.day.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_id_round_trips_through_string_form() {
        let day = DayId::from_ymd(2026, 3, 7).unwrap();
        assert_eq!(day.to_string(), "2026-03-07");
        assert_eq!("2026-03-07".parse::<DayId>().unwrap(), day);
    }

    #[test]
    fn day_id_string_order_matches_date_order() {
        let earlier = DayId::from_ymd(2026, 9, 30).unwrap();
        let later = DayId::from_ymd(2026, 10, 1).unwrap();
        assert!(earlier < later);
        assert!(earlier.to_string() < later.to_string());
    }

    #[test]
    fn rejects_malformed_days() {
        assert!("yesterday".parse::<DayId>().is_err());
        assert!("2026-13-01".parse::<DayId>().is_err());
    }

    #[test]
    fn manual_clock_clones_share_the_same_day() {
        let clock = ManualClock::new(DayId::from_ymd(2026, 12, 31).unwrap());
        let handle = clock.clone();
        handle.advance_day();
        assert_eq!(clock.today(), DayId::from_ymd(2027, 1, 1).unwrap());
    }
}
