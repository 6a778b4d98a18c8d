use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Daily window in which inactivity alerting is suppressed. `start > end`
/// denotes an overnight window such as 22:00-07:00.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Parses `"HH:MM"` pairs.
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").ok()?;
        let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").ok()?;
        Some(Self::new(start, end))
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.contains_minute(minute_of_day(time))
    }

    pub fn contains_minute(&self, minute: u32) -> bool {
        let minute = minute % MINUTES_PER_DAY;
        let start = minute_of_day(self.start);
        let end = minute_of_day(self.end);

        if start == end {
            return false;
        }
        if start < end {
            minute >= start && minute < end
        } else {
            minute >= start || minute < end
        }
    }
}

fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}
