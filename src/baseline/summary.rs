use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub date: NaiveDate,
    pub is_weekend: bool,
    pub total_activity: f64,
    pub first_active_hour: Option<u8>,
    pub last_active_hour: Option<u8>,
    pub active_hour_count: u8,
}

impl DailySummary {
    /// Builds a summary from 24 hourly activity totals.
    pub fn from_hours(date: NaiveDate, hourly_activity: &[f64; 24]) -> Self {
        let active: Vec<u8> = hourly_activity
            .iter()
            .enumerate()
            .filter(|(_, value)| **value > 0.0)
            .map(|(hour, _)| hour as u8)
            .collect();

        Self {
            date,
            is_weekend: is_weekend(date),
            total_activity: hourly_activity.iter().sum(),
            first_active_hour: active.first().copied(),
            last_active_hour: active.last().copied(),
            active_hour_count: active.len() as u8,
        }
    }
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}
