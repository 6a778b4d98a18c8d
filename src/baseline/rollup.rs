use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use super::{is_weekend, DailySummary};

/// Longest silence that is back-filled with empty hours. Anything older is
/// dropped rather than teaching the baseline a week of zeros.
const MAX_BACKFILL_HOURS: i64 = 48;

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedHour {
    pub date: NaiveDate,
    pub hour: u8,
    pub is_weekend: bool,
    pub activity: f64,
    pub events: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RolledUp {
    /// Oldest first. The last entry is the hour that just ended.
    pub hours: Vec<ClosedHour>,
    pub days: Vec<DailySummary>,
}

impl RolledUp {
    pub fn is_empty(&self) -> bool {
        self.hours.is_empty() && self.days.is_empty()
    }
}

/// Accumulates activity into local wall-clock hours and emits each hour once
/// it is over.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyRollup {
    current: Option<NaiveDateTime>,
    activity: f64,
    events: f64,
    day_hours: [f64; 24],
}

impl HourlyRollup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_hour(&self) -> Option<NaiveDateTime> {
        self.current
    }

    /// Adds one event. Hours before `local` are closed first; a late event
    /// that belongs to an already closed hour counts toward the open one.
    pub fn add(&mut self, local: NaiveDateTime, quantity: f64) -> RolledUp {
        let rolled = self.advance(local);
        self.activity += quantity.max(0.0);
        self.events += 1.0;
        rolled
    }

    /// Closes every hour that ended at or before `local`.
    pub fn advance(&mut self, local: NaiveDateTime) -> RolledUp {
        let target = truncate_to_hour(local);
        let mut rolled = RolledUp::default();

        let Some(mut open) = self.current else {
            self.current = Some(target);
            return rolled;
        };
        if target <= open {
            return rolled;
        }

        let activity = std::mem::take(&mut self.activity);
        let events = std::mem::take(&mut self.events);
        self.close(open, activity, events, &mut rolled);
        open += Duration::hours(1);

        if target - open > Duration::hours(MAX_BACKFILL_HOURS) {
            self.flush_day(open - Duration::hours(1), &mut rolled);
            self.day_hours = [0.0; 24];
            open = target;
        }

        while open < target {
            self.close(open, 0.0, 0.0, &mut rolled);
            open += Duration::hours(1);
        }

        self.current = Some(target);
        rolled
    }

    fn close(&mut self, start: NaiveDateTime, activity: f64, events: f64, rolled: &mut RolledUp) {
        let date = start.date();
        let hour = start.hour() as u8;
        self.day_hours[hour as usize] = activity;
        rolled.hours.push(ClosedHour {
            date,
            hour,
            is_weekend: is_weekend(date),
            activity,
            events,
        });

        if hour == 23 {
            rolled
                .days
                .push(DailySummary::from_hours(date, &self.day_hours));
            self.day_hours = [0.0; 24];
        }
    }

    /// Emits a partial day when a long gap skips its closing hour.
    fn flush_day(&mut self, last_closed: NaiveDateTime, rolled: &mut RolledUp) {
        if last_closed.hour() == 23 {
            return;
        }
        rolled
            .days
            .push(DailySummary::from_hours(last_closed.date(), &self.day_hours));
    }
}

fn truncate_to_hour(local: NaiveDateTime) -> NaiveDateTime {
    local
        .date()
        .and_hms_opt(local.hour(), 0, 0)
        .unwrap_or(local)
}
