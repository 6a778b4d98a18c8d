use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{bucket::HourlyBucket, config::BaselineConfig, summary::DailySummary};

const HOURS_PER_DAY: usize = 24;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LearnerPhase {
    Learning,
    Mature,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Expectation {
    pub activity: f64,
    pub events: f64,
}

/// Why an hour was judged anomalous.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deviation {
    pub hour: u8,
    pub is_weekend: bool,
    pub expected: Expectation,
    pub current_activity: f64,
    pub current_events: f64,
}

/// Per-hour expectation of activity, split by weekday and weekend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineLearner {
    installed_at: DateTime<Utc>,
    buckets: Vec<HourlyBucket>,
    summaries: VecDeque<DailySummary>,
    #[serde(skip)]
    config: BaselineConfig,
}

impl BaselineLearner {
    pub fn new(installed_at: DateTime<Utc>, config: BaselineConfig) -> Self {
        Self {
            installed_at,
            buckets: vec![HourlyBucket::default(); HOURS_PER_DAY * 2],
            summaries: VecDeque::new(),
            config,
        }
    }

    /// Re-attaches configuration to state loaded from storage.
    pub fn with_config(mut self, config: BaselineConfig) -> Self {
        self.config = config;
        self.buckets.resize(HOURS_PER_DAY * 2, HourlyBucket::default());
        for bucket in &mut self.buckets {
            bucket.repair();
        }
        while self.summaries.len() > self.config.summary_days {
            self.summaries.pop_front();
        }
        self
    }

    pub fn config(&self) -> &BaselineConfig {
        &self.config
    }

    pub fn set_relaxed_night(&mut self, relaxed: bool) {
        self.config.relaxed_night = relaxed;
    }

    pub fn installed_at(&self) -> DateTime<Utc> {
        self.installed_at
    }

    pub fn phase(&self, now: DateTime<Utc>) -> LearnerPhase {
        if now - self.installed_at < Duration::days(self.config.learning_days) {
            LearnerPhase::Learning
        } else {
            LearnerPhase::Mature
        }
    }

    /// Feeds one closed hour. Runs in both phases so the baseline is ready on maturity.
    pub fn observe_hour(&mut self, hour: u8, is_weekend: bool, activity: f64, events: f64) {
        if !activity.is_finite() || !events.is_finite() || activity < 0.0 || events < 0.0 {
            return;
        }
        let capacity = self.config.bucket_capacity;
        if let Some(bucket) = self.bucket_mut(hour, is_weekend) {
            bucket.push(activity, events, capacity);
        }
    }

    pub fn sample_count(&self, hour: u8, is_weekend: bool) -> usize {
        self.bucket(hour, is_weekend)
            .map(HourlyBucket::sample_count)
            .unwrap_or(0)
    }

    pub fn expected_for(&self, hour: u8, is_weekend: bool) -> Option<Expectation> {
        let bucket = self.bucket(hour, is_weekend)?;
        if bucket.sample_count() < self.config.min_samples_expected {
            return None;
        }
        Some(Expectation {
            activity: bucket.mean_activity()?,
            events: bucket.mean_events()?,
        })
    }

    pub fn is_deviant(
        &self,
        hour: u8,
        is_weekend: bool,
        current_activity: f64,
        current_events: f64,
    ) -> bool {
        self.deviation(hour, is_weekend, current_activity, current_events)
            .is_some()
    }

    pub fn deviation(
        &self,
        hour: u8,
        is_weekend: bool,
        current_activity: f64,
        current_events: f64,
    ) -> Option<Deviation> {
        if self.config.is_night_hour(hour) && !self.config.relaxed_night {
            return None;
        }

        let bucket = self.bucket(hour, is_weekend)?;
        if bucket.sample_count() < self.config.min_samples_deviation {
            return None;
        }

        let expected = Expectation {
            activity: bucket.mean_activity()?,
            events: bucket.mean_events()?,
        };
        if expected.activity <= self.config.activity_noise_floor {
            return None;
        }

        let ratio = self.config.deviation_ratio;
        let low_activity = current_activity < expected.activity * ratio;
        let low_events = current_events < expected.events * ratio;
        if !(low_activity || low_events) {
            return None;
        }

        Some(Deviation {
            hour,
            is_weekend,
            expected,
            current_activity,
            current_events,
        })
    }

    /// One summary per calendar day; a second summary for the same date replaces the first.
    pub fn record_daily_summary(&mut self, summary: DailySummary) {
        if let Some(existing) = self
            .summaries
            .iter_mut()
            .find(|existing| existing.date == summary.date)
        {
            *existing = summary;
            return;
        }

        let position = self
            .summaries
            .iter()
            .rposition(|existing| existing.date < summary.date)
            .map(|index| index + 1)
            .unwrap_or(0);
        self.summaries.insert(position, summary);
        while self.summaries.len() > self.config.summary_days {
            self.summaries.pop_front();
        }
    }

    pub fn summaries(&self) -> impl Iterator<Item = &DailySummary> {
        self.summaries.iter()
    }

    /// Median first-active hour over recorded days of the given type.
    pub fn typical_wake_hour(&self, is_weekend: bool) -> Option<u8> {
        let mut hours: Vec<u8> = self
            .summaries
            .iter()
            .filter(|summary| summary.is_weekend == is_weekend)
            .filter_map(|summary| summary.first_active_hour)
            .collect();
        if hours.is_empty() {
            return None;
        }
        hours.sort_unstable();
        Some(hours[hours.len() / 2])
    }

    pub fn typical_daily_total(&self, is_weekend: bool) -> Option<f64> {
        let totals: Vec<f64> = self
            .summaries
            .iter()
            .filter(|summary| summary.is_weekend == is_weekend)
            .map(|summary| summary.total_activity)
            .collect();
        if totals.is_empty() {
            return None;
        }
        Some(totals.iter().sum::<f64>() / totals.len() as f64)
    }

    fn bucket(&self, hour: u8, is_weekend: bool) -> Option<&HourlyBucket> {
        bucket_index(hour, is_weekend).and_then(|index| self.buckets.get(index))
    }

    fn bucket_mut(&mut self, hour: u8, is_weekend: bool) -> Option<&mut HourlyBucket> {
        bucket_index(hour, is_weekend).and_then(|index| self.buckets.get_mut(index))
    }
}

fn bucket_index(hour: u8, is_weekend: bool) -> Option<usize> {
    if usize::from(hour) >= HOURS_PER_DAY {
        return None;
    }
    Some(usize::from(hour) * 2 + usize::from(is_weekend))
}
