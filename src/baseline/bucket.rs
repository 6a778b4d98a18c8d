use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Rolling history for one (hour, weekday/weekend) slot.
///
/// Activity and event samples are always pushed and evicted together, so both
/// sequences have the same length. Statistics are computed on demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HourlyBucket {
    activity: VecDeque<f64>,
    events: VecDeque<f64>,
}

impl HourlyBucket {
    pub fn push(&mut self, activity: f64, events: f64, capacity: usize) {
        self.activity.push_back(activity);
        self.events.push_back(events);
        while self.activity.len() > capacity.max(1) {
            self.activity.pop_front();
            self.events.pop_front();
        }
    }

    pub fn sample_count(&self) -> usize {
        self.activity.len()
    }

    pub fn mean_activity(&self) -> Option<f64> {
        mean(&self.activity)
    }

    pub fn mean_events(&self) -> Option<f64> {
        mean(&self.events)
    }

    /// Repairs a bucket restored from storage whose sequences drifted apart.
    pub(crate) fn repair(&mut self) {
        let len = self.activity.len().min(self.events.len());
        while self.activity.len() > len {
            self.activity.pop_front();
        }
        while self.events.len() > len {
            self.events.pop_front();
        }
    }
}

fn mean(values: &VecDeque<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
