//! Battery context: a short history of power snapshots used to explain silence.

use std::{collections::VecDeque, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::models::{BatteryReading, BatterySnapshot, ChargeState};

pub const MAX_SNAPSHOTS: usize = 100;
pub const SIGNIFICANT_LEVEL_DELTA: u8 = 5;
pub const DEAD_LEVEL: u8 = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryGate {
    snapshots: VecDeque<BatterySnapshot>,
}

impl BatteryGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the reading only when it differs meaningfully from the latest one.
    /// Returns whether a snapshot was stored.
    pub fn record_snapshot(&mut self, reading: BatteryReading, at: DateTime<Utc>) -> bool {
        if let Some(level) = reading.level {
            if level > 100 {
                return false;
            }
        }

        if let Some(latest) = self.snapshots.back() {
            if !is_significant(latest, &reading) {
                return false;
            }
        }

        self.snapshots.push_back(BatterySnapshot {
            timestamp: at,
            level: reading.level,
            state: reading.state,
            power_save: reading.power_save,
        });
        while self.snapshots.len() > MAX_SNAPSHOTS {
            self.snapshots.pop_front();
        }
        true
    }

    /// True only with positive evidence: the newest snapshot before `gap_start`
    /// shows a nearly empty battery that was not charging.
    pub fn likely_dead_at(&self, gap_start: DateTime<Utc>) -> bool {
        let Some(snapshot) = self
            .snapshots
            .iter()
            .rev()
            .find(|snapshot| snapshot.timestamp < gap_start)
        else {
            return false;
        };

        matches!(snapshot.level, Some(level) if level <= DEAD_LEVEL)
            && snapshot.state == ChargeState::Unplugged
    }

    /// Percent per hour over the snapshots within `window` of `now`.
    pub fn drain_rate(&self, window: Duration, now: DateTime<Utc>) -> Option<f64> {
        let since = now - window;
        let points: Vec<&BatterySnapshot> = self
            .snapshots
            .iter()
            .filter(|snapshot| snapshot.timestamp >= since && snapshot.timestamp <= now)
            .collect();

        if points.len() < 2 {
            return None;
        }
        if points
            .iter()
            .any(|snapshot| snapshot.state != ChargeState::Unplugged || snapshot.level.is_none())
        {
            return None;
        }

        let first = points.first()?;
        let last = points.last()?;
        let hours = (last.timestamp - first.timestamp).num_seconds() as f64 / 3_600.0;
        if hours <= 0.0 {
            return None;
        }

        let dropped = f64::from(first.level?) - f64::from(last.level?);
        Some(dropped / hours)
    }

    pub fn latest(&self) -> Option<&BatterySnapshot> {
        self.snapshots.back()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

pub type SharedBattery = Arc<RwLock<BatteryGate>>;

pub fn shared(gate: BatteryGate) -> SharedBattery {
    Arc::new(RwLock::new(gate))
}

fn is_significant(latest: &BatterySnapshot, reading: &BatteryReading) -> bool {
    if latest.state != reading.state {
        return true;
    }
    match (latest.level, reading.level) {
        (Some(previous), Some(current)) => previous.abs_diff(current) >= SIGNIFICANT_LEVEL_DELTA,
        (None, None) => false,
        _ => true,
    }
}
