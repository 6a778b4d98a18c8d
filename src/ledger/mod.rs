//! Append-only, time-ordered record of activity signals.

use std::{collections::VecDeque, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::models::ActivityEvent;

pub const MAX_LEDGER_ENTRIES: usize = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLedger {
    events: VecDeque<ActivityEvent>,
    max_entries: usize,
}

impl Default for ActivityLedger {
    fn default() -> Self {
        Self::new(MAX_LEDGER_ENTRIES)
    }
}

impl ActivityLedger {
    pub fn new(max_entries: usize) -> Self {
        Self {
            events: VecDeque::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Inserts keeping timestamp order. Late arrivals slot in behind newer events;
    /// the usual case is a plain push to the back.
    pub fn record(&mut self, event: ActivityEvent) {
        let position = self
            .events
            .iter()
            .rposition(|existing| existing.timestamp <= event.timestamp)
            .map(|index| index + 1)
            .unwrap_or(0);
        self.events.insert(position, event);
        self.trim(self.max_entries);
    }

    pub fn trim(&mut self, max_entries: usize) {
        while self.events.len() > max_entries {
            self.events.pop_front();
        }
    }

    pub fn last(&self) -> Option<&ActivityEvent> {
        self.events.back()
    }

    pub fn last_activity_at(&self) -> Option<DateTime<Utc>> {
        self.last().map(|event| event.timestamp)
    }

    /// `None` means no history. Events stamped in the future count as "just now".
    pub fn time_since_last(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_activity_at()
            .map(|last| (now - last).max(Duration::zero()))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events_since(&self, since: DateTime<Utc>) -> impl Iterator<Item = &ActivityEvent> {
        self.events
            .iter()
            .filter(move |event| event.timestamp >= since)
    }
}

pub type SharedLedger = Arc<RwLock<ActivityLedger>>;

pub fn shared(ledger: ActivityLedger) -> SharedLedger {
    Arc::new(RwLock::new(ledger))
}
