//! Boundaries to the world outside the engine: clock, prompts, remote alerts,
//! roster and battery source. The engine only ever talks to these traits.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveDateTime, NaiveTime, Utc};

use crate::models::{AlertRequest, BatteryReading, Contact, DispatchReceipt, PromptRequest};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Wall-clock reading used for quiet hours and hour-of-day buckets.
    fn local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        at.with_timezone(&Local).naive_local()
    }

    fn local_time(&self, at: DateTime<Utc>) -> NaiveTime {
        self.local(at).time()
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock whose local time equals UTC. Used by tests and replay tools.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut guard = match self.now.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = at;
    }

    pub fn advance(&self, by: Duration) {
        let current = self.now();
        self.set(current + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        at.naive_utc()
    }
}

/// Fire-and-forget delivery of a prompt to the user.
#[async_trait]
pub trait LocalPromptDispatcher: Send + Sync {
    async fn prompt(&self, request: PromptRequest);
}

/// The single place where real-world notification happens.
#[async_trait]
pub trait RemoteAlertDispatcher: Send + Sync {
    async fn dispatch(&self, request: &AlertRequest) -> DispatchReceipt;
}

pub trait RosterProvider: Send + Sync {
    fn display_name(&self) -> String;
    fn contacts(&self) -> Vec<Contact>;
}

#[async_trait]
pub trait BatterySource: Send + Sync {
    async fn current(&self) -> Option<BatteryReading>;
}
