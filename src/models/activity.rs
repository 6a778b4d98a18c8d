use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SignalKind {
    Steps,
    Pickup,
    AppOpen,
    UserCheckIn,
    Movement,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Steps => "steps",
            SignalKind::Pickup => "pickup",
            SignalKind::AppOpen => "app-open",
            SignalKind::UserCheckIn => "user-check-in",
            SignalKind::Movement => "movement",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "steps" => Some(SignalKind::Steps),
            "pickup" => Some(SignalKind::Pickup),
            "app-open" => Some(SignalKind::AppOpen),
            "user-check-in" | "check-in" => Some(SignalKind::UserCheckIn),
            "movement" => Some(SignalKind::Movement),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityMetadata {
    /// Magnitude carried by counter signals, e.g. the step count of a `Steps` event.
    pub quantity: Option<u32>,
    pub source: Option<String>,
}

/// A discrete activity signal. Never mutated after it is recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: SignalKind,
    pub metadata: Option<ActivityMetadata>,
}

impl ActivityEvent {
    pub fn new(timestamp: DateTime<Utc>, kind: SignalKind) -> Self {
        Self {
            timestamp,
            kind,
            metadata: None,
        }
    }

    pub fn with_quantity(timestamp: DateTime<Utc>, kind: SignalKind, quantity: u32) -> Self {
        Self {
            timestamp,
            kind,
            metadata: Some(ActivityMetadata {
                quantity: Some(quantity),
                source: None,
            }),
        }
    }

    pub fn bootstrap(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            kind: SignalKind::Movement,
            metadata: Some(ActivityMetadata {
                quantity: None,
                source: Some("bootstrap".into()),
            }),
        }
    }

    pub fn quantity(&self) -> u32 {
        self.metadata
            .as_ref()
            .and_then(|meta| meta.quantity)
            .unwrap_or(0)
    }
}
