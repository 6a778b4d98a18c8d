use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ChargeState {
    Unplugged,
    Charging,
    Full,
    Unknown,
}

impl ChargeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeState::Unplugged => "unplugged",
            ChargeState::Charging => "charging",
            ChargeState::Full => "full",
            ChargeState::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "unplugged" => ChargeState::Unplugged,
            "charging" => ChargeState::Charging,
            "full" => ChargeState::Full,
            _ => ChargeState::Unknown,
        }
    }
}

/// A reading delivered by the battery source, before the gate decides whether to keep it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatteryReading {
    /// 0-100, `None` when the platform cannot report a level.
    pub level: Option<u8>,
    pub state: ChargeState,
    pub power_save: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatterySnapshot {
    pub timestamp: DateTime<Utc>,
    pub level: Option<u8>,
    pub state: ChargeState,
    pub power_save: bool,
}
