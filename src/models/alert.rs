use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum AlertKind {
    Fall,
    Inactivity,
    PatternDeviation,
}

impl AlertKind {
    pub const ALL: [AlertKind; 3] = [
        AlertKind::Fall,
        AlertKind::Inactivity,
        AlertKind::PatternDeviation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Fall => "fall",
            AlertKind::Inactivity => "inactivity",
            AlertKind::PatternDeviation => "pattern-deviation",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationContext {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
}

/// Everything the remote dispatcher needs to notify the roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlertRequest {
    pub incident_id: Uuid,
    pub display_name: String,
    pub kind: AlertKind,
    pub location: Option<LocationContext>,
    pub contacts: Vec<Contact>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReceipt {
    pub success: bool,
    pub sent_count: usize,
    pub total_count: usize,
    pub error: Option<String>,
}

impl DispatchReceipt {
    pub fn failed(total_count: usize, error: impl Into<String>) -> Self {
        Self {
            success: false,
            sent_count: 0,
            total_count,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PromptCategory {
    CheckIn,
    UrgentCheckIn,
    FallCountdown,
    AlertSent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    pub title: String,
    pub body: String,
    pub category: PromptCategory,
}

impl PromptRequest {
    pub fn new(title: impl Into<String>, body: impl Into<String>, category: PromptCategory) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            category,
        }
    }
}
