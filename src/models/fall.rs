use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One accelerometer reading reduced to its gravity-inclusive vector norm, in g.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MotionSample {
    pub timestamp: DateTime<Utc>,
    pub magnitude: f64,
}

impl MotionSample {
    pub fn new(timestamp: DateTime<Utc>, magnitude: f64) -> Self {
        Self {
            timestamp,
            magnitude,
        }
    }

    pub fn from_axes(timestamp: DateTime<Utc>, x: f64, y: f64, z: f64) -> Self {
        Self::new(timestamp, (x * x + y * y + z * z).sqrt())
    }

    pub fn is_valid(&self) -> bool {
        self.magnitude.is_finite() && self.magnitude >= 0.0
    }
}

/// A confirmed fall. Produced once per incident and handed to escalation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FallEvent {
    pub impact_at: DateTime<Utc>,
    pub peak_magnitude: f64,
    pub stillness_secs: f64,
    /// Set for events produced by a manual test rather than the sensor path.
    pub synthetic: bool,
}
