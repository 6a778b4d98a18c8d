use std::time::Duration;

use crate::models::AlertKind;

/// Delay between a trigger and the hand-off to the remote dispatcher, per kind.
/// The delay is the window in which the user can still cancel.
#[derive(Debug, Clone)]
pub struct EscalationConfig {
    /// Falls already had their response countdown in the fall controller.
    pub fall_grace: Duration,
    pub inactivity_grace: Duration,
    pub pattern_grace: Duration,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            fall_grace: Duration::ZERO,
            inactivity_grace: Duration::from_secs(300),
            pattern_grace: Duration::from_secs(300),
        }
    }
}

impl EscalationConfig {
    pub fn grace_for(&self, kind: AlertKind) -> Duration {
        match kind {
            AlertKind::Fall => self.fall_grace,
            AlertKind::Inactivity => self.inactivity_grace,
            AlertKind::PatternDeviation => self.pattern_grace,
        }
    }
}
