use chrono::{DateTime, Duration, NaiveTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::battery::BatteryGate;

use super::InactivityConfig;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MonitoringState {
    Learning,
    Active,
    QuietHours,
    Paused,
    AlertPending,
    AlertSent,
}

impl Default for MonitoringState {
    fn default() -> Self {
        MonitoringState::Learning
    }
}

/// Side effects the owner of the machine has to carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum InactivityAction {
    RequestCheckIn { elapsed: Duration },
    RaiseAlert { elapsed: Duration, last_activity: DateTime<Utc> },
    /// Silence past the threshold explained by a dead battery.
    Suppressed { last_activity: DateTime<Utc> },
    /// Activity arrived while an alert was pending.
    AlertCancelled,
}

/// Decides, from elapsed silence, when to nudge, when to alert and when to stand down.
#[derive(Debug, Clone)]
pub struct NegativeSpaceMachine {
    state: MonitoringState,
    config: InactivityConfig,
    nudge_sent: bool,
    suppression_reported: bool,
}

impl NegativeSpaceMachine {
    pub fn new(config: InactivityConfig) -> Self {
        Self {
            state: MonitoringState::Learning,
            config,
            nudge_sent: false,
            suppression_reported: false,
        }
    }

    pub fn state(&self) -> MonitoringState {
        self.state
    }

    pub fn config(&self) -> &InactivityConfig {
        &self.config
    }

    pub fn nudge_sent(&self) -> bool {
        self.nudge_sent
    }

    pub fn update_config(&mut self, config: InactivityConfig) {
        self.config = config;
    }

    /// Leaves the learning state once monitoring is enabled.
    pub fn start(&mut self) -> bool {
        if self.state != MonitoringState::Learning {
            return false;
        }
        self.enter_active();
        true
    }

    pub fn pause(&mut self) -> bool {
        match self.state {
            MonitoringState::Active | MonitoringState::QuietHours => {
                self.state = MonitoringState::Paused;
                true
            }
            _ => false,
        }
    }

    pub fn resume(&mut self) -> bool {
        if self.state != MonitoringState::Paused {
            return false;
        }
        self.enter_active();
        true
    }

    /// One periodic evaluation. `last_activity` is `None` only when the ledger is
    /// empty, in which case the silence counts as zero.
    pub fn evaluate(
        &mut self,
        now: DateTime<Utc>,
        local_time: NaiveTime,
        last_activity: Option<DateTime<Utc>>,
        battery: &BatteryGate,
    ) -> Option<InactivityAction> {
        match self.state {
            MonitoringState::Learning
            | MonitoringState::Paused
            | MonitoringState::AlertPending
            | MonitoringState::AlertSent => return None,
            MonitoringState::Active | MonitoringState::QuietHours => {}
        }

        let in_quiet_hours = self
            .config
            .quiet_hours
            .is_some_and(|quiet| quiet.contains(local_time));
        if in_quiet_hours {
            if self.state != MonitoringState::QuietHours {
                info!("entering quiet hours at {local_time}");
                self.state = MonitoringState::QuietHours;
            }
            return None;
        }
        if self.state == MonitoringState::QuietHours {
            info!("quiet hours over at {local_time}");
            self.enter_active();
        }

        let last_activity = last_activity?;
        let elapsed = (now - last_activity).max(Duration::zero());

        if elapsed >= self.config.threshold {
            if battery.likely_dead_at(last_activity) {
                if self.suppression_reported {
                    return None;
                }
                self.suppression_reported = true;
                warn!(
                    "silence since {last_activity} explained by a dead battery, not alerting"
                );
                return Some(InactivityAction::Suppressed { last_activity });
            }

            warn!(
                "no activity for {} min (threshold {} min), alert pending",
                elapsed.num_minutes(),
                self.config.threshold.num_minutes()
            );
            self.state = MonitoringState::AlertPending;
            return Some(InactivityAction::RaiseAlert {
                elapsed,
                last_activity,
            });
        }

        if elapsed >= self.config.nudge_after() && !self.nudge_sent {
            self.nudge_sent = true;
            info!("no activity for {} min, nudging", elapsed.num_minutes());
            return Some(InactivityAction::RequestCheckIn { elapsed });
        }

        None
    }

    /// Any new activity clears the cycle flags and stands down a pending or sent alert.
    pub fn activity_recorded(&mut self) -> Option<InactivityAction> {
        self.nudge_sent = false;
        self.suppression_reported = false;

        match self.state {
            MonitoringState::AlertPending => {
                info!("activity while alert pending, standing down");
                self.enter_active();
                Some(InactivityAction::AlertCancelled)
            }
            MonitoringState::AlertSent => {
                info!("activity after alert was sent, monitoring again");
                self.enter_active();
                None
            }
            _ => None,
        }
    }

    /// The coordinator handed the alert to the dispatcher (whatever the outcome).
    pub fn alert_dispatched(&mut self) -> bool {
        if self.state != MonitoringState::AlertPending {
            return false;
        }
        self.state = MonitoringState::AlertSent;
        true
    }

    fn enter_active(&mut self) {
        self.state = MonitoringState::Active;
        self.nudge_sent = false;
        self.suppression_reported = false;
    }
}
