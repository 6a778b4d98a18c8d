use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{FallEvent, MotionSample};

use super::FallConfig;

// Set to true to trace every transition of the 50 Hz path
const ENABLE_LOGS: bool = false;

use crate::{log_debug, log_info};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FallState {
    Disabled,
    Monitoring,
    ImpactDetected,
    FallConfirmed,
    Alerting,
    Cancelled,
}

impl Default for FallState {
    fn default() -> Self {
        FallState::Monitoring
    }
}

/// What the controller has to act on after feeding the detector.
#[derive(Debug, Clone, PartialEq)]
pub enum FallSignal {
    Impact { at: DateTime<Utc>, magnitude: f64 },
    Confirmed { incident: u64, event: FallEvent },
    FalseImpact { at: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelEffect {
    /// Nothing was pending.
    Ignored,
    /// A stillness check or countdown was abandoned before alerting.
    Stopped,
    /// The incident had already reached alerting.
    AlertCancelled { incident: u64 },
}

#[derive(Debug, Clone)]
struct ImpactTrack {
    impact_at: DateTime<Utc>,
    peak: f64,
    still_since: Option<DateTime<Utc>>,
    still_deviation_sum: f64,
    still_samples: u32,
}

#[derive(Debug, Clone)]
enum Phase {
    Disabled,
    Monitoring { rearm_at: Option<DateTime<Utc>> },
    ImpactDetected(ImpactTrack),
    FallConfirmed { incident: u64, event: FallEvent },
    Alerting { incident: u64 },
    Cancelled { until: DateTime<Utc> },
}

/// Impact + stillness detector. Consumes one sample at a time; every transition
/// is a function of the current phase, the sample and the configuration.
pub struct FallDetector {
    config: FallConfig,
    phase: Phase,
    recent: VecDeque<MotionSample>,
    next_incident: u64,
}

impl FallDetector {
    pub fn new(config: FallConfig) -> Self {
        let phase = if config.enabled {
            Phase::Monitoring { rearm_at: None }
        } else {
            Phase::Disabled
        };
        Self {
            config,
            phase,
            recent: VecDeque::new(),
            next_incident: 1,
        }
    }

    pub fn state(&self) -> FallState {
        match self.phase {
            Phase::Disabled => FallState::Disabled,
            Phase::Monitoring { .. } => FallState::Monitoring,
            Phase::ImpactDetected(_) => FallState::ImpactDetected,
            Phase::FallConfirmed { .. } => FallState::FallConfirmed,
            Phase::Alerting { .. } => FallState::Alerting,
            Phase::Cancelled { .. } => FallState::Cancelled,
        }
    }

    pub fn config(&self) -> &FallConfig {
        &self.config
    }

    pub fn pending_event(&self) -> Option<&FallEvent> {
        match &self.phase {
            Phase::FallConfirmed { event, .. } => Some(event),
            _ => None,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
        match (&self.phase, enabled) {
            (Phase::Disabled, true) => self.phase = Phase::Monitoring { rearm_at: None },
            (Phase::Monitoring { .. } | Phase::ImpactDetected(_), false) => {
                self.recent.clear();
                self.phase = Phase::Disabled;
            }
            // An incident in progress finishes before the switch takes effect.
            _ => {}
        }
    }

    pub fn process(&mut self, sample: MotionSample) -> Option<FallSignal> {
        if !sample.is_valid() {
            return None;
        }

        if let Phase::Cancelled { until } = self.phase {
            if sample.timestamp >= until {
                self.phase = Phase::Monitoring { rearm_at: None };
            }
        }

        match &mut self.phase {
            Phase::Monitoring { rearm_at } => {
                let armed = rearm_at.map_or(true, |at| sample.timestamp >= at);
                if armed {
                    *rearm_at = None;
                }
                self.remember(sample);
                if armed && sample.magnitude > self.config.impact_threshold_g {
                    return Some(self.begin_impact(sample));
                }
                None
            }
            Phase::ImpactDetected(_) => self.track_stillness(sample),
            _ => None,
        }
    }

    /// Countdown for `incident` ran out without a cancellation.
    pub fn countdown_elapsed(&mut self, incident: u64) -> Option<FallEvent> {
        match &self.phase {
            Phase::FallConfirmed {
                incident: current,
                event,
            } if *current == incident => {
                let event = event.clone();
                log_info!("fall incident {} countdown elapsed, alerting", incident);
                self.phase = Phase::Alerting { incident };
                Some(event)
            }
            _ => None,
        }
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> CancelEffect {
        let effect = match self.phase {
            Phase::ImpactDetected(_) | Phase::FallConfirmed { .. } => CancelEffect::Stopped,
            Phase::Alerting { incident } => CancelEffect::AlertCancelled { incident },
            _ => return CancelEffect::Ignored,
        };
        self.recent.clear();
        self.phase = Phase::Cancelled {
            until: now + to_chrono(self.config.cooldown),
        };
        effect
    }

    /// Ends the post-cancellation cooldown once its deadline has passed.
    pub fn finish_cooldown(&mut self, now: DateTime<Utc>) -> bool {
        match self.phase {
            Phase::Cancelled { until } if now >= until => {
                self.phase = self.idle_phase(None);
                true
            }
            _ => false,
        }
    }

    /// The remote alert for `incident` finished (sent or failed).
    pub fn alert_resolved(&mut self, incident: u64, now: DateTime<Utc>) -> bool {
        match self.phase {
            Phase::Alerting { incident: current } if current == incident => {
                self.phase = self.idle_phase(Some(now + to_chrono(self.config.cooldown)));
                true
            }
            _ => false,
        }
    }

    /// Produces a confirmed incident without any sensor input.
    pub fn trigger_manual_test(&mut self, now: DateTime<Utc>) -> Option<FallSignal> {
        if matches!(
            self.phase,
            Phase::FallConfirmed { .. } | Phase::Alerting { .. }
        ) {
            return None;
        }
        let event = FallEvent {
            impact_at: now,
            peak_magnitude: self.config.impact_threshold_g,
            stillness_secs: 0.0,
            synthetic: true,
        };
        Some(self.confirm(event))
    }

    fn idle_phase(&self, rearm_at: Option<DateTime<Utc>>) -> Phase {
        if self.config.enabled {
            Phase::Monitoring { rearm_at }
        } else {
            Phase::Disabled
        }
    }

    fn remember(&mut self, sample: MotionSample) {
        let horizon = sample.timestamp - secs(self.config.peak_window_secs);
        self.recent.push_back(sample);
        while self
            .recent
            .front()
            .is_some_and(|oldest| oldest.timestamp < horizon)
        {
            self.recent.pop_front();
        }
    }

    fn begin_impact(&mut self, sample: MotionSample) -> FallSignal {
        let peak = self
            .recent
            .iter()
            .map(|recent| recent.magnitude)
            .fold(sample.magnitude, f64::max);
        log_info!(
            "impact detected at {} ({:.2} g)",
            sample.timestamp,
            sample.magnitude
        );
        self.phase = Phase::ImpactDetected(ImpactTrack {
            impact_at: sample.timestamp,
            peak,
            still_since: None,
            still_deviation_sum: 0.0,
            still_samples: 0,
        });
        FallSignal::Impact {
            at: sample.timestamp,
            magnitude: sample.magnitude,
        }
    }

    fn track_stillness(&mut self, sample: MotionSample) -> Option<FallSignal> {
        let tolerance = self.config.stillness_tolerance_g;
        let required = self.config.stillness_secs;
        let timeout = self.config.stillness_timeout_secs;
        let peak_window = secs(self.config.peak_window_secs);

        let Phase::ImpactDetected(track) = &mut self.phase else {
            return None;
        };

        if sample.timestamp <= track.impact_at + peak_window {
            track.peak = track.peak.max(sample.magnitude);
        }

        let deviation = (sample.magnitude - 1.0).abs();
        match track.still_since {
            Some(_) => {
                let mean = (track.still_deviation_sum + deviation)
                    / f64::from(track.still_samples + 1);
                if mean < tolerance {
                    track.still_deviation_sum += deviation;
                    track.still_samples += 1;
                } else {
                    log_debug!("stillness broken at {}", sample.timestamp);
                    track.still_since = None;
                    track.still_deviation_sum = 0.0;
                    track.still_samples = 0;
                }
            }
            None if deviation < tolerance => {
                track.still_since = Some(sample.timestamp);
                track.still_deviation_sum = deviation;
                track.still_samples = 1;
            }
            None => {}
        }

        let since_impact = seconds_between(track.impact_at, sample.timestamp);
        if let Some(start) = track.still_since {
            let still_for = seconds_between(start, sample.timestamp);
            if still_for >= required {
                let event = FallEvent {
                    impact_at: track.impact_at,
                    peak_magnitude: track.peak,
                    stillness_secs: still_for,
                    synthetic: false,
                };
                return Some(self.confirm(event));
            }
            if since_impact <= timeout + required {
                return None;
            }
        } else if since_impact <= timeout {
            return None;
        }

        let impact_at = track.impact_at;
        log_info!("impact at {} not followed by stillness, resuming", impact_at);
        self.recent.clear();
        self.phase = Phase::Monitoring { rearm_at: None };
        Some(FallSignal::FalseImpact { at: impact_at })
    }

    fn confirm(&mut self, event: FallEvent) -> FallSignal {
        let incident = self.next_incident;
        self.next_incident += 1;
        self.recent.clear();
        self.phase = Phase::FallConfirmed {
            incident,
            event: event.clone(),
        };
        FallSignal::Confirmed { incident, event }
    }
}

fn secs(value: f64) -> Duration {
    Duration::milliseconds((value * 1_000.0).round() as i64)
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1_000.0
}

pub(super) fn to_chrono(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or_else(|_| Duration::seconds(2))
}
