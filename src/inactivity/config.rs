use chrono::Duration;
use log::warn;

use super::QuietHours;

pub const DEFAULT_THRESHOLD_HOURS: f64 = 4.0;
pub const MAX_THRESHOLD_HOURS: f64 = 7.0 * 24.0;
pub const NUDGE_FRACTION: f64 = 0.75;

/// Finite, positive and at most a week.
pub fn is_valid_threshold(hours: f64) -> bool {
    hours.is_finite() && hours > 0.0 && hours <= MAX_THRESHOLD_HOURS
}

#[derive(Debug, Clone, PartialEq)]
pub struct InactivityConfig {
    pub threshold: Duration,
    pub quiet_hours: Option<QuietHours>,
}

impl Default for InactivityConfig {
    fn default() -> Self {
        Self {
            threshold: hours(DEFAULT_THRESHOLD_HOURS),
            quiet_hours: None,
        }
    }
}

impl InactivityConfig {
    /// Zero, negative, non-finite or over-a-week thresholds fall back to the 4 h default.
    pub fn new(threshold_hours: f64, quiet_hours: Option<QuietHours>) -> Self {
        let threshold_hours = if is_valid_threshold(threshold_hours) {
            threshold_hours
        } else {
            warn!(
                "invalid inactivity threshold {threshold_hours}h, using {DEFAULT_THRESHOLD_HOURS}h"
            );
            DEFAULT_THRESHOLD_HOURS
        };

        Self {
            threshold: hours(threshold_hours),
            quiet_hours,
        }
    }

    pub fn nudge_after(&self) -> Duration {
        Duration::milliseconds((self.threshold.num_milliseconds() as f64 * NUDGE_FRACTION) as i64)
    }
}

fn hours(value: f64) -> Duration {
    Duration::try_seconds((value * 3_600.0).round() as i64)
        .unwrap_or_else(|| Duration::hours(DEFAULT_THRESHOLD_HOURS as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_thresholds_use_default() {
        for bad in [0.0, -2.0, f64::NAN, f64::INFINITY, 1e13, MAX_THRESHOLD_HOURS + 1.0] {
            assert_eq!(InactivityConfig::new(bad, None).threshold, Duration::hours(4));
        }
        assert_eq!(InactivityConfig::new(1.5, None).threshold, Duration::minutes(90));
        assert_eq!(
            InactivityConfig::new(MAX_THRESHOLD_HOURS, None).threshold,
            Duration::days(7)
        );
    }

    #[test]
    fn out_of_range_hours_do_not_overflow() {
        assert_eq!(hours(1e13), Duration::hours(4));
        assert_eq!(hours(2.0), Duration::hours(2));
    }

    #[test]
    fn nudge_at_three_quarters() {
        assert_eq!(InactivityConfig::default().nudge_after(), Duration::hours(3));
    }
}
