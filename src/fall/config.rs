use std::time::Duration;

/// Thresholds for impact and stillness detection.
#[derive(Debug, Clone)]
pub struct FallConfig {
    pub enabled: bool,

    /// Magnitude (g) that counts as an impact
    pub impact_threshold_g: f64,

    /// Mean absolute deviation from 1 g tolerated during stillness
    pub stillness_tolerance_g: f64,

    /// Continuous stillness needed to confirm a fall
    pub stillness_secs: f64,

    /// Give up on an impact if stillness has not started by then
    pub stillness_timeout_secs: f64,

    /// Half-width of the window around the impact used for the peak
    pub peak_window_secs: f64,

    /// Time the user has to answer "I'm OK" before contacts are alerted
    pub response_countdown: Duration,

    /// Quiet period after a cancellation or a finished alert
    pub cooldown: Duration,
}

impl Default for FallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            impact_threshold_g: 2.5,
            stillness_tolerance_g: 0.2,
            stillness_secs: 3.0,
            stillness_timeout_secs: 5.0,
            peak_window_secs: 0.5,
            response_countdown: Duration::from_secs(60),
            cooldown: Duration::from_secs(2),
        }
    }
}
