/// Tunable thresholds for the baseline learner.
#[derive(Debug, Clone)]
pub struct BaselineConfig {
    /// Days after install before deviation alerts may fire
    pub learning_days: i64,

    /// Rolling samples kept per hour bucket (FIFO)
    pub bucket_capacity: usize,

    /// Samples needed before an expectation is reported
    pub min_samples_expected: usize,

    /// Samples needed before a deviation can be flagged
    pub min_samples_deviation: usize,

    /// Expected activity mean must exceed this before an hour can deviate
    pub activity_noise_floor: f64,

    /// Current value below this fraction of the expectation counts as a deviation
    pub deviation_ratio: f64,

    /// Inclusive hour range treated as night (silence expected)
    pub night_start_hour: u8,
    pub night_end_hour: u8,

    /// Allow deviation checks during night hours
    pub relaxed_night: bool,

    /// Daily summaries kept
    pub summary_days: usize,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            learning_days: 14,
            bucket_capacity: 30,
            min_samples_expected: 3,
            min_samples_deviation: 7,
            activity_noise_floor: 100.0,
            deviation_ratio: 0.25,
            night_start_hour: 0,
            night_end_hour: 5,
            relaxed_night: false,
            summary_days: 60,
        }
    }
}

impl BaselineConfig {
    pub fn is_night_hour(&self, hour: u8) -> bool {
        hour >= self.night_start_hour && hour <= self.night_end_hour
    }
}
