//! Learned expectation of activity per hour of day.

pub mod bucket;
pub mod config;
pub mod learner;
pub mod rollup;
pub mod summary;

pub use bucket::HourlyBucket;
pub use config::BaselineConfig;
pub use learner::{BaselineLearner, Deviation, Expectation, LearnerPhase};
pub use rollup::{ClosedHour, HourlyRollup, RolledUp};
pub use summary::{is_weekend, DailySummary};
