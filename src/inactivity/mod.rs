pub mod config;
pub mod controller;
pub mod quiet_hours;
pub mod state;

pub use config::{
    is_valid_threshold, InactivityConfig, DEFAULT_THRESHOLD_HOURS, MAX_THRESHOLD_HOURS,
};
pub use controller::{InactivityController, InactivitySnapshot};
pub use quiet_hours::QuietHours;
pub use state::{InactivityAction, MonitoringState, NegativeSpaceMachine};
