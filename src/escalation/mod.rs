pub mod config;
pub mod coordinator;

pub use config::EscalationConfig;
pub use coordinator::{CancelOutcome, EscalationCoordinator, Resolution, Submission};
