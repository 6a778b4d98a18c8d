pub mod config;
pub mod controller;
pub mod state;

pub use config::FallConfig;
pub use controller::FallController;
pub use state::{CancelEffect, FallDetector, FallSignal, FallState};
