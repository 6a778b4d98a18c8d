//! Logging macros that can be silenced per module through an `ENABLE_LOGS` const.
//!
//! The fall path runs at 50 Hz; its modules keep the const at `false` unless a
//! transition needs tracing.
//!
//! ```rust,ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_debug, log_info};
//!
//! log_info!("impact {magnitude:.2} g");
//! ```

/// `log::debug!` when the calling module's `ENABLE_LOGS` is true.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    }};
}

/// `log::info!` when the calling module's `ENABLE_LOGS` is true.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    }};
}

/// `log::warn!` when the calling module's `ENABLE_LOGS` is true.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    }};
}

/// Errors are always worth seeing, but the gate keeps the macro family uniform.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    }};
}
