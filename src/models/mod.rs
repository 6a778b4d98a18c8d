//! Plain data shared by the detectors, the coordinator and the host adapters.

pub mod activity;
pub mod alert;
pub mod battery;
pub mod fall;

pub use activity::{ActivityEvent, ActivityMetadata, SignalKind};
pub use alert::{
    AlertKind, AlertRequest, Contact, DispatchReceipt, LocationContext, PromptCategory,
    PromptRequest,
};
pub use battery::{BatteryReading, BatterySnapshot, ChargeState};
pub use fall::{FallEvent, MotionSample};
