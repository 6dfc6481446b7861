pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod platform;
pub mod policy;
pub mod sleep;
pub mod state;
pub mod types;
pub mod wake;

#[cfg(test)]
mod testing;

pub use config::{ClockConfig, NetworkConfig, RuntimeConfig, REFRESH_PERIOD};
pub use device::{format_mac, CycleReport, Orchestrator};
pub use error::{StepError, StepResult};
pub use frame::{Field, Frame};
pub use platform::{Board, DeepSleep, Network, Panel, Rtc, Sensors, Storage, WakeSource};
pub use sleep::SleepPlan;
pub use state::DeviceState;
pub use types::{CycleKind, WakeCause, WakeReason};
