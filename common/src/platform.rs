//! Capabilities the control loop consumes from the board.
//!
//! Every call is blocking and runs to completion. Fallible calls report a
//! [`StepError`] value; none of them is allowed to abort a wake cycle.

use std::{net::Ipv4Addr, time::Duration};

use chrono::NaiveDateTime;

use crate::{
    config::NetworkConfig,
    error::StepResult,
    frame::Frame,
    sleep::SleepPlan,
    types::WakeCause,
};

pub trait WakeSource {
    fn wake_cause(&self) -> WakeCause;
}

/// Direct sensor reads. These have no failure mode; implementations return a
/// neutral value when the hardware does not answer.
pub trait Sensors {
    fn battery_voltage(&mut self) -> f32;
    fn temperature_celsius(&mut self) -> i8;
    fn sd_card_available(&mut self) -> bool;
    fn mac_address(&self) -> [u8; 6];
}

pub trait Network {
    fn connect(&mut self, credentials: &NetworkConfig, timeout: Duration) -> StepResult<()>;
    fn disconnect(&mut self) -> StepResult<()>;
    fn is_connected(&self) -> bool;
    fn local_address(&self) -> Option<Ipv4Addr>;
    /// GETs `url` and parses the body; non-200 statuses are errors.
    fn fetch_json(&mut self, url: &str) -> StepResult<serde_json::Value>;
    fn time_source_epoch(&mut self) -> StepResult<i64>;
}

/// Battery-backed real-time clock holding local wall-clock time.
pub trait Rtc {
    fn set_epoch(&mut self, epoch: i64) -> StepResult<()>;
    fn now(&mut self) -> StepResult<NaiveDateTime>;
}

pub trait Panel {
    fn dimensions(&self) -> (u32, u32);
    fn boot_line(&mut self, line: &str);
    fn full_repaint(&mut self, frame: &Frame);
    /// Preloads `frame` drawn with `previous_time`, swaps the time region to
    /// `frame.time` and performs a partial refresh.
    fn partial_repaint(&mut self, frame: &Frame, previous_time: &str);
}

pub trait Storage {
    fn mount(&mut self) -> StepResult<()>;
    /// Appends `line` plus a newline, stamping the file with `modified`.
    fn append_line(&mut self, path: &str, line: &str, modified: NaiveDateTime) -> StepResult<()>;
}

pub trait Board: WakeSource + Sensors + Network + Rtc + Panel + Storage {}

impl<T> Board for T where T: WakeSource + Sensors + Network + Rtc + Panel + Storage {}

/// Enters deep sleep; execution resumes at the program entry point.
pub trait DeepSleep {
    fn deep_sleep(&mut self, plan: SleepPlan) -> !;
}
