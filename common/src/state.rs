use heapless::String;
use serde::{Deserialize, Serialize};

use crate::{
    policy::{decide_cycle, CycleDecision},
    types::{CycleKind, WakeReason},
};

pub const MAC_ADDRESS_LEN: usize = 17;
pub const LOCAL_IP_LEN: usize = 15;
pub const PUBLIC_IP_LEN: usize = 39;
pub const LOCATION_LEN: usize = 39;
pub const DIMENSIONS_LEN: usize = 9;
pub const TIME_LEN: usize = 5;

/// Device state retained across deep sleep.
///
/// Plain data with inline strings so it can be placed in RTC slow memory and
/// zero-initialized once at power-on through [`DeviceState::new`]. Every wake
/// mutates the same instance; only the orchestrator holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub booted: bool,
    pub refresh_count: u8,
    pub sd_card_available: bool,
    pub temperature_celsius: i8,
    pub battery_voltage: f32,
    pub network_connected: bool,
    pub mac_address: String<MAC_ADDRESS_LEN>,
    pub local_ip_address: String<LOCAL_IP_LEN>,
    pub public_ip_address: String<PUBLIC_IP_LEN>,
    pub location: String<LOCATION_LEN>,
    pub screen_dimensions: String<DIMENSIONS_LEN>,
    pub last_rendered_time: String<TIME_LEN>,
}

impl DeviceState {
    pub const fn new() -> Self {
        Self {
            booted: false,
            refresh_count: 0,
            sd_card_available: false,
            temperature_celsius: 0,
            battery_voltage: 0.0,
            network_connected: false,
            mac_address: String::new(),
            local_ip_address: String::new(),
            public_ip_address: String::new(),
            location: String::new(),
            screen_dimensions: String::new(),
            last_rendered_time: String::new(),
        }
    }

    pub fn apply_wake(&mut self, reason: WakeReason, refresh_period: u8) -> CycleKind {
        let CycleDecision {
            kind,
            refresh_count,
        } = decide_cycle(reason, self.refresh_count, refresh_period);
        self.refresh_count = refresh_count;
        kind
    }

    pub fn clear_public_lookup(&mut self) {
        self.public_ip_address.clear();
        self.location.clear();
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}

pub fn set_truncated<const N: usize>(target: &mut String<N>, value: &str) {
    target.clear();
    for ch in value.chars() {
        if target.push(ch).is_err() {
            break;
        }
    }
}
