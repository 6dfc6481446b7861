#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepPlan {
    pub seconds: u8,
    pub wake_button_gpio: i32,
}

impl SleepPlan {
    pub fn until_next_minute(current_second: u32, wake_button_gpio: i32) -> Self {
        Self {
            seconds: seconds_until_next_minute(current_second),
            wake_button_gpio,
        }
    }

    pub fn micros(&self) -> u64 {
        u64::from(self.seconds) * 1_000_000
    }
}

/// Seconds to the next minute boundary, in `1..=60`. A wake at second 0 sleeps
/// a full minute; leap seconds are treated as second 59.
pub fn seconds_until_next_minute(current_second: u32) -> u8 {
    let second = current_second.min(59) as u8;
    60 - second
}
