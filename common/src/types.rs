use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    Timer,
    ExternalPin,
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    ColdStart,
    TimerAlarm,
    ButtonPress,
}

impl WakeReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ColdStart => "COLD_START",
            Self::TimerAlarm => "TIMER_ALARM",
            Self::ButtonPress => "BUTTON_PRESS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    Full,
    Partial,
}

impl CycleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Partial => "PARTIAL",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpLookup {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimezoneLookup {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub offset: i32,
}

pub const LOOKUP_SUCCESS: &str = "success";
