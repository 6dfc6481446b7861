use log::debug;

use crate::types::{WakeCause, WakeReason};

pub fn classify_wake_reason(cause: WakeCause) -> WakeReason {
    let reason = match cause {
        WakeCause::Timer => WakeReason::TimerAlarm,
        WakeCause::ExternalPin => WakeReason::ButtonPress,
        WakeCause::Undefined => WakeReason::ColdStart,
    };
    debug!("wake cause {cause:?} classified as {}", reason.as_str());
    reason
}
