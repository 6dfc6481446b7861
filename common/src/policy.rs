use crate::types::{CycleKind, WakeReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleDecision {
    pub kind: CycleKind,
    pub refresh_count: u8,
}

impl CycleDecision {
    const fn full() -> Self {
        Self {
            kind: CycleKind::Full,
            refresh_count: 0,
        }
    }
}

/// Decides between a full and a partial redraw for this wake.
///
/// Cold starts and button presses always redraw everything. Timer wakes count
/// up and force a full redraw once the counter reaches `refresh_period`.
pub fn decide_cycle(reason: WakeReason, refresh_count: u8, refresh_period: u8) -> CycleDecision {
    match reason {
        WakeReason::ColdStart | WakeReason::ButtonPress => CycleDecision::full(),
        WakeReason::TimerAlarm => {
            let next = refresh_count.saturating_add(1);
            if next >= refresh_period.max(1) {
                CycleDecision::full()
            } else {
                CycleDecision {
                    kind: CycleKind::Partial,
                    refresh_count: next,
                }
            }
        }
    }
}
