use std::time::Duration;

use chrono::{NaiveDateTime, Timelike};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;

use crate::{
    clock::{format_date_time, format_time, resolve_utc_offset, rtc_power_on_default},
    config::RuntimeConfig,
    error::{StepError, StepResult},
    frame::Frame,
    platform::Board,
    sleep::SleepPlan,
    state::{set_truncated, DeviceState},
    types::{CycleKind, IpLookup, TimezoneLookup, WakeReason, LOOKUP_SUCCESS},
    wake::classify_wake_reason,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Boot,
    Classify,
    Acquire,
    RenderFull,
    RenderPartial,
    Sleep,
}

/// Outcome of one wake cycle. The caller commits the state and then hands
/// `sleep` to the deep-sleep capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub reason: WakeReason,
    pub kind: CycleKind,
    pub booted_now: bool,
    pub sleep: SleepPlan,
}

pub struct Orchestrator<'a, B: Board> {
    board: &'a mut B,
    state: &'a mut DeviceState,
    runtime: &'a RuntimeConfig,
}

impl<'a, B: Board> Orchestrator<'a, B> {
    pub fn new(board: &'a mut B, state: &'a mut DeviceState, runtime: &'a RuntimeConfig) -> Self {
        Self {
            board,
            state,
            runtime,
        }
    }

    pub fn run_cycle(&mut self) -> CycleReport {
        let mut phase = Phase::Init;
        let mut reason = WakeReason::ColdStart;
        let mut kind = CycleKind::Full;
        let mut booted_now = false;

        loop {
            debug!("entering phase {phase:?}");
            phase = match phase {
                Phase::Init => {
                    if self.state.booted {
                        Phase::Classify
                    } else {
                        Phase::Boot
                    }
                }
                Phase::Boot => {
                    booted_now = self.boot();
                    Phase::Classify
                }
                Phase::Classify => {
                    reason = classify_wake_reason(self.board.wake_cause());
                    kind = self
                        .state
                        .apply_wake(reason, self.runtime.clock.refresh_period);
                    info!(
                        "woken by {}: {} cycle (refresh count {})",
                        reason.as_str(),
                        kind.as_str(),
                        self.state.refresh_count
                    );
                    match kind {
                        CycleKind::Full => Phase::Acquire,
                        CycleKind::Partial => Phase::RenderPartial,
                    }
                }
                Phase::Acquire => {
                    if self.runtime.clock.battery_log_enabled {
                        self.log_battery_level();
                    }
                    self.acquire_state();
                    Phase::RenderFull
                }
                Phase::RenderFull => {
                    self.render_full();
                    Phase::Sleep
                }
                Phase::RenderPartial => {
                    self.render_partial();
                    Phase::Sleep
                }
                Phase::Sleep => {
                    let second = self.current_time().second();
                    let sleep =
                        SleepPlan::until_next_minute(second, self.runtime.clock.wake_button_gpio);
                    info!("going to sleep for {} seconds", sleep.seconds);
                    return CycleReport {
                        reason,
                        kind,
                        booted_now,
                        sleep,
                    };
                }
            };
        }
    }

    /// One-time initialisation. Returns `false` without touching anything when
    /// the device has already booted.
    pub fn boot(&mut self) -> bool {
        if self.state.booted {
            debug!("boot sequence already completed");
            return false;
        }

        info!("booting");
        self.board.boot_line("Booting...");

        let properties = self.read_static_properties();
        self.report_step("Getting properties", properties);
        let connected = self.connect_network();
        self.report_step("Connecting to WiFi", connected);
        let clock = self.set_rtc_clock();
        self.report_step("Setting time", clock);
        let disconnected = self.disconnect_network();
        self.report_step("Disconnecting WiFi", disconnected);

        // At most once, even when steps failed.
        self.state.booted = true;
        true
    }

    pub fn acquire_state(&mut self) {
        if let Err(err) = self.connect_network() {
            warn!("network unavailable for state refresh: {err}");
        }

        self.state.sd_card_available = self.board.sd_card_available();
        self.state.temperature_celsius = self.board.temperature_celsius();
        self.state.battery_voltage = self.board.battery_voltage();
        self.state.network_connected = self.board.is_connected();

        if self.state.network_connected {
            match self.board.local_address() {
                Some(address) => {
                    set_truncated(&mut self.state.local_ip_address, &address.to_string())
                }
                None => self.state.local_ip_address.clear(),
            }

            match self.lookup_public_address() {
                Ok(lookup) => {
                    set_truncated(&mut self.state.public_ip_address, &lookup.query);
                    set_truncated(
                        &mut self.state.location,
                        &format!("{}, {}", lookup.city, lookup.country),
                    );
                    debug!(
                        "public IP address {} in {}",
                        self.state.public_ip_address, self.state.location
                    );
                }
                Err(err) => {
                    warn!("failed to query IP address API: {err}");
                    self.state.clear_public_lookup();
                }
            }
        } else {
            self.state.local_ip_address.clear();
            self.state.public_ip_address.clear();
        }

        if let Err(err) = self.disconnect_network() {
            debug!("skipping disconnect after state refresh: {err}");
        }
    }

    fn render_full(&mut self) {
        let now = self.current_time();
        set_truncated(&mut self.state.last_rendered_time, &format_time(&now));
        let frame = Frame::compose(
            self.state,
            &self.runtime.clock,
            &self.state.last_rendered_time,
        );
        self.board.full_repaint(&frame);
    }

    fn render_partial(&mut self) {
        let previous = self.state.last_rendered_time.to_string();
        let now = self.current_time();
        set_truncated(&mut self.state.last_rendered_time, &format_time(&now));
        let frame = Frame::compose(
            self.state,
            &self.runtime.clock,
            &self.state.last_rendered_time,
        );
        self.board.partial_repaint(&frame, &previous);
    }

    fn read_static_properties(&mut self) -> StepResult<()> {
        let (width, height) = self.board.dimensions();
        set_truncated(
            &mut self.state.screen_dimensions,
            &format!("{width}x{height}"),
        );
        set_truncated(
            &mut self.state.mac_address,
            &format_mac(self.board.mac_address()),
        );
        Ok(())
    }

    fn connect_network(&mut self) -> StepResult<()> {
        let runtime = self.runtime;
        if !runtime.network.has_credentials() {
            return Err(StepError::ConfigurationMissing("no WiFi credentials provided"));
        }
        let timeout = Duration::from_secs(u64::from(runtime.clock.wifi_connect_timeout_secs));
        self.board.connect(&runtime.network, timeout)
    }

    fn disconnect_network(&mut self) -> StepResult<()> {
        if !self.board.is_connected() {
            return Err(StepError::NotApplicable("network not connected"));
        }
        self.board.disconnect()
    }

    fn set_rtc_clock(&mut self) -> StepResult<()> {
        let runtime = self.runtime;
        let epoch = self.board.time_source_epoch()?;

        let offset = match self.fetch_document::<TimezoneLookup>(&runtime.clock.timezone_lookup_url)
        {
            Ok(lookup) => {
                let offset = resolve_utc_offset(&lookup, epoch);
                info!("timezone `{}` with offset {offset}", lookup.timezone);
                offset
            }
            Err(err) => {
                warn!("failed to get timezone ({err}); using UTC");
                0
            }
        };

        self.board.set_epoch(epoch.saturating_add(i64::from(offset)))?;
        if let Ok(now) = self.board.now() {
            info!("RTC clock set to {}", format_date_time(&now));
        }
        Ok(())
    }

    fn lookup_public_address(&mut self) -> StepResult<IpLookup> {
        let runtime = self.runtime;
        let lookup: IpLookup = self.fetch_document(&runtime.clock.ip_lookup_url)?;
        if lookup.status != LOOKUP_SUCCESS {
            return Err(StepError::Lookup(format!("status `{}`", lookup.status)));
        }
        Ok(lookup)
    }

    fn log_battery_level(&mut self) {
        let now = self.current_time();
        let line = format!(
            "{},{:.2}",
            format_date_time(&now),
            self.board.battery_voltage()
        );
        debug!("battery level {line}");

        if let Err(err) = self.board.mount() {
            warn!("SD card not available: {err}");
            return;
        }

        let path = &self.runtime.clock.battery_log_path;
        if let Err(err) = self.board.append_line(path, &line, now) {
            warn!("error writing battery level to `{path}`: {err}");
        }
    }

    fn fetch_document<T: DeserializeOwned>(&mut self, url: &str) -> StepResult<T> {
        let document = self.board.fetch_json(url)?;
        Ok(serde_json::from_value(document)?)
    }

    fn current_time(&mut self) -> NaiveDateTime {
        self.board.now().unwrap_or_else(|err| {
            warn!("failed to read RTC: {err}");
            rtc_power_on_default()
        })
    }

    fn report_step(&mut self, label: &str, result: StepResult<()>) {
        let outcome = match result {
            Ok(()) => {
                info!("{label}: success");
                "Success"
            }
            Err(err) => {
                warn!("{label} failed: {err}");
                "Failed"
            }
        };
        self.board.boot_line(&format!("{label}... {outcome}"));
    }
}

pub fn format_mac(mac: [u8; 6]) -> String {
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        testing::{runtime_with_credentials, wall_clock, FakeBoard},
        types::WakeCause,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn booted_state() -> DeviceState {
        let mut state = DeviceState::new();
        state.booted = true;
        set_truncated(&mut state.last_rendered_time, "10:14");
        state
    }

    fn run(board: &mut FakeBoard, state: &mut DeviceState, runtime: &RuntimeConfig) -> CycleReport {
        Orchestrator::new(board, state, runtime).run_cycle()
    }

    #[test]
    fn cold_power_on_boots_then_redraws_fully() {
        let runtime = runtime_with_credentials();
        let mut board = FakeBoard::new(WakeCause::Undefined);
        let mut state = DeviceState::new();
        state.refresh_count = 5;

        let report = run(&mut board, &mut state, &runtime);

        assert!(report.booted_now);
        assert_eq!(report.reason, WakeReason::ColdStart);
        assert_eq!(report.kind, CycleKind::Full);
        assert!(state.booted);
        assert_eq!(state.refresh_count, 0);
        assert_eq!(
            board.boot_lines,
            vec![
                "Booting...",
                "Getting properties... Success",
                "Connecting to WiFi... Success",
                "Setting time... Success",
                "Disconnecting WiFi... Success",
            ]
        );
        assert_eq!(state.screen_dimensions.as_str(), "1200x825");
        assert_eq!(state.mac_address.as_str(), "24:0A:C4:00:11:22");
        assert_eq!(board.full_frames.len(), 1);
        assert!(board.partial_frames.is_empty());
    }

    #[test]
    fn boot_never_reruns_once_completed() {
        let runtime = runtime_with_credentials();
        let mut board = FakeBoard::new(WakeCause::Timer);
        let mut state = booted_state();

        let ran = Orchestrator::new(&mut board, &mut state, &runtime).boot();

        assert!(!ran);
        assert!(board.boot_lines.is_empty());
        assert_eq!(board.connects, 0);
        assert!(board.rtc_sets.is_empty());

        let report = run(&mut board, &mut state, &runtime);
        assert!(!report.booted_now);
        assert!(board.boot_lines.is_empty());
    }

    #[test]
    fn eighth_timer_wake_is_partial() {
        let runtime = runtime_with_credentials();
        let mut board = FakeBoard::new(WakeCause::Timer);
        let mut state = booted_state();
        state.refresh_count = 8;

        let report = run(&mut board, &mut state, &runtime);

        assert_eq!(report.kind, CycleKind::Partial);
        assert_eq!(state.refresh_count, 9);
        assert_eq!(board.connects, 0);
        assert!(board.fetched.is_empty());
        assert!(board.full_frames.is_empty());

        let (frame, previous) = &board.partial_frames[0];
        assert_eq!(previous, "10:14");
        assert_eq!(frame.time, "10:15");
        assert_eq!(state.last_rendered_time.as_str(), "10:15");
    }

    #[test]
    fn ninth_timer_wake_wraps_to_full() {
        let runtime = runtime_with_credentials();
        let mut board = FakeBoard::new(WakeCause::Timer);
        let mut state = booted_state();
        state.refresh_count = 9;

        let report = run(&mut board, &mut state, &runtime);

        assert_eq!(report.kind, CycleKind::Full);
        assert_eq!(state.refresh_count, 0);
        assert_eq!(board.full_frames.len(), 1);
        assert_eq!(board.connects, 1);
        assert_eq!(board.disconnects, 1);
    }

    #[test]
    fn button_press_forces_full_redraw() {
        let runtime = runtime_with_credentials();
        let mut board = FakeBoard::new(WakeCause::ExternalPin);
        let mut state = booted_state();
        state.refresh_count = 4;

        let report = run(&mut board, &mut state, &runtime);

        assert_eq!(report.reason, WakeReason::ButtonPress);
        assert_eq!(report.kind, CycleKind::Full);
        assert_eq!(state.refresh_count, 0);
    }

    #[test]
    fn full_cycle_refreshes_every_field() {
        let runtime = runtime_with_credentials();
        let mut board = FakeBoard::new(WakeCause::ExternalPin);
        let mut state = booted_state();

        run(&mut board, &mut state, &runtime);

        assert!(state.sd_card_available);
        assert_eq!(state.temperature_celsius, 21);
        assert_eq!(state.battery_voltage, 3.92);
        assert!(state.network_connected);
        assert_eq!(state.local_ip_address.as_str(), "192.168.1.40");
        assert_eq!(state.public_ip_address.as_str(), "203.0.113.9");
        assert_eq!(state.location.as_str(), "Leeds, United Kingdom");
        assert!(!board.connected);

        let frame = &board.full_frames[0];
        assert_eq!(frame.value_of("Battery"), Some("3.92V"));
        assert_eq!(frame.time, "10:15");
    }

    #[test]
    fn partial_cycle_draws_cached_values() {
        let runtime = runtime_with_credentials();
        let mut board = FakeBoard::new(WakeCause::ExternalPin);
        let mut state = booted_state();
        run(&mut board, &mut state, &runtime);

        board.cause = WakeCause::Timer;
        board.battery = 3.41;
        board.temperature = 30;
        run(&mut board, &mut state, &runtime);

        let (frame, _) = &board.partial_frames[0];
        assert_eq!(frame.value_of("Battery"), Some("3.92V"));
        assert_eq!(frame.value_of("Temperature"), Some("21C"));
        assert_eq!(board.connects, 1);
    }

    #[test]
    fn failed_lookup_clears_public_fields_only() {
        let runtime = runtime_with_credentials();
        let mut board = FakeBoard::new(WakeCause::ExternalPin);
        board.documents.remove(&runtime.clock.ip_lookup_url);
        let mut state = booted_state();
        set_truncated(&mut state.public_ip_address, "198.51.100.1");
        set_truncated(&mut state.location, "Stale, Nowhere");

        run(&mut board, &mut state, &runtime);

        assert!(state.network_connected);
        assert_eq!(state.local_ip_address.as_str(), "192.168.1.40");
        assert!(state.public_ip_address.is_empty());
        assert!(state.location.is_empty());
        assert_eq!(board.fetched, vec![runtime.clock.ip_lookup_url.clone()]);
    }

    #[test]
    fn rejected_lookup_status_clears_public_fields() {
        let runtime = runtime_with_credentials();
        let mut board = FakeBoard::new(WakeCause::ExternalPin);
        board.documents.insert(
            runtime.clock.ip_lookup_url.clone(),
            json!({ "status": "fail", "query": "203.0.113.9" }),
        );
        let mut state = booted_state();
        set_truncated(&mut state.public_ip_address, "198.51.100.1");

        run(&mut board, &mut state, &runtime);

        assert!(state.public_ip_address.is_empty());
        assert!(state.location.is_empty());
        assert_eq!(state.local_ip_address.as_str(), "192.168.1.40");
    }

    #[test]
    fn offline_refresh_clears_addresses() {
        let runtime = runtime_with_credentials();
        let mut board = FakeBoard::new(WakeCause::ExternalPin);
        board.wifi_available = false;
        let mut state = booted_state();
        set_truncated(&mut state.local_ip_address, "192.168.1.40");
        set_truncated(&mut state.public_ip_address, "203.0.113.9");

        run(&mut board, &mut state, &runtime);

        assert!(!state.network_connected);
        assert!(state.local_ip_address.is_empty());
        assert!(state.public_ip_address.is_empty());
        assert_eq!(board.disconnects, 0);
        assert_eq!(board.full_frames[0].value_of("Network connected"), Some("No"));
    }

    #[test]
    fn unreachable_time_source_leaves_rtc_untouched() {
        let runtime = runtime_with_credentials();
        let mut board = FakeBoard::new(WakeCause::Undefined);
        board.time_source = None;
        let mut state = DeviceState::new();

        let report = run(&mut board, &mut state, &runtime);

        assert!(state.booted);
        assert!(board.rtc_sets.is_empty());
        assert!(board
            .boot_lines
            .contains(&"Setting time... Failed".to_string()));
        assert_eq!(report.kind, CycleKind::Full);
    }

    #[test]
    fn clock_is_set_to_local_time() {
        let runtime = runtime_with_credentials();
        let mut board = FakeBoard::new(WakeCause::Undefined);
        let mut state = DeviceState::new();

        run(&mut board, &mut state, &runtime);

        assert_eq!(board.rtc_sets, vec![1_772_841_600 + 3_600]);
        assert_eq!(state.last_rendered_time.as_str(), "01:00");
    }

    #[test]
    fn timezone_failure_falls_back_to_utc() {
        let runtime = runtime_with_credentials();
        let mut board = FakeBoard::new(WakeCause::Undefined);
        board.documents.remove(&runtime.clock.timezone_lookup_url);
        let mut state = DeviceState::new();

        run(&mut board, &mut state, &runtime);

        assert_eq!(board.rtc_sets, vec![1_772_841_600]);
        assert!(board
            .boot_lines
            .contains(&"Setting time... Success".to_string()));
    }

    #[test]
    fn missing_credentials_are_reported_not_fatal() {
        let runtime = RuntimeConfig::default();
        let mut board = FakeBoard::new(WakeCause::Undefined);
        let mut state = DeviceState::new();

        let report = run(&mut board, &mut state, &runtime);

        assert!(state.booted);
        assert_eq!(board.connects, 0);
        assert_eq!(
            board.boot_lines[1..],
            [
                "Getting properties... Success".to_string(),
                "Connecting to WiFi... Failed".to_string(),
                "Setting time... Failed".to_string(),
                "Disconnecting WiFi... Failed".to_string(),
            ]
        );
        assert!(!state.network_connected);
        assert_eq!(report.kind, CycleKind::Full);
        assert_eq!(board.full_frames.len(), 1);
    }

    #[test]
    fn sleep_realigns_to_the_next_minute() {
        let runtime = runtime_with_credentials();
        let mut board = FakeBoard::new(WakeCause::Timer);
        let mut state = booted_state();

        let report = run(&mut board, &mut state, &runtime);

        assert_eq!(report.sleep.seconds, 18);
        assert_eq!(report.sleep.wake_button_gpio, 36);

        board.rtc = Some(wall_clock(10, 16, 0));
        let report = run(&mut board, &mut state, &runtime);
        assert_eq!(report.sleep.seconds, 60);
    }

    #[test]
    fn battery_level_is_logged_on_full_cycles() {
        let mut runtime = runtime_with_credentials();
        runtime.clock.battery_log_enabled = true;
        let mut board = FakeBoard::new(WakeCause::ExternalPin);
        let mut state = booted_state();

        run(&mut board, &mut state, &runtime);

        assert_eq!(
            board.appended,
            vec![(
                "/battery.csv".to_string(),
                "2026-03-07 10:15:42,3.92".to_string(),
                wall_clock(10, 15, 42),
            )]
        );

        board.cause = WakeCause::Timer;
        run(&mut board, &mut state, &runtime);
        assert_eq!(board.appended.len(), 1);
    }

    #[test]
    fn battery_log_skips_missing_card() {
        let mut runtime = runtime_with_credentials();
        runtime.clock.battery_log_enabled = true;
        let mut board = FakeBoard::new(WakeCause::ExternalPin);
        board.mount_ok = false;
        let mut state = booted_state();

        let report = run(&mut board, &mut state, &runtime);

        assert!(board.appended.is_empty());
        assert_eq!(report.kind, CycleKind::Full);
        assert_eq!(board.full_frames.len(), 1);
    }

    #[test]
    fn battery_log_disabled_by_default() {
        let runtime = runtime_with_credentials();
        let mut board = FakeBoard::new(WakeCause::ExternalPin);
        let mut state = booted_state();

        run(&mut board, &mut state, &runtime);

        assert!(board.appended.is_empty());
    }

    #[test]
    fn formats_mac_in_upper_hex() {
        assert_eq!(
            format_mac([0x24, 0x0a, 0xc4, 0x00, 0x11, 0x22]),
            "24:0A:C4:00:11:22"
        );
    }
}
