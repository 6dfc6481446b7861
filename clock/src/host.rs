use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    io::Write as _,
    net::Ipv4Addr,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use inkclock_common::{
    config::NetworkConfig, DeviceState, Frame, Network, Orchestrator, Panel, Rtc, RuntimeConfig,
    Sensors, SleepPlan, StepError, StepResult, Storage, WakeCause, WakeSource,
};

const DEFAULT_STATE_PATH: &str = "inkclock-state.json";
const PANEL_WIDTH: u32 = 1200;
const PANEL_HEIGHT: u32 = 825;

/// What survives a simulated deep sleep: the device state plus the RTC, which
/// keeps running on its own battery.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RetainedMemory {
    device: DeviceState,
    #[serde(default)]
    rtc_offset_secs: i64,
}

enum Wakeup {
    Timer,
    Button,
    Shutdown,
}

struct HostBoard {
    cause: WakeCause,
    connected: bool,
    fixtures: HashMap<String, serde_json::Value>,
    rtc_offset: TimeDelta,
    sd_root: Option<PathBuf>,
    wakes: u32,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let runtime = load_runtime_config()?;
    let state_path = std::env::var("INKCLOCK_STATE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_STATE_PATH));
    let mut memory = load_retained(&state_path);

    let fixtures = match std::env::var("INKCLOCK_LOOKUP_FIXTURE") {
        Ok(path) => load_fixtures(Path::new(&path))?,
        Err(_) => HashMap::new(),
    };

    let mut board = HostBoard {
        cause: initial_wake_cause(),
        connected: false,
        fixtures,
        rtc_offset: TimeDelta::seconds(memory.rtc_offset_secs),
        sd_root: std::env::var("INKCLOCK_SD_ROOT").ok().map(PathBuf::from),
        wakes: 0,
    };

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    info!("clock simulator started; press enter to simulate the wake button");

    loop {
        let sleep = run_and_commit(&mut board, &mut memory, &runtime, &state_path)?;

        let wakeup = tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(u64::from(sleep.seconds))) => Wakeup::Timer,
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(_)) => Wakeup::Button,
                _ => {
                    stdin_open = false;
                    Wakeup::Timer
                }
            },
            _ = tokio::signal::ctrl_c() => Wakeup::Shutdown,
        };

        board.cause = match wakeup {
            Wakeup::Timer => WakeCause::Timer,
            Wakeup::Button => WakeCause::ExternalPin,
            Wakeup::Shutdown => {
                info!("shutting down; state kept in {}", state_path.display());
                return Ok(());
            }
        };
        board.wakes = board.wakes.saturating_add(1);
        debug!("simulated wake after {sleep:?}");
    }
}

/// One simulated wake. State is on disk before the caller starts waiting, as
/// it is in RTC memory before the device powers down.
fn run_and_commit(
    board: &mut HostBoard,
    memory: &mut RetainedMemory,
    runtime: &RuntimeConfig,
    state_path: &Path,
) -> anyhow::Result<SleepPlan> {
    let report = Orchestrator::new(board, &mut memory.device, runtime).run_cycle();
    info!(
        "cycle complete: reason={} kind={}",
        report.reason.as_str(),
        report.kind.as_str()
    );

    memory.rtc_offset_secs = board.rtc_offset.num_seconds();
    save_retained(state_path, memory)
        .with_context(|| format!("failed to persist state to {}", state_path.display()))?;
    Ok(report.sleep)
}

fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let mut runtime = match std::env::var("INKCLOCK_CONFIG") {
        Ok(path) => {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read config from {path}"))?;
            serde_json::from_str::<RuntimeConfig>(&raw)
                .with_context(|| format!("failed to parse config from {path}"))?
        }
        Err(_) => RuntimeConfig::default(),
    };

    if let Ok(ssid) = std::env::var("WIFI_SSID") {
        runtime.network.wifi_ssid = ssid;
    }
    if let Ok(pass) = std::env::var("WIFI_PASS") {
        runtime.network.wifi_pass = pass;
    }

    runtime.sanitize();
    Ok(runtime)
}

fn load_fixtures(path: &Path) -> anyhow::Result<HashMap<String, serde_json::Value>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read lookup fixture {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("lookup fixture {} is not a url map", path.display()))
}

fn load_retained(path: &Path) -> RetainedMemory {
    match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!("discarding unreadable state {}: {err}", path.display());
            RetainedMemory::default()
        }),
        Err(_) => {
            info!("no retained state at {}; cold power-on", path.display());
            RetainedMemory::default()
        }
    }
}

fn save_retained(path: &Path, memory: &RetainedMemory) -> anyhow::Result<()> {
    let payload = serde_json::to_string_pretty(memory)?;
    fs::write(path, payload)?;
    Ok(())
}

fn initial_wake_cause() -> WakeCause {
    match std::env::var("INKCLOCK_WAKE").as_deref() {
        Ok("timer") => WakeCause::Timer,
        Ok("button") => WakeCause::ExternalPin,
        _ => WakeCause::Undefined,
    }
}

impl WakeSource for HostBoard {
    fn wake_cause(&self) -> WakeCause {
        self.cause
    }
}

impl Sensors for HostBoard {
    fn battery_voltage(&mut self) -> f32 {
        (4.15 - self.wakes as f32 * 0.001).max(3.3)
    }

    fn temperature_celsius(&mut self) -> i8 {
        21 + (self.wakes % 3) as i8
    }

    fn sd_card_available(&mut self) -> bool {
        self.sd_root.as_deref().is_some_and(Path::is_dir)
    }

    fn mac_address(&self) -> [u8; 6] {
        [0x02, 0x00, 0x00, 0xc1, 0x0c, 0x4b]
    }
}

impl Network for HostBoard {
    fn connect(&mut self, credentials: &NetworkConfig, timeout: Duration) -> StepResult<()> {
        debug!("joining `{}` (timeout {timeout:?})", credentials.wifi_ssid);
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> StepResult<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn local_address(&self) -> Option<Ipv4Addr> {
        self.connected.then_some(Ipv4Addr::LOCALHOST)
    }

    fn fetch_json(&mut self, url: &str) -> StepResult<serde_json::Value> {
        if !self.connected {
            return Err(StepError::TransientIo("not connected".to_string()));
        }
        self.fixtures
            .get(url)
            .cloned()
            .ok_or_else(|| StepError::TransientIo(format!("HTTP GET {url} failed with status 404")))
    }

    fn time_source_epoch(&mut self) -> StepResult<i64> {
        if !self.connected {
            return Err(StepError::TransientIo("not connected".to_string()));
        }
        Ok(Utc::now().timestamp())
    }
}

impl Rtc for HostBoard {
    fn set_epoch(&mut self, epoch: i64) -> StepResult<()> {
        let target = DateTime::from_timestamp(epoch, 0)
            .ok_or_else(|| StepError::TransientIo(format!("epoch {epoch} out of range")))?;
        self.rtc_offset = target - Utc::now();
        Ok(())
    }

    fn now(&mut self) -> StepResult<NaiveDateTime> {
        Ok((Utc::now() + self.rtc_offset).naive_utc())
    }
}

impl Panel for HostBoard {
    fn dimensions(&self) -> (u32, u32) {
        (PANEL_WIDTH, PANEL_HEIGHT)
    }

    fn boot_line(&mut self, line: &str) {
        info!("[panel] {line}");
    }

    fn full_repaint(&mut self, frame: &Frame) {
        info!("[panel] full refresh, time {}", frame.time);
        for field in &frame.fields {
            info!("[panel]   {}: {}", field.label, field.value);
        }
    }

    fn partial_repaint(&mut self, frame: &Frame, previous_time: &str) {
        info!("[panel] partial refresh, {previous_time} -> {}", frame.time);
    }
}

impl Storage for HostBoard {
    fn mount(&mut self) -> StepResult<()> {
        let root = self
            .sd_root
            .as_deref()
            .ok_or(StepError::ConfigurationMissing("INKCLOCK_SD_ROOT not set"))?;
        fs::create_dir_all(root).map_err(StepError::io)
    }

    fn append_line(&mut self, path: &str, line: &str, modified: NaiveDateTime) -> StepResult<()> {
        let root = self
            .sd_root
            .as_deref()
            .ok_or(StepError::ConfigurationMissing("INKCLOCK_SD_ROOT not set"))?;
        let target = root.join(path.trim_start_matches('/'));

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)
            .map_err(StepError::io)?;
        writeln!(file, "{line}").map_err(StepError::io)?;

        let stamp: SystemTime = modified.and_utc().into();
        file.set_modified(stamp).map_err(StepError::io)
    }
}
