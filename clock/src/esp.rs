use core::convert::TryInto;
use std::{
    fs::OpenOptions,
    io::Write as _,
    net::Ipv4Addr,
    thread,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime};
use embedded_svc::{
    http::{client::Client as HttpClient, Method, Status},
    io::Read,
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::FreeRtos,
    gpio::{AnyIOPin, IOPin},
    i2c::{I2cConfig, I2cDriver},
    prelude::*,
    sd::{spi::SdSpiHostDriver, SdCardConfiguration, SdCardDriver},
    spi::{config::DriverConfig, Dma, SpiDriver, SPI3},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    fs::fatfs::Fatfs,
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    io::vfs::MountedFatfs,
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    sntp::{EspSntp, SyncStatus},
    sys,
    wifi::{BlockingWifi, EspWifi},
};
use log::{debug, info, warn};

use inkclock_common::{
    config::NetworkConfig, DeepSleep, DeviceState, Frame, Network, Orchestrator, Panel, Rtc,
    RuntimeConfig, Sensors, SleepPlan, StepError, StepResult, Storage, WakeCause, WakeSource,
};

use crate::{
    pcal6416a::{Pcal6416a, BATTERY_ENABLE_PIN},
    pcf85063::Pcf85063,
    tps65186,
};

const NVS_NAMESPACE: &str = "inkclock";
const NVS_RUNTIME_KEY: &str = "runtime_json";

const PANEL_WIDTH: u32 = 1200;
const PANEL_HEIGHT: u32 = 825;

const SD_MOUNT_POINT: &str = "/sdcard";
const SD_MAX_OPEN_FILES: usize = 4;

const MAX_HTTP_BODY: usize = 2048;
const HTTP_TIMEOUT_SEC: u64 = 10;
const SNTP_SYNC_TIMEOUT_SEC: u64 = 10;
const WIFI_RETRY_DELAY_MS: u64 = 500;

const BATTERY_ADC_CHANNEL: sys::adc_channel_t = sys::adc_channel_t_ADC_CHANNEL_7; // GPIO35
const BATTERY_DIVIDER: f32 = 2.0;
const BATTERY_SETTLE_MS: u32 = 5;

/// Survives deep sleep in RTC slow memory; zeroed again on power-on.
#[link_section = ".rtc.data"]
static mut RTC_STATE: DeviceState = DeviceState::new();

type SdCard = MountedFatfs<Fatfs<SdCardDriver<SdSpiHostDriver<'static, SpiDriver<'static>>>>>;

struct SdPins {
    spi: SPI3,
    sclk: AnyIOPin,
    mosi: AnyIOPin,
    miso: AnyIOPin,
    cs: AnyIOPin,
}

enum SdSlot {
    Unmounted(SdPins),
    Mounted(SdCard),
    Failed,
}

struct NvsStore {
    partition: EspDefaultNvsPartition,
}

struct EspBoard {
    wifi: BlockingWifi<EspWifi<'static>>,
    sntp: Option<EspSntp<'static>>,
    i2c: I2cDriver<'static>,
    adc: Option<sys::adc_oneshot_unit_handle_t>,
    sd: SdSlot,
    cause: WakeCause,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    // Read before any driver init can disturb the sleep registers.
    let cause = read_wake_cause();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
    };

    let mut runtime = nvs_store.load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    ensure_wifi_defaults(&mut runtime);
    runtime.sanitize();

    let Peripherals {
        modem,
        pins,
        i2c0,
        spi3,
        ..
    } = Peripherals::take()?;

    let wifi = BlockingWifi::wrap(
        EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?,
        sys_loop,
    )?;

    let i2c = I2cDriver::new(
        i2c0,
        pins.gpio21,
        pins.gpio22,
        &I2cConfig::new().baudrate(100.kHz().into()),
    )
    .context("failed to initialize I2C bus")?;

    let mut board = EspBoard {
        wifi,
        sntp: None,
        i2c,
        adc: init_battery_adc(),
        sd: SdSlot::Unmounted(SdPins {
            spi: spi3,
            sclk: pins.gpio14.downgrade(),
            mosi: pins.gpio13.downgrade(),
            miso: pins.gpio12.downgrade(),
            cs: pins.gpio15.downgrade(),
        }),
        cause,
    };

    // SAFETY: the only task touching retained memory, and exactly once per wake.
    let state = unsafe { &mut *core::ptr::addr_of_mut!(RTC_STATE) };
    let report = Orchestrator::new(&mut board, state, &runtime).run_cycle();
    info!(
        "cycle complete: reason={} kind={}",
        report.reason.as_str(),
        report.kind.as_str()
    );

    board.deep_sleep(report.sleep)
}

fn ensure_wifi_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        runtime.network.wifi_ssid = option_env!("WIFI_SSID").unwrap_or("CHANGE_ME").to_string();
    }

    if runtime.network.wifi_pass.is_empty() {
        runtime.network.wifi_pass = option_env!("WIFI_PASS").unwrap_or_default().to_string();
    }
}

fn read_wake_cause() -> WakeCause {
    let cause = unsafe { sys::esp_sleep_get_wakeup_cause() };
    match cause {
        sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER => WakeCause::Timer,
        sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT0
        | sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT1 => WakeCause::ExternalPin,
        _ => WakeCause::Undefined,
    }
}

fn init_battery_adc() -> Option<sys::adc_oneshot_unit_handle_t> {
    unsafe {
        let mut handle: sys::adc_oneshot_unit_handle_t = core::ptr::null_mut();
        let unit_cfg = sys::adc_oneshot_unit_init_cfg_t {
            unit_id: sys::adc_unit_t_ADC_UNIT_1,
            ulp_mode: sys::adc_ulp_mode_t_ADC_ULP_MODE_DISABLE,
            ..core::mem::zeroed()
        };
        let rc = sys::adc_oneshot_new_unit(&unit_cfg, &mut handle);
        if rc != sys::ESP_OK {
            warn!("battery ADC unit init failed with code {rc}");
            return None;
        }

        let chan_cfg = sys::adc_oneshot_chan_cfg_t {
            atten: sys::adc_atten_t_ADC_ATTEN_DB_11,
            bitwidth: sys::adc_bitwidth_t_ADC_BITWIDTH_12,
        };
        let rc = sys::adc_oneshot_config_channel(handle, BATTERY_ADC_CHANNEL, &chan_cfg);
        if rc != sys::ESP_OK {
            warn!("battery ADC channel config failed with code {rc}");
            return None;
        }
        Some(handle)
    }
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 2048];

        match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
            None => Ok(RuntimeConfig::default()),
        }
    }
}

impl EspBoard {
    fn sd_card(&mut self) -> StepResult<&SdCard> {
        if matches!(self.sd, SdSlot::Unmounted(_)) {
            if let SdSlot::Unmounted(pins) = core::mem::replace(&mut self.sd, SdSlot::Failed) {
                match mount_sd_card(pins) {
                    Ok(card) => {
                        info!("SD card mounted at {SD_MOUNT_POINT}");
                        self.sd = SdSlot::Mounted(card);
                    }
                    Err(err) => warn!("SD card init failed: {err:#}"),
                }
            }
        }

        match &self.sd {
            SdSlot::Mounted(card) => Ok(card),
            _ => Err(StepError::TransientIo("SD card not available".to_string())),
        }
    }
}

fn mount_sd_card(pins: SdPins) -> anyhow::Result<SdCard> {
    let spi = SpiDriver::new(
        pins.spi,
        pins.sclk,
        pins.mosi,
        Some(pins.miso),
        &DriverConfig::default().dma(Dma::Auto(4096)),
    )?;
    let host = SdSpiHostDriver::new(
        spi,
        Some(pins.cs),
        AnyIOPin::none(),
        AnyIOPin::none(),
        AnyIOPin::none(),
        None,
    )?;
    let card = SdCardDriver::new_spi(host, &SdCardConfiguration::new())?;
    Ok(MountedFatfs::mount(
        Fatfs::new_sdcard(0, card)?,
        SD_MOUNT_POINT,
        SD_MAX_OPEN_FILES,
    )?)
}

impl WakeSource for EspBoard {
    fn wake_cause(&self) -> WakeCause {
        self.cause
    }
}

impl Sensors for EspBoard {
    fn battery_voltage(&mut self) -> f32 {
        let Some(handle) = self.adc else {
            return 0.0;
        };

        let mut expander = Pcal6416a::new(&mut self.i2c);
        if let Err(err) = expander.set_output(BATTERY_ENABLE_PIN, true) {
            warn!("failed to enable battery divider: {err:?}");
            return 0.0;
        }
        FreeRtos::delay_ms(BATTERY_SETTLE_MS);

        let mut raw: i32 = 0;
        let rc = unsafe { sys::adc_oneshot_read(handle, BATTERY_ADC_CHANNEL, &mut raw) };
        if let Err(err) = expander.set_output(BATTERY_ENABLE_PIN, false) {
            warn!("failed to disable battery divider: {err:?}");
        }
        if rc != sys::ESP_OK {
            warn!("battery ADC read failed with code {rc}");
            return 0.0;
        }
        (raw as f32 / 4095.0) * 3.3 * BATTERY_DIVIDER
    }

    fn temperature_celsius(&mut self) -> i8 {
        tps65186::read_temperature(&mut self.i2c, &mut FreeRtos).unwrap_or_else(|err| {
            warn!("panel PMIC temperature read failed: {err:?}");
            0
        })
    }

    fn sd_card_available(&mut self) -> bool {
        self.sd_card().is_ok()
    }

    fn mac_address(&self) -> [u8; 6] {
        let mut mac = [0_u8; 6];
        let rc = unsafe { sys::esp_read_mac(mac.as_mut_ptr(), sys::esp_mac_type_t_ESP_MAC_WIFI_STA) };
        if rc != sys::ESP_OK {
            warn!("esp_read_mac failed with code {rc}");
        }
        mac
    }
}

impl Network for EspBoard {
    fn connect(&mut self, credentials: &NetworkConfig, timeout: Duration) -> StepResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        let auth_method = if credentials.wifi_pass.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: credentials
                    .wifi_ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| StepError::ConfigurationMissing("wifi ssid too long"))?,
                password: credentials
                    .wifi_pass
                    .as_str()
                    .try_into()
                    .map_err(|_| StepError::ConfigurationMissing("wifi password too long"))?,
                auth_method,
                ..Default::default()
            }))
            .map_err(StepError::io)?;

        self.wifi.start().map_err(StepError::io)?;
        info!("wifi started, connecting to `{}`", credentials.wifi_ssid);

        let deadline = Instant::now() + timeout;
        let mut attempt = 0_u32;
        loop {
            attempt += 1;
            let result = self
                .wifi
                .connect()
                .and_then(|()| self.wifi.wait_netif_up());
            match result {
                Ok(()) => {
                    info!("wifi connected on attempt {attempt}");
                    return Ok(());
                }
                Err(err) if Instant::now() < deadline => {
                    debug!("wifi connect attempt {attempt} failed: {err:#}");
                    let _ = self.wifi.disconnect();
                    thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
                }
                Err(err) => {
                    let _ = self.wifi.stop();
                    return Err(StepError::TransientIo(format!(
                        "wifi connect timed out after {attempt} attempts: {err:#}"
                    )));
                }
            }
        }
    }

    fn disconnect(&mut self) -> StepResult<()> {
        self.sntp = None;
        self.wifi.disconnect().map_err(StepError::io)?;
        self.wifi.stop().map_err(StepError::io)?;
        info!("wifi disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    fn local_address(&self) -> Option<Ipv4Addr> {
        self.wifi
            .wifi()
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip)
    }

    fn fetch_json(&mut self, url: &str) -> StepResult<serde_json::Value> {
        let http_conf = HttpClientConfiguration {
            timeout: Some(Duration::from_secs(HTTP_TIMEOUT_SEC)),
            ..Default::default()
        };
        let connection = EspHttpConnection::new(&http_conf).map_err(StepError::io)?;
        let mut client = HttpClient::wrap(connection);
        let request = client
            .request(Method::Get, url, &[])
            .map_err(|err| StepError::TransientIo(format!("{err:?}")))?;
        let mut response = request
            .submit()
            .map_err(|err| StepError::TransientIo(format!("{err:?}")))?;

        let status = response.status();
        if status != 200 {
            return Err(StepError::TransientIo(format!(
                "HTTP GET failed with status {status}"
            )));
        }

        let mut body = Vec::new();
        let mut chunk = [0_u8; 256];
        loop {
            let read = response
                .read(&mut chunk)
                .map_err(|err| StepError::TransientIo(format!("{err:?}")))?;
            if read == 0 {
                break;
            }
            if body.len() + read > MAX_HTTP_BODY {
                return Err(StepError::TransientIo(format!(
                    "response from {url} exceeds {MAX_HTTP_BODY} bytes"
                )));
            }
            body.extend_from_slice(&chunk[..read]);
        }
        debug!("GET {url} -> {} bytes", body.len());

        Ok(serde_json::from_slice(&body)?)
    }

    fn time_source_epoch(&mut self) -> StepResult<i64> {
        if !self.is_connected() {
            return Err(StepError::NotApplicable("network not connected"));
        }

        let sntp = match self.sntp.take() {
            Some(sntp) => sntp,
            None => EspSntp::new_default().map_err(StepError::io)?,
        };
        let deadline = Instant::now() + Duration::from_secs(SNTP_SYNC_TIMEOUT_SEC);
        while sntp.get_sync_status() != SyncStatus::Completed {
            if Instant::now() >= deadline {
                return Err(StepError::TransientIo("SNTP sync timed out".to_string()));
            }
            thread::sleep(Duration::from_millis(100));
        }
        self.sntp = Some(sntp);

        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(StepError::io)?;
        Ok(since_epoch.as_secs() as i64)
    }
}

impl Rtc for EspBoard {
    fn set_epoch(&mut self, epoch: i64) -> StepResult<()> {
        let local = DateTime::from_timestamp(epoch, 0)
            .ok_or_else(|| StepError::TransientIo(format!("epoch {epoch} out of range")))?
            .naive_utc();
        Pcf85063::new(&mut self.i2c)
            .write(&local)
            .map_err(|err| StepError::TransientIo(format!("RTC write failed: {err:?}")))
    }

    fn now(&mut self) -> StepResult<NaiveDateTime> {
        let (now, stopped) = Pcf85063::new(&mut self.i2c)
            .read()
            .map_err(|err| StepError::TransientIo(format!("RTC read failed: {err:?}")))?;
        if stopped {
            warn!("RTC oscillator stopped since it was last set");
        }
        Ok(now)
    }
}

// TODO: drive the Inkplate parallel e-paper bus; frames are only logged for now.
impl Panel for EspBoard {
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

impl Storage for EspBoard {
    fn mount(&mut self) -> StepResult<()> {
        self.sd_card().map(|_| ())
    }

    fn append_line(&mut self, path: &str, line: &str, modified: NaiveDateTime) -> StepResult<()> {
        self.sd_card()?;
        let target = format!("{SD_MOUNT_POINT}/{}", path.trim_start_matches('/'));

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)
            .map_err(StepError::io)?;
        writeln!(file, "{line}").map_err(StepError::io)?;

        // FAT keeps local time, which is what the RTC holds.
        let stamp: SystemTime = modified.and_utc().into();
        if let Err(err) = file.set_modified(stamp) {
            warn!("failed to stamp {path}: {err}");
        }
        Ok(())
    }
}

impl DeepSleep for EspBoard {
    #[allow(unreachable_code)]
    fn deep_sleep(&mut self, plan: SleepPlan) -> ! {
        info!(
            "entering deep sleep for {}s, button on GPIO{}",
            plan.seconds, plan.wake_button_gpio
        );
        unsafe {
            sys::esp_sleep_enable_timer_wakeup(plan.micros());
            sys::esp_sleep_enable_ext0_wakeup(plan.wake_button_gpio, 0);
            sys::esp_deep_sleep_start();
        }
        loop {
            FreeRtos::delay_ms(1_000);
        }
    }
}
