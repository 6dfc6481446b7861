//! Scripted board used by the orchestrator tests.

use std::{collections::HashMap, net::Ipv4Addr, time::Duration};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::json;

use crate::{
    clock::rtc_power_on_default,
    config::{NetworkConfig, RuntimeConfig, DEFAULT_IP_LOOKUP_URL, DEFAULT_TIMEZONE_LOOKUP_URL},
    error::{StepError, StepResult},
    frame::Frame,
    platform::{Network, Panel, Rtc, Sensors, Storage, WakeSource},
    types::WakeCause,
};

pub fn wall_clock(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 7)
        .unwrap()
        .and_hms_opt(hour, minute, second)
        .unwrap()
}

pub fn runtime_with_credentials() -> RuntimeConfig {
    RuntimeConfig {
        network: NetworkConfig {
            wifi_ssid: "workshop".to_string(),
            wifi_pass: "hunter22".to_string(),
        },
        ..RuntimeConfig::default()
    }
}

pub struct FakeBoard {
    pub cause: WakeCause,

    pub wifi_available: bool,
    pub connected: bool,
    pub local_ip: Option<Ipv4Addr>,
    pub time_source: Option<i64>,
    pub documents: HashMap<String, serde_json::Value>,
    pub connects: u32,
    pub disconnects: u32,
    pub fetched: Vec<String>,

    pub rtc: Option<NaiveDateTime>,
    pub rtc_sets: Vec<i64>,

    pub battery: f32,
    pub temperature: i8,
    pub sd_card: bool,
    pub mac: [u8; 6],

    pub boot_lines: Vec<String>,
    pub full_frames: Vec<Frame>,
    pub partial_frames: Vec<(Frame, String)>,

    pub mount_ok: bool,
    pub appended: Vec<(String, String, NaiveDateTime)>,
}

impl FakeBoard {
    pub fn new(cause: WakeCause) -> Self {
        let mut documents = HashMap::new();
        documents.insert(
            DEFAULT_IP_LOOKUP_URL.to_string(),
            json!({
                "status": "success",
                "query": "203.0.113.9",
                "city": "Leeds",
                "country": "United Kingdom",
            }),
        );
        documents.insert(
            DEFAULT_TIMEZONE_LOOKUP_URL.to_string(),
            json!({
                "status": "success",
                "timezone": "Invalid/Zone",
                "offset": 3_600,
            }),
        );

        Self {
            cause,
            wifi_available: true,
            connected: false,
            local_ip: Some(Ipv4Addr::new(192, 168, 1, 40)),
            time_source: Some(1_772_841_600),
            documents,
            connects: 0,
            disconnects: 0,
            fetched: Vec::new(),
            rtc: Some(wall_clock(10, 15, 42)),
            rtc_sets: Vec::new(),
            battery: 3.92,
            temperature: 21,
            sd_card: true,
            mac: [0x24, 0x0a, 0xc4, 0x00, 0x11, 0x22],
            boot_lines: Vec::new(),
            full_frames: Vec::new(),
            partial_frames: Vec::new(),
            mount_ok: true,
            appended: Vec::new(),
        }
    }
}

impl WakeSource for FakeBoard {
    fn wake_cause(&self) -> WakeCause {
        self.cause
    }
}

impl Sensors for FakeBoard {
    fn battery_voltage(&mut self) -> f32 {
        self.battery
    }

    fn temperature_celsius(&mut self) -> i8 {
        self.temperature
    }

    fn sd_card_available(&mut self) -> bool {
        self.sd_card
    }

    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }
}

impl Network for FakeBoard {
    fn connect(&mut self, _credentials: &NetworkConfig, _timeout: Duration) -> StepResult<()> {
        self.connects += 1;
        if self.wifi_available {
            self.connected = true;
            Ok(())
        } else {
            Err(StepError::TransientIo("association timed out".to_string()))
        }
    }

    fn disconnect(&mut self) -> StepResult<()> {
        self.disconnects += 1;
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn local_address(&self) -> Option<Ipv4Addr> {
        self.local_ip
    }

    fn fetch_json(&mut self, url: &str) -> StepResult<serde_json::Value> {
        self.fetched.push(url.to_string());
        if !self.connected {
            return Err(StepError::TransientIo("network down".to_string()));
        }
        self.documents
            .get(url)
            .cloned()
            .ok_or_else(|| StepError::TransientIo("HTTP GET failed with status 503".to_string()))
    }

    fn time_source_epoch(&mut self) -> StepResult<i64> {
        if !self.connected {
            return Err(StepError::TransientIo("network down".to_string()));
        }
        self.time_source
            .ok_or_else(|| StepError::TransientIo("time source unreachable".to_string()))
    }
}

impl Rtc for FakeBoard {
    fn set_epoch(&mut self, epoch: i64) -> StepResult<()> {
        self.rtc_sets.push(epoch);
        self.rtc = DateTime::from_timestamp(epoch, 0).map(|utc| utc.naive_utc());
        Ok(())
    }

    fn now(&mut self) -> StepResult<NaiveDateTime> {
        Ok(self.rtc.unwrap_or_else(rtc_power_on_default))
    }
}

impl Panel for FakeBoard {
    fn dimensions(&self) -> (u32, u32) {
        (1200, 825)
    }

    fn boot_line(&mut self, line: &str) {
        self.boot_lines.push(line.to_string());
    }

    fn full_repaint(&mut self, frame: &Frame) {
        self.full_frames.push(frame.clone());
    }

    fn partial_repaint(&mut self, frame: &Frame, previous_time: &str) {
        self.partial_frames
            .push((frame.clone(), previous_time.to_string()));
    }
}

impl Storage for FakeBoard {
    fn mount(&mut self) -> StepResult<()> {
        if self.mount_ok {
            Ok(())
        } else {
            Err(StepError::TransientIo("SD card init failed".to_string()))
        }
    }

    fn append_line(&mut self, path: &str, line: &str, modified: NaiveDateTime) -> StepResult<()> {
        self.appended
            .push((path.to_string(), line.to_string(), modified));
        Ok(())
    }
}
