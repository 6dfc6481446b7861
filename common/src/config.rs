use serde::{Deserialize, Serialize};

pub const REFRESH_PERIOD: u8 = 10;

pub const DEFAULT_IP_LOOKUP_URL: &str = "http://ip-api.com/json/?fields=status,query,city,country";
pub const DEFAULT_TIMEZONE_LOOKUP_URL: &str =
    "http://ip-api.com/json/?fields=status,timezone,offset";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub refresh_period: u8,
    pub wake_button_gpio: i32,
    pub wifi_connect_timeout_secs: u32,
    pub split_public_private_ip: bool,
    pub battery_log_enabled: bool,
    pub battery_log_path: String,
    pub ip_lookup_url: String,
    pub timezone_lookup_url: String,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            refresh_period: REFRESH_PERIOD,
            wake_button_gpio: 36,
            wifi_connect_timeout_secs: 15,
            split_public_private_ip: true,
            battery_log_enabled: false,
            battery_log_path: "/battery.csv".to_string(),
            ip_lookup_url: DEFAULT_IP_LOOKUP_URL.to_string(),
            timezone_lookup_url: DEFAULT_TIMEZONE_LOOKUP_URL.to_string(),
        }
    }
}

impl ClockConfig {
    pub fn sanitize(&mut self) {
        self.refresh_period = self.refresh_period.clamp(1, 60);
        self.wifi_connect_timeout_secs = self.wifi_connect_timeout_secs.clamp(1, 120);

        if self.wake_button_gpio < 0 {
            self.wake_button_gpio = 36;
        }

        if self.battery_log_path.trim().is_empty() {
            self.battery_log_path = "/battery.csv".to_string();
        }
        if self.ip_lookup_url.trim().is_empty() {
            self.ip_lookup_url = DEFAULT_IP_LOOKUP_URL.to_string();
        }
        if self.timezone_lookup_url.trim().is_empty() {
            self.timezone_lookup_url = DEFAULT_TIMEZONE_LOOKUP_URL.to_string();
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
}

impl NetworkConfig {
    pub fn has_credentials(&self) -> bool {
        let ssid = self.wifi_ssid.trim();
        !ssid.is_empty() && ssid != "CHANGE_ME"
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.clock.sanitize();
    }
}
