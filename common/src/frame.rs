use crate::{config::ClockConfig, state::DeviceState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub label: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fields: Vec<Field>,
    pub time: String,
}

impl Frame {
    pub fn compose(state: &DeviceState, config: &ClockConfig, time: &str) -> Self {
        let mut fields = Vec::with_capacity(9);
        let mut push = |label: &'static str, value: String| fields.push(Field { label, value });

        push("SD card available", yes_no(state.sd_card_available));
        push("Temperature", format!("{}C", state.temperature_celsius));
        push("Battery", format!("{:.2}V", state.battery_voltage));
        push("Screen dimensions", state.screen_dimensions.to_string());
        push("MAC address", state.mac_address.to_string());
        push("Network connected", yes_no(state.network_connected));

        if state.network_connected {
            if config.split_public_private_ip {
                push("Local IP address", state.local_ip_address.to_string());
                push("Public IP address", state.public_ip_address.to_string());
            } else {
                let address = if state.public_ip_address.is_empty() {
                    state.local_ip_address.as_str()
                } else {
                    state.public_ip_address.as_str()
                };
                push("IP address", address.to_string());
            }
            push("Location", state.location.to_string());
        }

        Self {
            fields,
            time: time.to_string(),
        }
    }

    pub fn value_of(&self, label: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.label == label)
            .map(|field| field.value.as_str())
    }
}

fn yes_no(value: bool) -> String {
    let text = if value { "Yes" } else { "No" };
    text.to_string()
}
