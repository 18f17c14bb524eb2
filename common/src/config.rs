use serde::{Deserialize, Serialize};

use crate::types::Power;

pub const MIN_FADE_MS: u32 = 50;

pub const DEFAULT_PWM_FREQUENCY_HZ: u32 = 240;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    #[serde(rename = "switch")]
    pub power: Power,
    pub hue: f64,
    pub saturation: f64,
    pub level: f64,
    pub gamma: f64,
    #[serde(rename = "frequency")]
    pub pwm_frequency_hz: u32,
    #[serde(rename = "fadetime")]
    pub fade_duration_ms: u32,
    #[serde(rename = "brnorm")]
    pub brightness_normalize: bool,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            power: Power::Off,
            hue: 11.7647,
            saturation: 6.71937,
            level: 100.0,
            gamma: 1.0,
            pwm_frequency_hz: DEFAULT_PWM_FREQUENCY_HZ,
            fade_duration_ms: 1_000,
            brightness_normalize: true,
        }
    }
}

impl PersistedState {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        if !self.hue.is_finite() || !(0.0..100.0).contains(&self.hue) {
            self.hue = defaults.hue;
        }
        self.saturation = clamp_percent(self.saturation, defaults.saturation);
        self.level = clamp_percent(self.level, defaults.level);
        if !self.gamma.is_finite() || self.gamma <= 0.0 {
            self.gamma = defaults.gamma;
        }
        if self.pwm_frequency_hz == 0 {
            self.pwm_frequency_hz = defaults.pwm_frequency_hz;
        }
        self.fade_duration_ms = clamp_fade(self.fade_duration_ms);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureConfig {
    pub listen_addr: String,
    pub enable_http_server: bool,
    #[serde(alias = "listen_port_http")]
    pub http_port: u16,
    #[serde(alias = "enable_jtlvi_server")]
    pub enable_tlv_server: bool,
    #[serde(alias = "listen_port_jtlvi")]
    pub tlv_port: u16,
    pub auth_secret: String,
    pub init_light_test: bool,
    pub brightness_scale: f64,
    pub read_timeout_ms: u64,
    pub state: PersistedState,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            enable_http_server: true,
            http_port: 80,
            enable_tlv_server: true,
            tlv_port: 26079,
            auth_secret: String::new(),
            init_light_test: true,
            brightness_scale: 1.0,
            read_timeout_ms: 5_000,
            state: PersistedState::default(),
        }
    }
}

impl FixtureConfig {
    pub fn sanitize(&mut self) {
        self.brightness_scale = if self.brightness_scale.is_finite() {
            self.brightness_scale.clamp(0.0, 1.0)
        } else {
            1.0
        };
        if self.read_timeout_ms == 0 {
            self.read_timeout_ms = Self::default().read_timeout_ms;
        }
        self.state.sanitize();
    }
}

pub fn clamp_fade(duration_ms: u32) -> u32 {
    if duration_ms == 0 {
        0
    } else {
        duration_ms.max(MIN_FADE_MS)
    }
}

fn clamp_percent(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_keys_take_defaults() {
        let config: FixtureConfig =
            serde_json::from_str(r#"{"auth_secret":"hunter2","state":{"switch":"on"}}"#).unwrap();

        assert_eq!(config.auth_secret, "hunter2");
        assert_eq!(config.tlv_port, 26079);
        assert_eq!(config.state.power, Power::On);
        assert_eq!(config.state.pwm_frequency_hz, 240);
        assert!(config.state.brightness_normalize);
    }

    #[test]
    fn legacy_listener_keys_are_understood() {
        let config: FixtureConfig = serde_json::from_str(
            r#"{"listen_port_http":8081,"enable_jtlvi_server":false,"listen_port_jtlvi":9000,
                "led_r_pin":13}"#,
        )
        .unwrap();

        assert_eq!(config.http_port, 8081);
        assert!(!config.enable_tlv_server);
        assert_eq!(config.tlv_port, 9000);
    }

    #[test]
    fn state_uses_wire_names_on_disk() {
        let value = serde_json::to_value(PersistedState::default()).unwrap();

        assert_eq!(value["switch"], "off");
        assert_eq!(value["frequency"], 240);
        assert_eq!(value["fadetime"], 1000);
        assert_eq!(value["brnorm"], true);
    }

    #[test]
    fn sanitize_repairs_out_of_range_values() {
        let mut config = FixtureConfig {
            brightness_scale: 3.5,
            read_timeout_ms: 0,
            state: PersistedState {
                hue: 140.0,
                saturation: -3.0,
                level: 250.0,
                gamma: 0.0,
                pwm_frequency_hz: 0,
                fade_duration_ms: 10,
                ..PersistedState::default()
            },
            ..FixtureConfig::default()
        };

        config.sanitize();

        assert_eq!(config.brightness_scale, 1.0);
        assert_eq!(config.read_timeout_ms, 5_000);
        assert_eq!(config.state.hue, 11.7647);
        assert_eq!(config.state.saturation, 0.0);
        assert_eq!(config.state.level, 100.0);
        assert_eq!(config.state.gamma, 1.0);
        assert_eq!(config.state.pwm_frequency_hz, 240);
        assert_eq!(config.state.fade_duration_ms, 50);
    }

    #[test]
    fn zero_fade_stays_a_snap() {
        assert_eq!(clamp_fade(0), 0);
        assert_eq!(clamp_fade(1), 50);
        assert_eq!(clamp_fade(1_500), 1_500);
    }
}
