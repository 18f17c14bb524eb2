use crate::{
    color::{apply_gamma, hsv_to_rgb, normalize_brightness, DUTY_MAX},
    config::PersistedState,
    pwm::Duties,
    types::{Power, StateSnapshot},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorState {
    pub hue: f64,
    pub saturation: f64,
    pub level: f64,
    pub gamma: f64,
    pub brightness_normalize: bool,
}

impl ColorState {
    fn rgb_unit(&self, level: f64) -> (f64, f64, f64) {
        hsv_to_rgb(self.hue / 100.0, self.saturation / 100.0, level / 100.0)
    }

    pub fn rgb8(&self) -> (u8, u8, u8) {
        to_rgb8(self.rgb_unit(self.level))
    }

    pub fn hex8(&self) -> String {
        let (r, g, b) = to_rgb8(self.rgb_unit(100.0));
        format!("#{r:02X}{g:02X}{b:02X}")
    }

    pub fn target_duties(&self, brightness_scale: f64) -> Duties {
        let (r, g, b) = self.rgb_unit(self.level);
        let full_scale = f64::from(DUTY_MAX) * brightness_scale;
        let (mut r, mut g, mut b) = (r * full_scale, g * full_scale, b * full_scale);

        if self.gamma != 1.0 {
            r = apply_gamma(r, self.gamma);
            g = apply_gamma(g, self.gamma);
            b = apply_gamma(b, self.gamma);
        }
        if self.brightness_normalize {
            (r, g, b) = normalize_brightness(r, g, b);
        }

        Duties::new(to_duty(r), to_duty(g), to_duty(b))
    }
}

fn to_rgb8((r, g, b): (f64, f64, f64)) -> (u8, u8, u8) {
    let channel = |value: f64| (value * 255.0).clamp(0.0, 255.0) as u8;
    (channel(r), channel(g), channel(b))
}

fn to_duty(value: f64) -> u16 {
    value.round().clamp(0.0, f64::from(DUTY_MAX)) as u16
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub power: Power,
    pub color: ColorState,
    pub pwm_frequency_hz: u32,
    pub fade_duration_ms: u32,
    pub duties: Duties,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::from_persisted(&PersistedState::default())
    }
}

impl DeviceState {
    pub fn from_persisted(persisted: &PersistedState) -> Self {
        Self {
            power: persisted.power,
            color: ColorState {
                hue: persisted.hue,
                saturation: persisted.saturation,
                level: persisted.level,
                gamma: persisted.gamma,
                brightness_normalize: persisted.brightness_normalize,
            },
            pwm_frequency_hz: persisted.pwm_frequency_hz,
            fade_duration_ms: persisted.fade_duration_ms,
            duties: Duties::OFF,
        }
    }

    pub fn to_persisted(&self) -> PersistedState {
        PersistedState {
            power: self.power,
            hue: self.color.hue,
            saturation: self.color.saturation,
            level: self.color.level,
            gamma: self.color.gamma,
            pwm_frequency_hz: self.pwm_frequency_hz,
            fade_duration_ms: self.fade_duration_ms,
            brightness_normalize: self.color.brightness_normalize,
        }
    }

    pub fn target_duties(&self, brightness_scale: f64) -> Duties {
        match self.power {
            Power::Off => Duties::OFF,
            Power::On => self.color.target_duties(brightness_scale),
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let (red, green, blue) = self.color.rgb8();
        StateSnapshot {
            switch: self.power.as_str(),
            hue: self.color.hue,
            saturation: self.color.saturation,
            level: self.color.level,
            gamma: self.color.gamma,
            frequency: self.pwm_frequency_hz,
            fadetime: self.fade_duration_ms,
            brnorm: self.color.brightness_normalize,
            red,
            green,
            blue,
            hex: self.color.hex8(),
        }
    }
}
