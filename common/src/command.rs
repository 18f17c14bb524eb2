use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::{
    color::rgb_to_hsv,
    config::MIN_FADE_MS,
    error::CommandError,
    state::DeviceState,
    types::{CommandResponse, Power, SystemInfo},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureAction {
    Reset,
    Demo,
    Persist,
    ApplyTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Demo,
    Reset,
    Persist,
}

impl Command {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "demo" => Some(Self::Demo),
            "reset" => Some(Self::Reset),
            "persist" | "savestate" => Some(Self::Persist),
            _ => None,
        }
    }

    fn action(self) -> FixtureAction {
        match self {
            Self::Demo => FixtureAction::Demo,
            Self::Reset => FixtureAction::Reset,
            Self::Persist => FixtureAction::Persist,
        }
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

// First key among `names` whose value has the expected type. Nulls never do.
fn field<T: DeserializeOwned>(fields: &Map<String, Value>, names: &[&str]) -> Option<T> {
    names
        .iter()
        .filter_map(|name| fields.get(*name))
        .find_map(|value| T::deserialize(value).ok())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub power: Option<String>,
    pub hue: Option<f64>,
    pub saturation: Option<f64>,
    pub level: Option<f64>,
    pub gamma: Option<f64>,
    pub pwm_frequency_hz: Option<f64>,
    pub fade_duration_ms: Option<f64>,
    pub brightness_normalize: Option<bool>,
    pub red: Option<f64>,
    pub green: Option<f64>,
    pub blue: Option<f64>,
}

impl From<&Map<String, Value>> for StateUpdate {
    fn from(fields: &Map<String, Value>) -> Self {
        Self {
            power: field(fields, &["switch", "power"]),
            hue: field(fields, &["hue"]),
            saturation: field(fields, &["saturation"]),
            level: field(fields, &["level"]),
            gamma: field(fields, &["gamma"]),
            pwm_frequency_hz: field(fields, &["frequency", "pwmFrequencyHz"]),
            fade_duration_ms: field(fields, &["fadetime", "fadeDurationMs"]),
            brightness_normalize: field(fields, &["brnorm", "brightnessNormalize"]),
            red: field(fields, &["red"]),
            green: field(fields, &["green"]),
            blue: field(fields, &["blue"]),
        }
    }
}

fn percent(value: Option<f64>) -> Option<f64> {
    value.filter(|v| (0.0..=100.0).contains(v))
}

fn rgb_component(value: Option<f64>) -> Option<f64> {
    value.filter(|v| (0.0..=255.0).contains(v))
}

impl StateUpdate {
    pub fn merged_into(&self, current: &DeviceState) -> DeviceState {
        let mut next = current.clone();

        if let Some(power) = self.power.as_deref().and_then(Power::parse) {
            next.power = power;
        }
        if let Some(hue) = self.hue.filter(|v| (0.0..100.0).contains(v)) {
            next.color.hue = hue;
        }
        if let Some(saturation) = percent(self.saturation) {
            next.color.saturation = saturation;
        }
        if let Some(level) = percent(self.level) {
            next.color.level = level;
        }
        if let Some(gamma) = self.gamma.filter(|v| v.is_finite() && *v > 0.0) {
            next.color.gamma = gamma;
        }
        if let Some(hz) = self
            .pwm_frequency_hz
            .filter(|v| (1.0..=f64::from(u32::MAX)).contains(v))
        {
            next.pwm_frequency_hz = hz as u32;
        }
        if let Some(ms) = self
            .fade_duration_ms
            .filter(|v| (0.0..=f64::from(u32::MAX)).contains(v))
        {
            next.fade_duration_ms = if ms > 0.0 {
                ms.max(f64::from(MIN_FADE_MS)) as u32
            } else {
                0
            };
        }
        if let Some(normalize) = self.brightness_normalize {
            next.color.brightness_normalize = normalize;
        }

        if let (Some(red), Some(green), Some(blue)) = (
            rgb_component(self.red),
            rgb_component(self.green),
            rgb_component(self.blue),
        ) {
            let (h, s, v) = rgb_to_hsv(red / 255.0, green / 255.0, blue / 255.0);
            next.color.hue = h * 100.0;
            next.color.saturation = s * 100.0;
            next.color.level = (v * 100.0).trunc();
        }

        next
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommandRequest {
    #[serde(deserialize_with = "lenient")]
    pub state: Option<Map<String, Value>>,
    #[serde(deserialize_with = "lenient")]
    pub cmd: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub response: CommandResponse,
    pub actions: Vec<FixtureAction>,
    pub ignored_command: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommandProcessor {
    sysinfo: SystemInfo,
}

impl CommandProcessor {
    pub fn new(sysinfo: SystemInfo) -> Self {
        Self { sysinfo }
    }

    pub fn handle(
        &self,
        state: &mut DeviceState,
        body: &[u8],
    ) -> Result<CommandOutcome, CommandError> {
        let value: Value = serde_json::from_slice(body)?;
        if !value.is_object() {
            return Err(CommandError::NotAnObject);
        }
        let request: CommandRequest = serde_json::from_value(value)?;

        if let Some(fields) = &request.state {
            *state = StateUpdate::from(fields).merged_into(state);
        }

        let response = CommandResponse {
            state: state.snapshot(),
            sysinfo: self.sysinfo.clone(),
        };

        let mut actions = Vec::new();
        let mut ignored_command = None;
        if let Some(raw) = request.cmd {
            match Command::parse(&raw) {
                Some(command) => actions.push(command.action()),
                None => ignored_command = Some(raw),
            }
        }
        if request.state.is_some() {
            actions.push(FixtureAction::ApplyTarget);
        }

        Ok(CommandOutcome {
            response,
            actions,
            ignored_command,
        })
    }
}
