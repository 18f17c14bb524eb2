use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Power {
    On,
    #[default]
    Off,
}

impl Power {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub switch: &'static str,
    pub hue: f64,
    pub saturation: f64,
    pub level: f64,
    pub gamma: f64,
    pub frequency: u32,
    pub fadetime: u32,
    pub brnorm: bool,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub hex: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    pub id: String,
    pub freq: String,
    pub release: String,
    pub version: String,
    pub machine: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResponse {
    pub state: StateSnapshot,
    pub sysinfo: SystemInfo,
}
