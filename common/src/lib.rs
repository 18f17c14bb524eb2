pub mod color;
pub mod command;
pub mod config;
pub mod error;
pub mod fade;
pub mod fixture;
pub mod http;
pub mod pwm;
pub mod state;
pub mod tlv;
pub mod types;

pub use command::{Command, CommandProcessor, FixtureAction, StateUpdate};
pub use config::{FixtureConfig, PersistedState};
pub use error::{CommandError, DatagramError, HardwareError, HttpError, TlvError};
pub use fade::{Animation, FadeEngine, Frame};
pub use fixture::{Fixture, HttpReply};
pub use http::{HttpRequest, HttpResponse, RequestHead};
pub use pwm::{Channel, Duties, PwmBank, PwmChannel, SimulatedChannel};
pub use state::{ColorState, DeviceState};
pub use types::{CommandResponse, Power, StateSnapshot, SystemInfo};
