use serde::Serialize;

use crate::{color::DUTY_MAX, error::HardwareError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Red,
    Green,
    Blue,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Duties {
    pub red: u16,
    pub green: u16,
    pub blue: u16,
}

impl Duties {
    pub const OFF: Self = Self::new(0, 0, 0);

    pub const fn new(red: u16, green: u16, blue: u16) -> Self {
        Self { red, green, blue }
    }

    pub fn get(&self, channel: Channel) -> u16 {
        match channel {
            Channel::Red => self.red,
            Channel::Green => self.green,
            Channel::Blue => self.blue,
        }
    }

    pub fn set(&mut self, channel: Channel, duty: u16) {
        match channel {
            Channel::Red => self.red = duty,
            Channel::Green => self.green = duty,
            Channel::Blue => self.blue = duty,
        }
    }

    pub fn zip_with(self, other: Self, mut f: impl FnMut(u16, u16) -> u16) -> Self {
        Self {
            red: f(self.red, other.red),
            green: f(self.green, other.green),
            blue: f(self.blue, other.blue),
        }
    }
}

pub trait PwmChannel {
    fn set_frequency(&mut self, hz: u32) -> Result<(), HardwareError>;
    fn frequency(&self) -> u32;
    fn set_duty(&mut self, duty: u16) -> Result<(), HardwareError>;
    fn duty(&self) -> u16;
}

#[derive(Debug)]
pub struct PwmBank<C> {
    red: C,
    green: C,
    blue: C,
}

impl<C: PwmChannel> PwmBank<C> {
    pub fn new(red: C, green: C, blue: C) -> Self {
        Self { red, green, blue }
    }

    pub fn channel(&self, channel: Channel) -> &C {
        match channel {
            Channel::Red => &self.red,
            Channel::Green => &self.green,
            Channel::Blue => &self.blue,
        }
    }

    fn channel_mut(&mut self, channel: Channel) -> &mut C {
        match channel {
            Channel::Red => &mut self.red,
            Channel::Green => &mut self.green,
            Channel::Blue => &mut self.blue,
        }
    }

    pub fn frequency(&self) -> u32 {
        self.red.frequency()
    }

    pub fn duties(&self) -> Duties {
        Duties::new(self.red.duty(), self.green.duty(), self.blue.duty())
    }

    // Channels sharing one timer may already be retuned by an earlier write.
    pub fn set_frequency(&mut self, hz: u32) -> Result<bool, HardwareError> {
        if [Channel::Red, Channel::Green, Channel::Blue]
            .iter()
            .all(|&channel| self.channel(channel).frequency() == hz)
        {
            return Ok(false);
        }

        for channel in [Channel::Red, Channel::Green, Channel::Blue] {
            let output = self.channel_mut(channel);
            if output.frequency() != hz {
                output.set_frequency(hz)?;
            }
        }
        Ok(true)
    }

    pub fn write_channel(&mut self, channel: Channel, duty: u16) -> Result<(), HardwareError> {
        if duty > DUTY_MAX {
            return Err(HardwareError::DutyOutOfRange(duty));
        }
        self.channel_mut(channel).set_duty(duty)
    }

    pub fn write(&mut self, duties: Duties) -> Result<(), HardwareError> {
        for channel in [Channel::Red, Channel::Green, Channel::Blue] {
            self.write_channel(channel, duties.get(channel))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedChannel {
    frequency_hz: u32,
    duty: u16,
    duty_writes: u64,
    frequency_writes: u64,
}

impl SimulatedChannel {
    pub fn new(frequency_hz: u32) -> Self {
        Self {
            frequency_hz,
            ..Self::default()
        }
    }

    pub fn duty_writes(&self) -> u64 {
        self.duty_writes
    }

    pub fn frequency_writes(&self) -> u64 {
        self.frequency_writes
    }
}

impl PwmChannel for SimulatedChannel {
    fn set_frequency(&mut self, hz: u32) -> Result<(), HardwareError> {
        if hz == 0 {
            return Err(HardwareError::UnsupportedFrequency(hz));
        }
        self.frequency_hz = hz;
        self.frequency_writes += 1;
        Ok(())
    }

    fn frequency(&self) -> u32 {
        self.frequency_hz
    }

    fn set_duty(&mut self, duty: u16) -> Result<(), HardwareError> {
        if duty > DUTY_MAX {
            return Err(HardwareError::DutyOutOfRange(duty));
        }
        self.duty = duty;
        self.duty_writes += 1;
        Ok(())
    }

    fn duty(&self) -> u16 {
        self.duty
    }
}
