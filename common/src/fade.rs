use std::{collections::VecDeque, f64::consts::PI};

use crate::{
    color::{hsv_to_rgb, DUTY_MAX},
    pwm::{Channel, Duties},
};

pub const STEP_MS: u32 = 50;

// Stepping all the way to 1023 makes some PWM peripherals switch the output
// off internally, which shows as a flash.
pub const ANIMATION_PEAK: f64 = 1020.0;

const DEMO_FRAMES_PER_TURN: u32 = 40;
const DEMO_TURNS: u32 = 3;
const SNAP_TEST_HOLD_MS: u32 = 1_000;

const LIGHT_TEST_PATTERNS: [&[Channel]; 7] = [
    &[Channel::Red],
    &[Channel::Green],
    &[Channel::Blue],
    &[Channel::Red, Channel::Green],
    &[Channel::Green, Channel::Blue],
    &[Channel::Red, Channel::Blue],
    &[Channel::Red, Channel::Green, Channel::Blue],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub duties: Duties,
    pub hold_ms: u32,
}

impl Frame {
    pub const fn new(duties: Duties, hold_ms: u32) -> Self {
        Self { duties, hold_ms }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Animation {
    LightTest { steps: u32, brightness_scale: f64 },
    DemoSweep { brightness_scale: f64 },
}

impl Animation {
    pub fn light_test(duration_ms: u32, brightness_scale: f64) -> Self {
        Self::LightTest {
            steps: duration_ms / STEP_MS,
            brightness_scale,
        }
    }

    pub fn demo_sweep(brightness_scale: f64) -> Self {
        Self::DemoSweep { brightness_scale }
    }

    pub fn frame(&self, index: u32) -> Option<Frame> {
        match *self {
            Self::LightTest {
                steps,
                brightness_scale,
            } => light_test_frame(steps, brightness_scale, index),
            Self::DemoSweep { brightness_scale } => demo_sweep_frame(brightness_scale, index),
        }
    }

    pub fn frames(self) -> impl Iterator<Item = Frame> {
        (0u32..).map_while(move |index| self.frame(index))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    FadeTo(Duties),
    Animate(Animation),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum FadePhase {
    #[default]
    Idle,
    Fading {
        step_index: u32,
        from: Duties,
        to: Duties,
        steps: u32,
    },
    Playing {
        animation: Animation,
        index: u32,
    },
}

#[derive(Debug, Clone, Default)]
pub struct FadeEngine {
    duration_ms: u32,
    phase: FadePhase,
    queue: VecDeque<Segment>,
}

impl FadeEngine {
    pub fn new(duration_ms: u32) -> Self {
        Self {
            duration_ms,
            ..Self::default()
        }
    }

    // Fades already running keep their step count.
    pub fn set_duration_ms(&mut self, duration_ms: u32) {
        self.duration_ms = duration_ms;
    }

    pub fn phase(&self) -> &FadePhase {
        &self.phase
    }

    pub fn is_idle(&self) -> bool {
        self.phase == FadePhase::Idle && self.queue.is_empty()
    }

    pub fn fade_to(&mut self, to: Duties) {
        self.queue.push_back(Segment::FadeTo(to));
    }

    pub fn play(&mut self, animation: Animation) {
        self.queue.push_back(Segment::Animate(animation));
    }

    pub fn cancel(&mut self) {
        self.phase = FadePhase::Idle;
        self.queue.clear();
    }

    pub fn next_frame(&mut self, current: Duties) -> Option<Frame> {
        loop {
            match std::mem::take(&mut self.phase) {
                FadePhase::Idle => match self.queue.pop_front()? {
                    Segment::FadeTo(to) if to == current => {}
                    Segment::FadeTo(to) => {
                        let steps = self.duration_ms / STEP_MS;
                        if steps == 0 {
                            return Some(Frame::new(to, 0));
                        }
                        self.phase = FadePhase::Fading {
                            step_index: 0,
                            from: current,
                            to,
                            steps,
                        };
                    }
                    Segment::Animate(animation) => {
                        self.phase = FadePhase::Playing {
                            animation,
                            index: 0,
                        };
                    }
                },
                FadePhase::Fading {
                    step_index,
                    from,
                    to,
                    steps,
                } if step_index < steps => {
                    let duties =
                        from.zip_with(to, |from, to| eased_duty(from, to, step_index, steps));
                    self.phase = FadePhase::Fading {
                        step_index: step_index + 1,
                        from,
                        to,
                        steps,
                    };
                    return Some(Frame::new(duties, STEP_MS));
                }
                FadePhase::Fading { .. } => {}
                FadePhase::Playing { animation, index } => {
                    if let Some(frame) = animation.frame(index) {
                        self.phase = FadePhase::Playing {
                            animation,
                            index: index + 1,
                        };
                        return Some(frame);
                    }
                }
            }
        }
    }
}

pub fn eased_duty(from: u16, to: u16, step: u32, steps: u32) -> u16 {
    let delta = f64::from(from) - f64::from(to);
    let progress = f64::from(step + 1) / f64::from(steps * 2);
    let eased = (progress * PI).sin() * delta;
    let duty = f64::from(to) + delta - eased.round();
    duty.clamp(0.0, f64::from(DUTY_MAX)) as u16
}

fn light_test_frame(steps: u32, brightness_scale: f64, index: u32) -> Option<Frame> {
    // each pattern swells over `steps` frames, or holds once, then goes dark
    let per_pattern = steps.max(1) + 1;
    let pattern = LIGHT_TEST_PATTERNS.get(usize::try_from(index / per_pattern).ok()?)?;
    let step = index % per_pattern;
    if step == per_pattern - 1 {
        return Some(Frame::new(Duties::OFF, 0));
    }

    let (duty, hold_ms) = if steps == 0 {
        (
            (f64::from(DUTY_MAX) * brightness_scale) as u16,
            SNAP_TEST_HOLD_MS,
        )
    } else {
        let phase = f64::from(step + 1) / f64::from(steps) * PI;
        let duty = (phase.sin() * ANIMATION_PEAK * brightness_scale).max(0.0) as u16;
        (duty, STEP_MS)
    };
    let mut duties = Duties::OFF;
    for &channel in *pattern {
        duties.set(channel, duty);
    }
    Some(Frame::new(duties, hold_ms))
}

fn demo_sweep_frame(brightness_scale: f64, index: u32) -> Option<Frame> {
    if index >= DEMO_TURNS * DEMO_FRAMES_PER_TURN {
        return None;
    }
    let peak = ANIMATION_PEAK * brightness_scale;
    let hue = f64::from(index % DEMO_FRAMES_PER_TURN) / f64::from(DEMO_FRAMES_PER_TURN);
    let (r, g, b) = hsv_to_rgb(hue, 1.0, 1.0);
    let duties = Duties::new((r * peak) as u16, (g * peak) as u16, (b * peak) as u16);
    Some(Frame::new(duties, STEP_MS))
}

pub fn demo_lead_in(brightness_scale: f64) -> Duties {
    Duties::new((ANIMATION_PEAK * brightness_scale) as u16, 0, 0)
}
