// Define message types for the runtime

use std::fmt;
use std::time::Duration;

use clap::ValueEnum;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde::{Deserialize, Serialize};

// Escape sequences the terminal sends for the arrow keys
const ARROW_UP: &str = "\x1b[A";
const ARROW_DOWN: &str = "\x1b[B";
const ARROW_RIGHT: &str = "\x1b[C";
const ARROW_LEFT: &str = "\x1b[D";
const ESCAPE: &str = "\x1b";

/// Discrete motion intent produced once per input event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionCommand {
    Forward,
    Backward,
    TurnLeft,
    TurnRight,
    Stop,
    IncreaseSpeed,
    DecreaseSpeed,
    Quit,
}

impl MotionCommand {
    /// Map a raw input token to a command.
    ///
    /// Unrecognized tokens return `None` and are meant to be ignored.
    pub fn from_token(token: &str) -> Option<Self> {
        let cmd = match token {
            "w" | "W" | ARROW_UP => Self::Forward,
            "s" | "S" | ARROW_DOWN => Self::Backward,
            "a" | "A" | ARROW_LEFT => Self::TurnLeft,
            "d" | "D" | ARROW_RIGHT => Self::TurnRight,
            " " => Self::Stop,
            "+" | "=" => Self::IncreaseSpeed,
            "-" | "_" => Self::DecreaseSpeed,
            "q" | "Q" | ESCAPE => Self::Quit,
            _ => return None,
        };
        Some(cmd)
    }

    /// Map a terminal key event to a command
    pub fn from_key(key: &KeyEvent) -> Option<Self> {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return None;
        }
        match key.code {
            KeyCode::Up => Some(Self::Forward),
            KeyCode::Down => Some(Self::Backward),
            KeyCode::Left => Some(Self::TurnLeft),
            KeyCode::Right => Some(Self::TurnRight),
            KeyCode::Esc => Some(Self::Quit),
            KeyCode::Char(c) => {
                let mut buf = [0u8; 4];
                Self::from_token(c.encode_utf8(&mut buf))
            }
            _ => None,
        }
    }
}

/// One of the two actuated sides of the robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// Rotation direction of a stepper actuator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// Level of the direction signal (HIGH = forward)
    pub fn level(self) -> bool {
        matches!(self, Direction::Forward)
    }

    /// Direction encoded by the sign of a power level. Zero counts as forward.
    pub fn from_power(power: f32) -> Self {
        if power < 0.0 {
            Direction::Backward
        } else {
            Direction::Forward
        }
    }
}

/// Signed power per side, in [-1.0, 1.0]. Sign is direction, magnitude is intensity.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SidePowers {
    pub left: f32,
    pub right: f32,
}

impl SidePowers {
    pub fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn get(&self, side: Side) -> f32 {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    /// Both sides clamped to [-1.0, 1.0]
    pub fn clamped(&self) -> Self {
        Self {
            left: clamp_power(self.left),
            right: clamp_power(self.right),
        }
    }
}

/// Clamp a power level to [-1.0, 1.0]. NaN becomes zero.
pub fn clamp_power(power: f32) -> f32 {
    if power.is_nan() {
        0.0
    } else {
        power.clamp(-1.0, 1.0)
    }
}

/// One open-loop stepping motion for one or two synchronized actuators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulsePlan {
    pub step_count: u32,
    pub direction: Direction,
    pub pulse_interval: Duration,
}

impl PulsePlan {
    pub fn new(step_count: u32, direction: Direction, pulse_interval: Duration) -> Self {
        Self {
            step_count,
            direction,
            pulse_interval,
        }
    }

    /// Wall-clock length of the plan (two waits per step), saturating at `Duration::MAX`
    pub fn duration(&self) -> Duration {
        self.pulse_interval
            .checked_mul(2)
            .and_then(|period| period.checked_mul(self.step_count))
            .unwrap_or(Duration::MAX)
    }
}

/// Channel percentages for one H-bridge side. At most one is non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DutyCycleOutput {
    pub forward: f32,
    pub reverse: f32,
}

impl DutyCycleOutput {
    pub fn off() -> Self {
        Self::default()
    }
}

/// Human-readable line printed for each accepted command
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusLine {
    Moving { command: MotionCommand, percent: u8 },
    Stopped,
    SpeedIncreased(u8),
    SpeedDecreased(u8),
    SpeedAtMaximum(u8),
    SpeedAtMinimum(u8),
    Exiting,
    Interrupted,
    CleanedUp,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLine::Moving { command, percent } => {
                let label = match command {
                    MotionCommand::Forward => "Forward",
                    MotionCommand::Backward => "Backward",
                    MotionCommand::TurnLeft => "Turn left",
                    MotionCommand::TurnRight => "Turn right",
                    _ => "Move",
                };
                write!(f, "{} - Speed: {}%", label, percent)
            }
            StatusLine::Stopped => write!(f, "Stop"),
            StatusLine::SpeedIncreased(p) => write!(f, "Speed increased: {}%", p),
            StatusLine::SpeedDecreased(p) => write!(f, "Speed decreased: {}%", p),
            StatusLine::SpeedAtMaximum(p) => write!(f, "Speed at maximum: {}%", p),
            StatusLine::SpeedAtMinimum(p) => write!(f, "Speed at minimum: {}%", p),
            StatusLine::Exiting => write!(f, "Exiting program..."),
            StatusLine::Interrupted => write!(f, "Program interrupted by user..."),
            StatusLine::CleanedUp => write!(f, "GPIO cleaned up. Program terminated."),
        }
    }
}
