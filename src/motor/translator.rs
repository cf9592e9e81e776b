// Motion translation: discrete command + current speed -> raw per-side power
//
// The speed level is the only state carried between commands. Every motion
// command produces a fresh power pair that fully replaces the previous one.

use std::fmt;

use crate::config::ConfigError;
use crate::messages::{MotionCommand, SidePowers};

/// Inner wheel power while turning, as a fraction of the outer wheel
pub const TURN_RATIO: f32 = 0.5;

const MIN_TENTHS: u8 = 1;
const MAX_TENTHS: u8 = 10;

/// Speed in [0.1, 1.0], kept as whole tenths so repeated steps stay exact
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SpeedLevel(u8);

impl SpeedLevel {
    pub const MIN: SpeedLevel = SpeedLevel(MIN_TENTHS);
    pub const MAX: SpeedLevel = SpeedLevel(MAX_TENTHS);

    /// Nearest tenth of `value`. Values outside [0.1, 1.0] are rejected before rounding.
    pub fn from_fraction(value: f32) -> Result<Self, ConfigError> {
        if !(SpeedLevel::MIN.as_fraction()..=SpeedLevel::MAX.as_fraction()).contains(&value) {
            return Err(ConfigError::InvalidSpeed(value));
        }
        let tenths = (value * 10.0).round() as u8;
        Ok(SpeedLevel(tenths.clamp(MIN_TENTHS, MAX_TENTHS)))
    }

    pub fn as_fraction(self) -> f32 {
        self.0 as f32 / 10.0
    }

    pub fn percent(self) -> u8 {
        self.0 * 10
    }

    /// One step up, saturating at 1.0
    pub fn increased(self) -> Self {
        SpeedLevel((self.0 + 1).min(MAX_TENTHS))
    }

    /// One step down, saturating at 0.1
    pub fn decreased(self) -> Self {
        SpeedLevel(self.0.saturating_sub(1).max(MIN_TENTHS))
    }
}

impl Default for SpeedLevel {
    fn default() -> Self {
        SpeedLevel(5)
    }
}

impl fmt::Display for SpeedLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent())
    }
}

/// What the control loop should do with a command
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// Drive the actuators with these raw (uncorrected) powers
    Drive {
        command: MotionCommand,
        powers: SidePowers,
    },
    /// Speed level adjusted; nothing moves. `changed` is false at a bound.
    SpeedChanged {
        command: MotionCommand,
        speed: SpeedLevel,
        changed: bool,
    },
    Quit,
}

/// Raw power pair for a motion command at `speed`. `None` for non-motion commands.
pub fn side_powers(command: MotionCommand, speed: SpeedLevel) -> Option<SidePowers> {
    let s = speed.as_fraction();
    let powers = match command {
        MotionCommand::Forward => SidePowers::new(s, s),
        MotionCommand::Backward => SidePowers::new(-s, -s),
        MotionCommand::TurnLeft => SidePowers::new(-s * TURN_RATIO, s),
        MotionCommand::TurnRight => SidePowers::new(s, -s * TURN_RATIO),
        MotionCommand::Stop => SidePowers::zero(),
        _ => return None,
    };
    Some(powers)
}

/// Holds the current speed and turns commands into outcomes
#[derive(Debug, Clone, Default)]
pub struct MotionController {
    speed: SpeedLevel,
}

impl MotionController {
    pub fn new(speed: SpeedLevel) -> Self {
        Self { speed }
    }

    pub fn speed(&self) -> SpeedLevel {
        self.speed
    }

    pub fn handle(&mut self, command: MotionCommand) -> Outcome {
        match command {
            MotionCommand::IncreaseSpeed | MotionCommand::DecreaseSpeed => {
                let next = if command == MotionCommand::IncreaseSpeed {
                    self.speed.increased()
                } else {
                    self.speed.decreased()
                };
                let changed = next != self.speed;
                self.speed = next;
                Outcome::SpeedChanged {
                    command,
                    speed: next,
                    changed,
                }
            }
            MotionCommand::Quit => Outcome::Quit,
            _ => Outcome::Drive {
                command,
                powers: side_powers(command, self.speed).unwrap_or_default(),
            },
        }
    }
}
