// Pin map, timing, correction factors and CLI
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::messages::Direction;
use crate::motor::calibration::SideCorrection;
use crate::motor::gpio::Pin;
use crate::motor::pulse::StepperPins;
use crate::motor::translator::SpeedLevel;

// Default speed level at startup (fraction of full power)
pub const DEFAULT_SPEED: f32 = 0.5;

// Correction factors for mechanical drift (right motor runs slightly hot)
pub const LEFT_FACTOR: f32 = 1.0;
pub const RIGHT_FACTOR: f32 = 0.90;

// H-bridge (BTS7960) wiring, BCM numbering
pub const LEFT_ENABLE_PINS: [Pin; 2] = [16, 12];
pub const LEFT_FORWARD_PWM: Pin = 20;
pub const LEFT_REVERSE_PWM: Pin = 21;
pub const RIGHT_ENABLE_PINS: [Pin; 2] = [7, 1];
pub const RIGHT_FORWARD_PWM: Pin = 8;
pub const RIGHT_REVERSE_PWM: Pin = 25;
pub const PWM_FREQUENCY_HZ: u32 = 100;

// Stepper driver wiring, BCM numbering
pub const LEFT_PULSE_PIN: Pin = 23;
pub const LEFT_DIR_PIN: Pin = 24;
pub const RIGHT_PULSE_PIN: Pin = 3;
pub const RIGHT_DIR_PIN: Pin = 2;

// Stepper timing
pub const PULSE_INTERVAL: Duration = Duration::from_millis(1);
pub const STEPS_PER_COMMAND: u32 = 200;
pub const PLAN_STEPS: u32 = 6000;

// How often the keyboard source wakes up to check for interruption
pub const INPUT_POLL: Duration = Duration::from_millis(50);

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Correction factor for {side} side must be in (0, 1], got {value}")]
    InvalidCorrection { side: &'static str, value: f32 },

    #[error("Speed must be between 0.1 and 1.0, got {0}")]
    InvalidSpeed(f32),

    #[error("Pulse interval must be non-zero")]
    ZeroPulseInterval,

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Which low-level signalling strategy drives the actuators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    DutyCycle,
    Stepper,
}

/// One H-bridge side: enable lines plus complementary PWM channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HBridgePins {
    pub enable: [Pin; 2],
    pub forward: Pin,
    pub reverse: Pin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DutyCyclePins {
    pub left: HBridgePins,
    pub right: HBridgePins,
    pub pwm_frequency_hz: u32,
}

impl Default for DutyCyclePins {
    fn default() -> Self {
        Self {
            left: HBridgePins {
                enable: LEFT_ENABLE_PINS,
                forward: LEFT_FORWARD_PWM,
                reverse: LEFT_REVERSE_PWM,
            },
            right: HBridgePins {
                enable: RIGHT_ENABLE_PINS,
                forward: RIGHT_FORWARD_PWM,
                reverse: RIGHT_REVERSE_PWM,
            },
            pwm_frequency_hz: PWM_FREQUENCY_HZ,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepperConfig {
    pub left: StepperPins,
    pub right: StepperPins,
    /// Steps issued for a full-power command; scaled down by the power magnitude
    pub steps_per_command: u32,
    #[serde(with = "micros")]
    pub pulse_interval: Duration,
}

impl Default for StepperConfig {
    fn default() -> Self {
        Self {
            left: StepperPins::new(LEFT_PULSE_PIN, LEFT_DIR_PIN),
            right: StepperPins::new(RIGHT_PULSE_PIN, RIGHT_DIR_PIN),
            steps_per_command: STEPS_PER_COMMAND,
            pulse_interval: PULSE_INTERVAL,
        }
    }
}

/// Per-side correction factors as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrectionFactors {
    pub left: f32,
    pub right: f32,
}

impl Default for CorrectionFactors {
    fn default() -> Self {
        Self {
            left: LEFT_FACTOR,
            right: RIGHT_FACTOR,
        }
    }
}

/// Everything the runtime needs to know about the robot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub backend: BackendKind,
    pub initial_speed: f32,
    pub correction: CorrectionFactors,
    pub duty_cycle: DutyCyclePins,
    pub stepper: StepperConfig,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            initial_speed: DEFAULT_SPEED,
            correction: CorrectionFactors::default(),
            duty_cycle: DutyCyclePins::default(),
            stepper: StepperConfig::default(),
        }
    }
}

impl RobotConfig {
    /// Load a JSON config file. Missing fields fall back to the defaults above.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn correction(&self) -> Result<SideCorrection, ConfigError> {
        SideCorrection::try_from(self.correction)
    }

    pub fn speed(&self) -> Result<SpeedLevel, ConfigError> {
        SpeedLevel::from_fraction(self.initial_speed)
    }

    /// Check every value the runtime relies on, before any pin is touched
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.correction()?;
        self.speed()?;
        if self.stepper.pulse_interval.is_zero() {
            return Err(ConfigError::ZeroPulseInterval);
        }
        Ok(())
    }

    /// Load from `path` if given, otherwise use the defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

mod micros {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_micros() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_micros)
    }
}

// Command line

#[derive(Debug, Parser)]
#[command(name = "diffdrive-runtime", version, about = "Keyboard drive for a two-motor robot")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactive keyboard control (default)
    Drive(DriveArgs),
    /// Run one synchronized stepper move and exit
    Plan(PlanArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct DriveArgs {
    /// JSON robot config
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    #[arg(long)]
    pub left_factor: Option<f32>,

    #[arg(long)]
    pub right_factor: Option<f32>,

    /// Starting speed, 0.1 to 1.0
    #[arg(long)]
    pub speed: Option<f32>,
}

impl DriveArgs {
    /// Load the config file (if any) and apply the command-line overrides
    pub fn resolve(&self) -> Result<RobotConfig, ConfigError> {
        let mut config = RobotConfig::load_or_default(self.config.as_deref())?;
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(left) = self.left_factor {
            config.correction.left = left;
        }
        if let Some(right) = self.right_factor {
            config.correction.right = right;
        }
        if let Some(speed) = self.speed {
            config.initial_speed = speed;
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlanSide {
    Left,
    Right,
    Both,
}

#[derive(Debug, Clone, Args)]
pub struct PlanArgs {
    /// JSON robot config (stepper pins)
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "forward")]
    pub direction: Direction,

    #[arg(long, default_value_t = PLAN_STEPS)]
    pub steps: u32,

    /// Half-period of the pulse train in microseconds
    #[arg(long)]
    pub interval_us: Option<u64>,

    #[arg(long, value_enum, default_value = "both")]
    pub side: PlanSide,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_wiring() {
        let config = RobotConfig::default();
        assert_eq!(config.backend, BackendKind::DutyCycle);
        assert_eq!(config.initial_speed, 0.5);
        assert_eq!(config.duty_cycle.left.forward, 20);
        assert_eq!(config.duty_cycle.right.reverse, 25);
        assert_eq!(config.stepper.left, StepperPins::new(23, 24));
        assert_eq!(config.stepper.pulse_interval, Duration::from_millis(1));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = RobotConfig::from_json(
            r#"{ "backend": "stepper", "correction": { "left": 0.95, "right": 1.0 },
                 "stepper": { "pulse_interval": 500 } }"#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendKind::Stepper);
        assert_eq!(config.correction.left, 0.95);
        assert_eq!(config.stepper.pulse_interval, Duration::from_micros(500));
        assert_eq!(config.stepper.steps_per_command, STEPS_PER_COMMAND);
        assert_eq!(config.duty_cycle, DutyCyclePins::default());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "diffdrive-runtime",
            "drive",
            "--backend",
            "stepper",
            "--right-factor",
            "0.8",
            "--speed",
            "0.7",
        ]);
        let Some(Command::Drive(args)) = cli.command else {
            panic!("expected drive subcommand");
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.backend, BackendKind::Stepper);
        assert_eq!(config.correction.right, 0.8);
        assert_eq!(config.correction.left, LEFT_FACTOR);
        assert_eq!(config.initial_speed, 0.7);
    }

    #[test]
    fn test_plan_args_defaults() {
        let cli = Cli::parse_from(["diffdrive-runtime", "plan", "--direction", "backward"]);
        let Some(Command::Plan(args)) = cli.command else {
            panic!("expected plan subcommand");
        };
        assert_eq!(args.direction, Direction::Backward);
        assert_eq!(args.steps, PLAN_STEPS);
        assert_eq!(args.side, PlanSide::Both);
    }

    #[test]
    fn test_validate() {
        assert!(RobotConfig::default().validate().is_ok());

        let mut config = RobotConfig::default();
        config.correction.right = 1.2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCorrection { side: "right", .. })
        ));

        let mut config = RobotConfig::default();
        config.initial_speed = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSpeed(_))));

        let mut config = RobotConfig::default();
        config.stepper.pulse_interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroPulseInterval)));
    }

    #[test]
    fn test_missing_file_reported() {
        let err = RobotConfig::load(Path::new("/nonexistent/robot.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
