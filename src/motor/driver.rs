// Actuator driver abstraction
//
// Every motor-output backend exposes the same three operations: set a side's
// signed power, stop both sides, and release the hardware. The control loop
// only ever talks to this trait.

use super::duty_cycle::DutyCycleBackend;
use super::gpio::{Gpio, GpioError};
use super::pulse::Sleeper;
use super::stepper::StepperBackend;
use crate::messages::{Side, SidePowers};

/// Error types for actuation
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("GPIO error: {0}")]
    Gpio(#[from] GpioError),

    #[error("Actuators already released")]
    Released,

    #[error("Pulse trains drive one or two actuators, got {0}")]
    InvalidActuatorCount(usize),
}

pub type Result<T> = std::result::Result<T, DriveError>;

/// Capability every two-sided motor backend must expose
pub trait ActuatorDriver {
    /// Apply a signed power to one side. Values outside [-1.0, 1.0] are clamped.
    fn set_power(&mut self, side: Side, power: f32) -> Result<()>;

    /// Apply one control cycle's worth of power to both sides
    fn drive(&mut self, powers: SidePowers) -> Result<()> {
        self.set_power(Side::Left, powers.left)?;
        self.set_power(Side::Right, powers.right)
    }

    /// Bring both sides to zero power. Idempotent.
    fn stop_all(&mut self) -> Result<()>;

    /// De-energize every managed output and hand the pins back.
    /// Calling it again has no further effect.
    fn release(&mut self) -> Result<()>;

    fn is_released(&self) -> bool;

    /// Stop then release, the sequence every exit path runs
    fn shutdown(&mut self) -> Result<()> {
        if self.is_released() {
            return Ok(());
        }
        let stopped = self.stop_all();
        // Release even when the stop failed
        self.release()?;
        stopped
    }
}

/// The backend active for the robot's actuator type
pub enum Backend<G: Gpio, S: Sleeper> {
    DutyCycle(DutyCycleBackend<G>),
    Stepper(StepperBackend<G, S>),
}

impl<G: Gpio, S: Sleeper> Backend<G, S> {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::DutyCycle(_) => "duty-cycle",
            Backend::Stepper(_) => "stepper",
        }
    }
}

impl<G: Gpio, S: Sleeper> ActuatorDriver for Backend<G, S> {
    fn set_power(&mut self, side: Side, power: f32) -> Result<()> {
        match self {
            Backend::DutyCycle(b) => b.set_power(side, power),
            Backend::Stepper(b) => b.set_power(side, power),
        }
    }

    fn drive(&mut self, powers: SidePowers) -> Result<()> {
        match self {
            Backend::DutyCycle(b) => b.drive(powers),
            Backend::Stepper(b) => b.drive(powers),
        }
    }

    fn stop_all(&mut self) -> Result<()> {
        match self {
            Backend::DutyCycle(b) => b.stop_all(),
            Backend::Stepper(b) => b.stop_all(),
        }
    }

    fn release(&mut self) -> Result<()> {
        match self {
            Backend::DutyCycle(b) => b.release(),
            Backend::Stepper(b) => b.release(),
        }
    }

    fn is_released(&self) -> bool {
        match self {
            Backend::DutyCycle(b) => b.is_released(),
            Backend::Stepper(b) => b.is_released(),
        }
    }
}
