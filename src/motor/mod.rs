// Motor control module for a two-sided (differential) base
//
// Provides:
// - Motion translation (command + speed -> per-side power)
// - Per-side calibration correction
// - Actuator backends: H-bridge duty cycle and step/direction pulse trains
// - The GPIO contract those backends drive, plus a simulated board

pub mod calibration;
mod driver;
pub mod duty_cycle;
pub mod gpio;
pub mod pulse;
pub mod sim;
pub mod stepper;
pub mod translator;

pub use calibration::SideCorrection;
pub use driver::{ActuatorDriver, Backend, DriveError};
pub use duty_cycle::{DutyCycleBackend, duty_cycle_for};
pub use gpio::{Gpio, GpioError, Pin};
pub use pulse::{PulseTrainGenerator, Sleeper, StepperPins, ThreadSleeper};
pub use sim::{SimHandle, SimulatedClock, SimulatedGpio};
pub use stepper::StepperBackend;
pub use translator::{MotionController, Outcome, SpeedLevel};
