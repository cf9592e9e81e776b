// Stepper backend: signed power -> synchronized pulse trains
//
// Power sign picks the direction line, magnitude scales how many steps a
// single command advances. Both sides step off one shared cadence.

use tracing::{debug, info, warn};

use super::driver::{ActuatorDriver, DriveError, Result};
use super::gpio::Gpio;
use super::pulse::{PulseTrainGenerator, Sleeper, StepperMove, StepperPins};
use crate::config::StepperConfig;
use crate::messages::{Direction, PulsePlan, Side, SidePowers, clamp_power};

pub struct StepperBackend<G: Gpio, S: Sleeper> {
    gpio: G,
    generator: PulseTrainGenerator<S>,
    config: StepperConfig,
    released: bool,
}

impl<G: Gpio, S: Sleeper> StepperBackend<G, S> {
    /// Acquire the GPIO and park every line LOW
    pub fn new(mut gpio: G, sleeper: S, config: StepperConfig) -> Result<Self> {
        info!(
            "Initializing stepper outputs: left {:?}, right {:?}, {:?} half-period",
            config.left, config.right, config.pulse_interval
        );
        gpio.initialize()?;

        let mut backend = Self {
            gpio,
            generator: PulseTrainGenerator::new(sleeper),
            config,
            released: false,
        };
        backend.park(true)?;
        Ok(backend)
    }

    fn side_pins(&self, side: Side) -> StepperPins {
        match side {
            Side::Left => self.config.left,
            Side::Right => self.config.right,
        }
    }

    /// Steps a command of this power advances
    pub fn steps_for(&self, power: f32) -> u32 {
        (clamp_power(power).abs() * self.config.steps_per_command as f32).round() as u32
    }

    fn move_for(&self, side: Side, power: f32) -> StepperMove {
        StepperMove {
            pins: self.side_pins(side),
            direction: Direction::from_power(power),
            steps: self.steps_for(power),
        }
    }

    /// Run a fixed plan on one side, or on both sides together
    pub fn run_plan(&mut self, plan: &PulsePlan, sides: &[Side]) -> Result<()> {
        if self.released {
            return Err(DriveError::Released);
        }
        let actuators: Vec<StepperPins> = sides.iter().map(|&s| self.side_pins(s)).collect();
        info!(
            "Running plan: {} steps {:?} on {:?} (~{:?})",
            plan.step_count,
            plan.direction,
            sides,
            plan.duration()
        );
        self.generator.run_plan(&mut self.gpio, plan, &actuators)
    }

    /// Pulse lines LOW, and direction lines too when `directions` is set
    fn park(&mut self, directions: bool) -> Result<()> {
        for pins in [self.config.left, self.config.right] {
            self.gpio.set_output(pins.pulse, false)?;
            if directions {
                self.gpio.set_output(pins.direction, false)?;
            }
        }
        Ok(())
    }
}

impl<G: Gpio, S: Sleeper> ActuatorDriver for StepperBackend<G, S> {
    fn set_power(&mut self, side: Side, power: f32) -> Result<()> {
        if self.released {
            return Err(DriveError::Released);
        }
        let m = self.move_for(side, power);
        if m.steps == 0 {
            return Ok(());
        }
        debug!("{} side: power {:.2} -> {} steps {:?}", side, power, m.steps, m.direction);
        self.generator
            .run_synchronized(&mut self.gpio, &[m], self.config.pulse_interval)
    }

    fn drive(&mut self, powers: SidePowers) -> Result<()> {
        if self.released {
            return Err(DriveError::Released);
        }
        let moves: Vec<StepperMove> = Side::BOTH
            .iter()
            .map(|&side| self.move_for(side, powers.get(side)))
            .filter(|m| m.steps > 0)
            .collect();
        if moves.is_empty() {
            return self.stop_all();
        }
        debug!("Stepping {:?}", moves);
        self.generator
            .run_synchronized(&mut self.gpio, &moves, self.config.pulse_interval)
    }

    fn stop_all(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.park(false)
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        info!("Releasing stepper outputs");

        let parked = self.park(true);
        if let Err(e) = &parked {
            warn!("Failed to park stepper lines: {}", e);
        }
        // Teardown runs even if parking failed
        self.gpio.teardown()?;
        parked
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

impl<G: Gpio, S: Sleeper> Drop for StepperBackend<G, S> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Failed to release steppers on drop: {}", e);
        }
    }
}
