// Duty-cycle driving for dual-channel H-bridge drivers (BTS7960 style)
//
// Each side has a forward and a reverse PWM channel. At most one of them may
// be non-zero at any time or the bridge shorts its own supply.

use tracing::{debug, info, warn};

use super::driver::{ActuatorDriver, DriveError, Result};
use super::gpio::{Gpio, GpioError};
use crate::config::{DutyCyclePins, HBridgePins};
use crate::messages::{DutyCycleOutput, Side, clamp_power};

/// Maximum duty cycle in percent
pub const PWM_MAX: f32 = 100.0;

/// Channel percentages for a signed power level
pub fn duty_cycle_for(power: f32) -> DutyCycleOutput {
    let power = clamp_power(power);
    let percent = (power.abs() * PWM_MAX).min(PWM_MAX);
    if power > 0.0 {
        DutyCycleOutput {
            forward: percent,
            reverse: 0.0,
        }
    } else if power < 0.0 {
        DutyCycleOutput {
            forward: 0.0,
            reverse: percent,
        }
    } else {
        DutyCycleOutput::off()
    }
}

/// H-bridge backend for two DC motors
pub struct DutyCycleBackend<G: Gpio> {
    gpio: G,
    pins: DutyCyclePins,
    outputs: [DutyCycleOutput; 2],
    released: bool,
}

impl<G: Gpio> DutyCycleBackend<G> {
    /// Acquire the GPIO, raise the enable lines and start with both channels at 0%.
    ///
    /// Any failure here is fatal: nothing has been driven yet.
    pub fn new(mut gpio: G, pins: DutyCyclePins) -> Result<Self> {
        info!(
            "Initializing H-bridge outputs ({} Hz PWM): left {:?}, right {:?}",
            pins.pwm_frequency_hz, pins.left, pins.right
        );
        gpio.initialize()?;

        // From here on a failed write drops the backend, which tears down the GPIO
        let mut backend = Self {
            gpio,
            pins,
            outputs: [DutyCycleOutput::off(); 2],
            released: false,
        };
        backend.enable_bridges()?;
        Ok(backend)
    }

    fn enable_bridges(&mut self) -> Result<()> {
        for side in [self.pins.left, self.pins.right] {
            self.gpio.set_pwm_duty_cycle(side.forward, 0.0)?;
            self.gpio.set_pwm_duty_cycle(side.reverse, 0.0)?;
        }
        for side in [self.pins.left, self.pins.right] {
            for pin in side.enable {
                self.gpio.set_output(pin, true)?;
            }
        }
        Ok(())
    }

    fn side_pins(&self, side: Side) -> HBridgePins {
        match side {
            Side::Left => self.pins.left,
            Side::Right => self.pins.right,
        }
    }

    /// Last channel output applied to `side`
    pub fn output(&self, side: Side) -> DutyCycleOutput {
        self.outputs[side as usize]
    }

    /// Write one side's channels. The channel going to zero is written first.
    fn apply(&mut self, side: Side, target: DutyCycleOutput) -> Result<()> {
        let pins = self.side_pins(side);
        if target.forward > 0.0 {
            self.gpio.set_pwm_duty_cycle(pins.reverse, 0.0)?;
            self.gpio.set_pwm_duty_cycle(pins.forward, target.forward)?;
        } else {
            self.gpio.set_pwm_duty_cycle(pins.forward, 0.0)?;
            self.gpio.set_pwm_duty_cycle(pins.reverse, target.reverse)?;
        }
        self.outputs[side as usize] = target;
        Ok(())
    }
}

impl<G: Gpio> ActuatorDriver for DutyCycleBackend<G> {
    fn set_power(&mut self, side: Side, power: f32) -> Result<()> {
        if self.released {
            return Err(DriveError::Released);
        }
        let target = duty_cycle_for(power);
        debug!(
            "{} side: power {:.2} -> fwd {:.1}%, rev {:.1}%",
            side, power, target.forward, target.reverse
        );
        self.apply(side, target)
    }

    fn stop_all(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        for side in Side::BOTH {
            self.apply(side, DutyCycleOutput::off())?;
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        info!("Releasing H-bridge outputs");

        // Keep going on errors: every output gets its chance to de-energize
        let mut first_err: Option<DriveError> = None;
        let mut note = |r: std::result::Result<(), GpioError>| {
            if let Err(e) = r {
                warn!("Release step failed: {}", e);
                if first_err.is_none() {
                    first_err = Some(DriveError::Gpio(e));
                }
            }
        };
        for side in [self.pins.left, self.pins.right] {
            note(self.gpio.set_pwm_duty_cycle(side.forward, 0.0));
            note(self.gpio.set_pwm_duty_cycle(side.reverse, 0.0));
            for pin in side.enable {
                note(self.gpio.set_output(pin, false));
            }
        }
        note(self.gpio.teardown());
        self.outputs = [DutyCycleOutput::off(); 2];

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

impl<G: Gpio> Drop for DutyCycleBackend<G> {
    fn drop(&mut self) {
        // Outputs must never stay energized past the backend's lifetime
        if let Err(e) = self.shutdown() {
            warn!("Failed to release H-bridge on drop: {}", e);
        }
    }
}
