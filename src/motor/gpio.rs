// GPIO collaborator contract
//
// The board-specific driver lives outside this crate. Everything that touches
// pins goes through this trait so the motor backends stay hardware-agnostic.

/// Pin number in the board's numbering scheme (BCM on a Raspberry Pi)
pub type Pin = u8;

/// Error types for the GPIO driver
#[derive(Debug, thiserror::Error)]
pub enum GpioError {
    #[error("GPIO driver unavailable: {0}")]
    Unavailable(String),

    #[error("Pin {pin} is not usable: {reason}")]
    InvalidPin { pin: Pin, reason: String },

    #[error("Duty cycle {percent} out of range for channel {channel}")]
    InvalidDutyCycle { channel: Pin, percent: f32 },
}

pub type Result<T> = std::result::Result<T, GpioError>;

/// Digital output and PWM primitives a motor backend needs
pub trait Gpio {
    /// Acquire the pins. Called once before any actuation.
    fn initialize(&mut self) -> Result<()>;

    /// Drive a digital output HIGH (`true`) or LOW (`false`)
    fn set_output(&mut self, pin: Pin, level: bool) -> Result<()>;

    /// Set a PWM channel's duty cycle in percent (0-100)
    fn set_pwm_duty_cycle(&mut self, channel: Pin, percent: f32) -> Result<()>;

    /// Give the pins back. Called exactly once at shutdown.
    fn teardown(&mut self) -> Result<()>;
}
