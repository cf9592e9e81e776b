// In-memory GPIO backend
//
// Records every pin write (and every simulated wait) into one shared log so
// tests can check ordering between signal edges and timed waits. Also used by
// the binary when no board driver is plugged in.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, trace};

use super::gpio::{Gpio, GpioError, Pin, Result};
use super::pulse::Sleeper;

/// One recorded interaction with the simulated board
#[derive(Debug, Clone, PartialEq)]
pub enum GpioEvent {
    Initialize,
    Output { pin: Pin, level: bool },
    Duty { channel: Pin, percent: f32 },
    Wait(Duration),
    Teardown,
}

/// Current state of the simulated board
#[derive(Debug, Default)]
pub struct SimState {
    pub events: Vec<GpioEvent>,
    pub outputs: BTreeMap<Pin, bool>,
    pub duty: BTreeMap<Pin, f32>,
    pub initialized: bool,
    pub initialize_count: u32,
    pub teardown_count: u32,
    pub elapsed: Duration,
}

/// Shared, cloneable view of a [`SimState`]
#[derive(Debug, Clone, Default)]
pub struct SimHandle(Arc<Mutex<SimState>>);

impl SimHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // Single control thread; a poisoned lock still holds a usable log
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn events(&self) -> Vec<GpioEvent> {
        self.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    pub fn output(&self, pin: Pin) -> Option<bool> {
        self.lock().outputs.get(&pin).copied()
    }

    pub fn duty(&self, channel: Pin) -> Option<f32> {
        self.lock().duty.get(&channel).copied()
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    pub fn initialize_count(&self) -> u32 {
        self.lock().initialize_count
    }

    pub fn teardown_count(&self) -> u32 {
        self.lock().teardown_count
    }

    /// Total simulated wait time
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    /// True if any output is HIGH or any PWM channel has a non-zero duty cycle
    pub fn is_energized(&self) -> bool {
        let state = self.lock();
        state.outputs.values().any(|&level| level) || state.duty.values().any(|&d| d > 0.0)
    }

    /// Output writes recorded for one pin, in order
    pub fn writes_to(&self, pin: Pin) -> Vec<bool> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                GpioEvent::Output { pin: p, level } if *p == pin => Some(*level),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: GpioEvent) {
        let mut state = self.lock();
        match &event {
            GpioEvent::Initialize => {
                state.initialized = true;
                state.initialize_count += 1;
            }
            GpioEvent::Output { pin, level } => {
                state.outputs.insert(*pin, *level);
            }
            GpioEvent::Duty { channel, percent } => {
                state.duty.insert(*channel, *percent);
            }
            GpioEvent::Wait(d) => {
                state.elapsed += *d;
            }
            GpioEvent::Teardown => {
                state.initialized = false;
                state.teardown_count += 1;
            }
        }
        state.events.push(event);
    }
}

/// GPIO driver that only records what it is told to do
#[derive(Debug, Default)]
pub struct SimulatedGpio {
    state: SimHandle,
    fail_initialize: bool,
}

impl SimulatedGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an existing log (e.g. with a [`SimulatedClock`])
    pub fn with_handle(state: SimHandle) -> Self {
        Self {
            state,
            fail_initialize: false,
        }
    }

    /// A board whose initialization always fails
    pub fn unavailable() -> Self {
        Self {
            state: SimHandle::new(),
            fail_initialize: true,
        }
    }

    pub fn handle(&self) -> SimHandle {
        self.state.clone()
    }

    fn ensure_initialized(&self, pin: Pin) -> Result<()> {
        if self.state.is_initialized() {
            Ok(())
        } else {
            Err(GpioError::InvalidPin {
                pin,
                reason: "GPIO not initialized".to_string(),
            })
        }
    }
}

impl Gpio for SimulatedGpio {
    fn initialize(&mut self) -> Result<()> {
        if self.fail_initialize {
            return Err(GpioError::Unavailable(
                "simulated board refused to initialize".to_string(),
            ));
        }
        debug!("Simulated GPIO initialized");
        self.state.record(GpioEvent::Initialize);
        Ok(())
    }

    fn set_output(&mut self, pin: Pin, level: bool) -> Result<()> {
        self.ensure_initialized(pin)?;
        trace!("pin {} -> {}", pin, if level { "HIGH" } else { "LOW" });
        self.state.record(GpioEvent::Output { pin, level });
        Ok(())
    }

    fn set_pwm_duty_cycle(&mut self, channel: Pin, percent: f32) -> Result<()> {
        self.ensure_initialized(channel)?;
        if !(0.0..=100.0).contains(&percent) {
            return Err(GpioError::InvalidDutyCycle { channel, percent });
        }
        trace!("pwm {} -> {:.1}%", channel, percent);
        self.state.record(GpioEvent::Duty { channel, percent });
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        debug!("Simulated GPIO torn down");
        self.state.record(GpioEvent::Teardown);
        Ok(())
    }
}

/// Sleeper that advances a simulated clock instead of blocking
#[derive(Debug, Clone, Default)]
pub struct SimulatedClock {
    state: SimHandle,
}

impl SimulatedClock {
    pub fn new(state: SimHandle) -> Self {
        Self { state }
    }
}

impl Sleeper for SimulatedClock {
    fn sleep(&mut self, duration: Duration) {
        self.state.record(GpioEvent::Wait(duration));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_require_initialize() {
        let mut gpio = SimulatedGpio::new();
        assert!(gpio.set_output(4, true).is_err());
        gpio.initialize().unwrap();
        gpio.set_output(4, true).unwrap();
        assert_eq!(gpio.handle().output(4), Some(true));
    }

    #[test]
    fn test_duty_cycle_range_checked() {
        let mut gpio = SimulatedGpio::new();
        gpio.initialize().unwrap();
        assert!(matches!(
            gpio.set_pwm_duty_cycle(20, 100.5),
            Err(GpioError::InvalidDutyCycle { channel: 20, .. })
        ));
        gpio.set_pwm_duty_cycle(20, 100.0).unwrap();
        assert!(gpio.handle().is_energized());
    }

    #[test]
    fn test_clock_shares_log() {
        let handle = SimHandle::new();
        let mut gpio = SimulatedGpio::with_handle(handle.clone());
        let mut clock = SimulatedClock::new(handle.clone());
        gpio.initialize().unwrap();
        gpio.set_output(3, true).unwrap();
        clock.sleep(Duration::from_millis(2));
        assert_eq!(
            handle.events(),
            vec![
                GpioEvent::Initialize,
                GpioEvent::Output { pin: 3, level: true },
                GpioEvent::Wait(Duration::from_millis(2)),
            ]
        );
        assert_eq!(handle.elapsed(), Duration::from_millis(2));
    }

    #[test]
    fn test_unavailable_board() {
        let mut gpio = SimulatedGpio::unavailable();
        assert!(matches!(gpio.initialize(), Err(GpioError::Unavailable(_))));
        assert_eq!(gpio.handle().initialize_count(), 0);
    }
}
