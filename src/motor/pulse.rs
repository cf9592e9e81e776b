// Pulse-train generation for step/direction stepper drivers
//
// A plan sets every direction line first, then issues `step_count` pulses.
// When two actuators move together their edges are written back to back
// inside the same iteration, before the timed wait, so both see the same tick.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::driver::{DriveError, Result};
use super::gpio::{Gpio, Pin};
use crate::messages::{Direction, PulsePlan};

/// Source of the timed waits between pulse edges
pub trait Sleeper {
    /// Called once per plan, after the direction lines and before the first edge
    fn begin(&mut self) {}

    fn sleep(&mut self, duration: Duration);
}

/// Sleeps on the monotonic clock.
///
/// Consecutive waits are chained off the previous deadline, so pin write
/// latency inside a plan does not stretch the cadence. The chain restarts at
/// `begin`, so a plan's first HIGH is always held for the full interval.
#[derive(Debug, Default)]
pub struct ThreadSleeper {
    deadline: Option<Instant>,
}

impl ThreadSleeper {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Sleeper for ThreadSleeper {
    fn begin(&mut self) {
        self.deadline = None;
    }

    fn sleep(&mut self, duration: Duration) {
        let now = Instant::now();
        // Fall back to "now" when the previous deadline is stale
        let base = match self.deadline {
            Some(prev) if now.saturating_duration_since(prev) < duration => prev,
            _ => now,
        };
        let deadline = base + duration;
        if let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            std::thread::sleep(remaining);
        }
        self.deadline = Some(deadline);
    }
}

/// Step and direction lines of one stepper driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepperPins {
    pub pulse: Pin,
    pub direction: Pin,
}

impl StepperPins {
    pub fn new(pulse: Pin, direction: Pin) -> Self {
        Self { pulse, direction }
    }
}

/// Per-actuator part of a synchronized move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepperMove {
    pub pins: StepperPins,
    pub direction: Direction,
    pub steps: u32,
}

/// Drives one or two steppers through timed pulse trains
#[derive(Debug)]
pub struct PulseTrainGenerator<S> {
    sleeper: S,
}

impl<S: Sleeper> PulseTrainGenerator<S> {
    pub fn new(sleeper: S) -> Self {
        Self { sleeper }
    }

    /// Run `plan` on one actuator, or on two moving together
    pub fn run_plan<G: Gpio>(
        &mut self,
        gpio: &mut G,
        plan: &PulsePlan,
        actuators: &[StepperPins],
    ) -> Result<()> {
        let moves: Vec<StepperMove> = actuators
            .iter()
            .map(|&pins| StepperMove {
                pins,
                direction: plan.direction,
                steps: plan.step_count,
            })
            .collect();
        self.run_synchronized(gpio, &moves, plan.pulse_interval)
    }

    /// Run moves that share one cadence but may differ in direction and length.
    ///
    /// Iteration `i` pulses every actuator with more than `i` steps; an
    /// actuator that has finished stays LOW while the other keeps stepping.
    pub fn run_synchronized<G: Gpio>(
        &mut self,
        gpio: &mut G,
        moves: &[StepperMove],
        interval: Duration,
    ) -> Result<()> {
        if moves.is_empty() || moves.len() > 2 {
            return Err(DriveError::InvalidActuatorCount(moves.len()));
        }

        for m in moves {
            gpio.set_output(m.pins.direction, m.direction.level())?;
        }

        let total = moves.iter().map(|m| m.steps).max().unwrap_or(0);
        debug!(
            "Pulse train: {} actuator(s), {} iterations, {:?} half-period",
            moves.len(),
            total,
            interval
        );

        self.sleeper.begin();
        for i in 0..total {
            for m in moves.iter().filter(|m| m.steps > i) {
                gpio.set_output(m.pins.pulse, true)?;
            }
            self.sleeper.sleep(interval);
            for m in moves.iter().filter(|m| m.steps > i) {
                gpio.set_output(m.pins.pulse, false)?;
            }
            self.sleeper.sleep(interval);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::sim::{GpioEvent, SimHandle, SimulatedClock, SimulatedGpio};

    const LEFT: StepperPins = StepperPins {
        pulse: 23,
        direction: 24,
    };
    const RIGHT: StepperPins = StepperPins {
        pulse: 3,
        direction: 2,
    };
    const TICK: Duration = Duration::from_micros(500);

    fn rig() -> (SimulatedGpio, PulseTrainGenerator<SimulatedClock>, SimHandle) {
        let handle = SimHandle::new();
        let mut gpio = SimulatedGpio::with_handle(handle.clone());
        gpio.initialize().unwrap();
        handle.clear_events();
        let generator = PulseTrainGenerator::new(SimulatedClock::new(handle.clone()));
        (gpio, generator, handle)
    }

    fn out(pin: Pin, level: bool) -> GpioEvent {
        GpioEvent::Output { pin, level }
    }

    #[test]
    fn test_single_actuator_pulse_count() {
        let (mut gpio, mut generator, handle) = rig();
        let plan = PulsePlan::new(5, Direction::Forward, TICK);
        generator.run_plan(&mut gpio, &plan, &[LEFT]).unwrap();

        assert_eq!(handle.writes_to(LEFT.direction), vec![true]);
        let pulses = handle.writes_to(LEFT.pulse);
        assert_eq!(pulses.len(), 10);
        assert!(pulses.chunks(2).all(|pair| pair == [true, false]));
        assert_eq!(handle.elapsed(), plan.duration());
    }

    #[test]
    fn test_direction_set_before_first_edge() {
        let (mut gpio, mut generator, handle) = rig();
        let plan = PulsePlan::new(3, Direction::Backward, TICK);
        generator.run_plan(&mut gpio, &plan, &[LEFT, RIGHT]).unwrap();

        let events = handle.events();
        assert_eq!(events[0], out(LEFT.direction, false));
        assert_eq!(events[1], out(RIGHT.direction, false));
        // Direction lines are never touched again during the plan
        assert_eq!(handle.writes_to(LEFT.direction).len(), 1);
        assert_eq!(handle.writes_to(RIGHT.direction).len(), 1);
    }

    #[test]
    fn test_two_actuators_share_each_tick() {
        let (mut gpio, mut generator, handle) = rig();
        let plan = PulsePlan::new(4, Direction::Forward, TICK);
        generator.run_plan(&mut gpio, &plan, &[LEFT, RIGHT]).unwrap();

        let events = handle.events();
        let iteration = [
            out(LEFT.pulse, true),
            out(RIGHT.pulse, true),
            GpioEvent::Wait(TICK),
            out(LEFT.pulse, false),
            out(RIGHT.pulse, false),
            GpioEvent::Wait(TICK),
        ];
        let body = &events[2..];
        assert_eq!(body.len(), iteration.len() * 4);
        for chunk in body.chunks(iteration.len()) {
            assert_eq!(chunk, iteration);
        }
    }

    #[test]
    fn test_uneven_moves_keep_cadence() {
        let (mut gpio, mut generator, handle) = rig();
        let moves = [
            StepperMove {
                pins: LEFT,
                direction: Direction::Backward,
                steps: 2,
            },
            StepperMove {
                pins: RIGHT,
                direction: Direction::Forward,
                steps: 4,
            },
        ];
        generator
            .run_synchronized(&mut gpio, &moves, TICK)
            .unwrap();

        assert_eq!(handle.writes_to(LEFT.pulse).len(), 4);
        assert_eq!(handle.writes_to(RIGHT.pulse).len(), 8);
        assert_eq!(handle.writes_to(LEFT.direction), vec![false]);
        assert_eq!(handle.writes_to(RIGHT.direction), vec![true]);
        // Cadence is set by the longer move
        assert_eq!(handle.elapsed(), TICK * 8);
    }

    #[test]
    fn test_zero_steps_only_sets_direction() {
        let (mut gpio, mut generator, handle) = rig();
        let plan = PulsePlan::new(0, Direction::Forward, TICK);
        generator.run_plan(&mut gpio, &plan, &[RIGHT]).unwrap();
        assert_eq!(handle.events(), vec![out(RIGHT.direction, true)]);
    }

    #[test]
    fn test_actuator_count_checked() {
        let (mut gpio, mut generator, handle) = rig();
        let plan = PulsePlan::new(1, Direction::Forward, TICK);
        assert!(matches!(
            generator.run_plan(&mut gpio, &plan, &[]),
            Err(DriveError::InvalidActuatorCount(0))
        ));
        assert!(matches!(
            generator.run_plan(&mut gpio, &plan, &[LEFT, RIGHT, LEFT]),
            Err(DriveError::InvalidActuatorCount(3))
        ));
        assert!(handle.events().is_empty());
    }

    #[test]
    fn test_thread_sleeper_waits_at_least_duration() {
        let mut sleeper = ThreadSleeper::new();
        let start = Instant::now();
        sleeper.sleep(Duration::from_millis(2));
        sleeper.sleep(Duration::from_millis(2));
        assert!(start.elapsed() >= Duration::from_millis(4));
    }

    #[test]
    fn test_thread_sleeper_restarts_chain_per_plan() {
        let interval = Duration::from_millis(40);
        let mut sleeper = ThreadSleeper::new();
        sleeper.sleep(interval);
        // Next plan starts before the previous deadline has gone stale
        std::thread::sleep(Duration::from_millis(25));

        sleeper.begin();
        let start = Instant::now();
        sleeper.sleep(interval);
        assert!(start.elapsed() >= interval, "first wait {:?}", start.elapsed());
    }

    /// Records when each plan begins relative to its waits
    #[derive(Default)]
    struct RecordingSleeper {
        log: Vec<Option<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn begin(&mut self) {
            self.log.push(None);
        }

        fn sleep(&mut self, duration: Duration) {
            self.log.push(Some(duration));
        }
    }

    #[test]
    fn test_each_plan_begins_before_first_wait() {
        let handle = SimHandle::new();
        let mut gpio = SimulatedGpio::with_handle(handle.clone());
        gpio.initialize().unwrap();
        let mut generator = PulseTrainGenerator::new(RecordingSleeper::default());
        let plan = PulsePlan::new(2, Direction::Forward, TICK);

        generator.run_plan(&mut gpio, &plan, &[LEFT]).unwrap();
        generator.run_plan(&mut gpio, &plan, &[LEFT, RIGHT]).unwrap();

        let one_plan = [None, Some(TICK), Some(TICK), Some(TICK), Some(TICK)];
        let expected: Vec<_> = one_plan.iter().chain(one_plan.iter()).copied().collect();
        assert_eq!(generator.sleeper.log, expected);
    }
}
