// Control loop with guaranteed shutdown
//
// One command is read, translated, corrected and dispatched before the next
// is read. Every way out of the loop (quit, interruption, closed source,
// error) goes through stop-then-release; the backends' Drop impls cover the
// paths that unwind past us.

use std::io::{self, Write};

use tracing::{debug, error, info, warn};

use crate::config::{BackendKind, Cli, Command, DriveArgs, PlanArgs, PlanSide, RobotConfig};
use crate::input::{CommandSource, InputError, Interrupt, KeyboardSource, SourceEvent};
use crate::messages::{MotionCommand, PulsePlan, Side, StatusLine};
use crate::motor::{
    ActuatorDriver, Backend, DriveError, DutyCycleBackend, Gpio, MotionController, Outcome,
    SideCorrection, SimulatedGpio, Sleeper, StepperBackend, ThreadSleeper,
};

/// Error types for the runtime
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Actuator error: {0}")]
    Drive(#[from] DriveError),

    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Control task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Why the control loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Quit,
    Interrupted,
    SourceClosed,
}

pub struct Runtime<D: ActuatorDriver, W: Write> {
    controller: MotionController,
    correction: SideCorrection,
    driver: D,
    console: W,
}

impl<D: ActuatorDriver, W: Write> Runtime<D, W> {
    pub fn new(
        driver: D,
        controller: MotionController,
        correction: SideCorrection,
        console: W,
    ) -> Self {
        Self {
            controller,
            correction,
            driver,
            console,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn controller(&self) -> &MotionController {
        &self.controller
    }

    /// Print one status line. Console trouble never affects control.
    fn status(&mut self, line: StatusLine) {
        // Raw-mode terminals need the explicit carriage return
        let result = write!(self.console, "{}\r\n", line).and_then(|_| self.console.flush());
        if let Err(e) = result {
            warn!("Failed to write status line: {}", e);
        }
    }

    fn banner(&mut self) -> io::Result<()> {
        let rule = "=".repeat(50);
        let lines = [
            rule.as_str(),
            "Robot Car Keyboard Control",
            rule.as_str(),
            "Controls:",
            "  W or Up Arrow      = Forward",
            "  S or Down Arrow    = Backward",
            "  A or Left Arrow    = Turn left",
            "  D or Right Arrow   = Turn right",
            "  Spacebar           = Stop",
            "  + or =             = Increase speed",
            "  - or _             = Decrease speed",
            "  Q or ESC           = Exit",
            rule.as_str(),
        ];
        for line in lines {
            write!(self.console, "{}\r\n", line)?;
        }
        write!(
            self.console,
            "Current speed: {}\r\nReady for input...\r\n",
            self.controller.speed()
        )?;
        self.console.flush()
    }

    /// Process one command. Returns `false` when the loop should end.
    pub fn on_command(&mut self, command: MotionCommand) -> bool {
        debug!("Received command: {:?}", command);
        match self.controller.handle(command) {
            Outcome::Drive { command, powers } => {
                let corrected = self.correction.apply_pair(powers).clamped();
                // No retries: a dropped cycle is replaced by the next command
                if let Err(e) = self.driver.drive(corrected) {
                    warn!("Dropping {:?} cycle: {}", command, e);
                }
                let line = if command == MotionCommand::Stop {
                    StatusLine::Stopped
                } else {
                    StatusLine::Moving {
                        command,
                        percent: self.controller.speed().percent(),
                    }
                };
                self.status(line);
                true
            }
            Outcome::SpeedChanged {
                command,
                speed,
                changed,
            } => {
                let percent = speed.percent();
                let line = match (command, changed) {
                    (MotionCommand::IncreaseSpeed, true) => StatusLine::SpeedIncreased(percent),
                    (MotionCommand::IncreaseSpeed, false) => StatusLine::SpeedAtMaximum(percent),
                    (_, true) => StatusLine::SpeedDecreased(percent),
                    (_, false) => StatusLine::SpeedAtMinimum(percent),
                };
                self.status(line);
                true
            }
            Outcome::Quit => {
                self.status(StatusLine::Exiting);
                false
            }
        }
    }

    /// Read and process commands until quit, interruption or end of input,
    /// then shut the actuators down.
    pub fn run_session<C: CommandSource>(
        &mut self,
        source: &mut C,
    ) -> Result<ExitReason, RuntimeError> {
        let outcome = self.command_loop(source);
        if matches!(outcome, Ok(ExitReason::Interrupted)) {
            self.status(StatusLine::Interrupted);
        }
        self.shutdown();
        outcome
    }

    fn command_loop<C: CommandSource>(
        &mut self,
        source: &mut C,
    ) -> Result<ExitReason, RuntimeError> {
        loop {
            match source.next_event()? {
                SourceEvent::Command(command) => {
                    if !self.on_command(command) {
                        return Ok(ExitReason::Quit);
                    }
                }
                SourceEvent::Ignored(token) => debug!("Ignoring input {:?}", token),
                SourceEvent::Interrupted => {
                    info!("Interrupted, shutting down");
                    return Ok(ExitReason::Interrupted);
                }
                SourceEvent::Closed => {
                    info!("Command source closed, shutting down");
                    return Ok(ExitReason::SourceClosed);
                }
            }
        }
    }

    /// Stop then release. Safe to call any number of times.
    pub fn shutdown(&mut self) {
        if self.driver.is_released() {
            return;
        }
        match self.driver.shutdown() {
            Ok(()) => self.status(StatusLine::CleanedUp),
            Err(e) => error!("Shutdown incomplete: {}", e),
        }
    }
}

/// Initialize the configured backend. Fails before any actuation if the GPIO can't be acquired.
pub fn build_backend<G: Gpio, S: Sleeper>(
    config: &RobotConfig,
    gpio: G,
    sleeper: S,
) -> Result<Backend<G, S>, DriveError> {
    let backend = match config.backend {
        BackendKind::DutyCycle => {
            Backend::DutyCycle(DutyCycleBackend::new(gpio, config.duty_cycle)?)
        }
        BackendKind::Stepper => {
            Backend::Stepper(StepperBackend::new(gpio, sleeper, config.stepper)?)
        }
    };
    info!("Using {} backend", backend.name());
    Ok(backend)
}

/// Interactive session: validate config, acquire hardware, run the loop
pub fn drive<G, S, C, W>(
    config: &RobotConfig,
    gpio: G,
    sleeper: S,
    source: &mut C,
    console: W,
) -> Result<ExitReason, RuntimeError>
where
    G: Gpio,
    S: Sleeper,
    C: CommandSource,
    W: Write,
{
    config.validate()?;
    let correction = config.correction()?;
    let controller = MotionController::new(config.speed()?);

    let backend = build_backend(config, gpio, sleeper)?;
    let mut runtime = Runtime::new(backend, controller, correction, console);
    if let Err(e) = runtime.banner() {
        warn!("Failed to print banner: {}", e);
    }
    info!(
        "Runtime started: speed {}, correction left={} right={}",
        runtime.controller().speed(),
        correction.factor(Side::Left),
        correction.factor(Side::Right)
    );
    runtime.run_session(source)
}

/// One-shot stepper move, then release
pub fn run_plan<G: Gpio, S: Sleeper>(
    config: &RobotConfig,
    args: &PlanArgs,
    gpio: G,
    sleeper: S,
    interrupt: &Interrupt,
) -> Result<ExitReason, RuntimeError> {
    config.validate()?;
    let interval = args
        .interval_us
        .map(std::time::Duration::from_micros)
        .unwrap_or(config.stepper.pulse_interval);
    if interval.is_zero() {
        return Err(crate::config::ConfigError::ZeroPulseInterval.into());
    }
    let plan = PulsePlan::new(args.steps, args.direction, interval);
    let sides: &[Side] = match args.side {
        PlanSide::Left => &[Side::Left],
        PlanSide::Right => &[Side::Right],
        PlanSide::Both => &Side::BOTH,
    };

    let mut backend = StepperBackend::new(gpio, sleeper, config.stepper)?;
    // Plans are atomic; interruption is only honored before one starts
    let reason = if interrupt.is_triggered() {
        ExitReason::Interrupted
    } else {
        backend.run_plan(&plan, sides)?;
        ExitReason::Quit
    };
    backend.shutdown()?;
    Ok(reason)
}

/// Resolve the CLI, install signal handlers and run the blocking control loop
pub async fn run(cli: Cli) -> Result<ExitReason, RuntimeError> {
    let interrupt = Interrupt::new();
    spawn_signal_listener(interrupt.clone());

    let command = cli
        .command
        .unwrap_or_else(|| Command::Drive(DriveArgs::default()));

    // No board driver is linked into this binary; pins go to the simulated board
    warn!("Running against the simulated GPIO board");

    let task = match command {
        Command::Drive(args) => {
            let config = args.resolve()?;
            tokio::task::spawn_blocking(move || -> Result<ExitReason, RuntimeError> {
                let mut source = KeyboardSource::new(interrupt)?;
                drive(
                    &config,
                    SimulatedGpio::new(),
                    ThreadSleeper::new(),
                    &mut source,
                    io::stdout(),
                )
            })
        }
        Command::Plan(args) => {
            let config = RobotConfig::load_or_default(args.config.as_deref())?;
            tokio::task::spawn_blocking(move || {
                run_plan(
                    &config,
                    &args,
                    SimulatedGpio::new(),
                    ThreadSleeper::new(),
                    &interrupt,
                )
            })
        }
    };

    let reason = task.await??;
    info!("Runtime finished: {:?}", reason);
    Ok(reason)
}

fn spawn_signal_listener(interrupt: Interrupt) {
    tokio::spawn(async move {
        wait_for_termination().await;
        info!("Termination signal received");
        interrupt.trigger();
    });
}

async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        if let Err(e) = res {
                            warn!("Ctrl+C handler unavailable: {}", e);
                            std::future::pending::<()>().await;
                        }
                    }
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                wait_for_ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Ctrl+C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DutyCyclePins;
    use crate::input::ChannelSource;
    use crate::motor::{SimHandle, SimulatedClock, SpeedLevel};

    fn duty_runtime() -> (
        Runtime<Backend<SimulatedGpio, SimulatedClock>, Vec<u8>>,
        SimHandle,
    ) {
        let gpio = SimulatedGpio::new();
        let handle = gpio.handle();
        let backend = Backend::DutyCycle(
            DutyCycleBackend::new(gpio, DutyCyclePins::default()).unwrap(),
        );
        let runtime = Runtime::new(
            backend,
            MotionController::default(),
            SideCorrection::new(1.0, 0.9).unwrap(),
            Vec::new(),
        );
        (runtime, handle)
    }

    fn console(runtime: &Runtime<Backend<SimulatedGpio, SimulatedClock>, Vec<u8>>) -> Vec<String> {
        String::from_utf8_lossy(&runtime.console)
            .split("\r\n")
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_forward_applies_correction() {
        let (mut runtime, handle) = duty_runtime();
        let pins = DutyCyclePins::default();
        assert!(runtime.on_command(MotionCommand::Forward));
        assert_eq!(handle.duty(pins.left.forward), Some(50.0));
        let right = handle.duty(pins.right.forward).unwrap();
        assert!((right - 45.0).abs() < 1e-3, "right duty {}", right);
        assert_eq!(console(&runtime), vec!["Forward - Speed: 50%"]);
    }

    #[test]
    fn test_later_command_supersedes() {
        let (mut runtime, handle) = duty_runtime();
        let pins = DutyCyclePins::default();
        runtime.on_command(MotionCommand::Forward);
        runtime.on_command(MotionCommand::TurnLeft);
        // Left reverses at half speed, right stays forward
        assert_eq!(handle.duty(pins.left.forward), Some(0.0));
        assert_eq!(handle.duty(pins.left.reverse), Some(25.0));
        runtime.on_command(MotionCommand::Stop);
        assert!(handle.duty(pins.left.reverse) == Some(0.0));
        assert!(handle.duty(pins.right.forward) == Some(0.0));
    }

    #[test]
    fn test_speed_commands_only_print() {
        let (mut runtime, handle) = duty_runtime();
        handle.clear_events();
        runtime.on_command(MotionCommand::IncreaseSpeed);
        runtime.on_command(MotionCommand::DecreaseSpeed);
        assert!(handle.events().is_empty());
        assert_eq!(
            console(&runtime),
            vec!["Speed increased: 60%", "Speed decreased: 50%"]
        );
    }

    #[test]
    fn test_quit_shuts_down() {
        let (mut runtime, handle) = duty_runtime();
        let mut source = ChannelSource::scripted(["w", "q", "w"]);
        let reason = runtime.run_session(&mut source).unwrap();
        assert_eq!(reason, ExitReason::Quit);
        assert!(runtime.driver().is_released());
        assert!(!handle.is_energized());
        assert_eq!(handle.teardown_count(), 1);
        let lines = console(&runtime);
        assert_eq!(lines.last().map(String::as_str), Some("GPIO cleaned up. Program terminated."));
        assert!(lines.contains(&"Exiting program...".to_string()));
    }

    #[test]
    fn test_interrupt_mid_motion_deenergizes() {
        let (mut runtime, handle) = duty_runtime();
        let interrupt = Interrupt::new();
        let (tx, mut source) = ChannelSource::channel(interrupt.clone());
        runtime.on_command(MotionCommand::Backward);
        assert!(handle.is_energized());

        tx.send("d".to_string()).unwrap();
        interrupt.trigger();
        let reason = runtime.run_session(&mut source).unwrap();
        assert_eq!(reason, ExitReason::Interrupted);
        assert!(!handle.is_energized());
        assert!(console(&runtime).contains(&"Program interrupted by user...".to_string()));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (mut runtime, handle) = duty_runtime();
        runtime.on_command(MotionCommand::Forward);
        runtime.shutdown();
        runtime.shutdown();
        assert_eq!(handle.teardown_count(), 1);
    }

    #[test]
    fn test_drive_rejects_bad_config_before_touching_pins() {
        let mut config = RobotConfig::default();
        config.correction.left = 0.0;
        let gpio = SimulatedGpio::new();
        let handle = gpio.handle();
        let mut source = ChannelSource::scripted(["w"]);
        let result = drive(
            &config,
            gpio,
            SimulatedClock::default(),
            &mut source,
            Vec::new(),
        );
        assert!(matches!(result, Err(RuntimeError::Config(_))));
        assert_eq!(handle.initialize_count(), 0);
        assert!(handle.events().is_empty());
    }

    #[test]
    fn test_drive_fails_when_board_unavailable() {
        let mut source = ChannelSource::scripted(["w", "q"]);
        let result = drive(
            &RobotConfig::default(),
            SimulatedGpio::unavailable(),
            SimulatedClock::default(),
            &mut source,
            Vec::new(),
        );
        assert!(matches!(result, Err(RuntimeError::Drive(DriveError::Gpio(_)))));
    }

    #[test]
    fn test_initial_speed_from_config() {
        let mut config = RobotConfig::default();
        config.initial_speed = 0.8;
        assert_eq!(config.speed().unwrap(), SpeedLevel::from_fraction(0.8).unwrap());
    }
}
