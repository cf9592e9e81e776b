// Command sources: keyboard (crossterm raw mode) and scripted channels
//
// Both block until the next event. They also watch a shared interrupt flag
// (set by the signal handler) so a blocked read still notices termination.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing::{debug, warn};

use crate::config::INPUT_POLL;
use crate::messages::MotionCommand;

/// Error types for command sources
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Terminal error: {0}")]
    Terminal(#[from] std::io::Error),
}

/// What a command source produced
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Command(MotionCommand),
    /// A token with no command mapping; the loop skips it
    Ignored(String),
    /// External termination request (signal, Ctrl+C)
    Interrupted,
    /// The source has nothing more to give
    Closed,
}

impl SourceEvent {
    fn from_token(token: String) -> Self {
        match MotionCommand::from_token(&token) {
            Some(cmd) => SourceEvent::Command(cmd),
            None => SourceEvent::Ignored(token),
        }
    }
}

/// Blocking "get next command" contract of the control loop
pub trait CommandSource {
    fn next_event(&mut self) -> Result<SourceEvent, InputError>;
}

/// Shared flag raised when the process is asked to terminate
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tokens delivered over a channel. Used for scripted sessions and tests.
pub struct ChannelSource {
    rx: Receiver<String>,
    interrupt: Interrupt,
}

impl ChannelSource {
    pub fn new(rx: Receiver<String>, interrupt: Interrupt) -> Self {
        Self { rx, interrupt }
    }

    /// A source that yields `tokens` in order, then reports `Closed`
    pub fn scripted<I, T>(tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let (tx, rx) = mpsc::channel();
        for token in tokens {
            // Receiver is alive right here, send cannot fail
            let _ = tx.send(token.into());
        }
        Self::new(rx, Interrupt::new())
    }

    /// An open source plus the sender feeding it
    pub fn channel(interrupt: Interrupt) -> (Sender<String>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self::new(rx, interrupt))
    }
}

impl CommandSource for ChannelSource {
    fn next_event(&mut self) -> Result<SourceEvent, InputError> {
        loop {
            if self.interrupt.is_triggered() {
                return Ok(SourceEvent::Interrupted);
            }
            match self.rx.recv_timeout(INPUT_POLL) {
                Ok(token) => return Ok(SourceEvent::from_token(token)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(SourceEvent::Closed),
            }
        }
    }
}

/// Puts the terminal in raw mode for as long as it lives
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> std::io::Result<Self> {
        enable_raw_mode()?;
        Ok(RawModeGuard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!("Failed to restore terminal mode: {}", e);
        }
    }
}

/// Single key presses from the controlling terminal
pub struct KeyboardSource {
    _raw: RawModeGuard,
    interrupt: Interrupt,
    poll: Duration,
}

impl KeyboardSource {
    pub fn new(interrupt: Interrupt) -> Result<Self, InputError> {
        Ok(Self {
            _raw: RawModeGuard::enable()?,
            interrupt,
            poll: INPUT_POLL,
        })
    }
}

impl CommandSource for KeyboardSource {
    fn next_event(&mut self) -> Result<SourceEvent, InputError> {
        loop {
            if self.interrupt.is_triggered() {
                return Ok(SourceEvent::Interrupted);
            }
            if !event::poll(self.poll)? {
                continue;
            }
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind == KeyEventKind::Release {
                continue;
            }
            // Raw mode swallows SIGINT; Ctrl+C arrives as a key instead
            if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
                debug!("Ctrl+C pressed");
                self.interrupt.trigger();
                return Ok(SourceEvent::Interrupted);
            }
            return Ok(match MotionCommand::from_key(&key) {
                Some(cmd) => SourceEvent::Command(cmd),
                None => SourceEvent::Ignored(format!("{:?}", key.code)),
            });
        }
    }
}
