//! Keyboard-driven motion control for a two-motor robot base.
//!
//! Motion commands are translated into per-side signed power, corrected for
//! mechanical drift, and handed to either an H-bridge duty-cycle backend or a
//! step/direction pulse-train backend.

pub mod config;
pub mod input;
pub mod messages;
pub mod motor;
pub mod runtime;
