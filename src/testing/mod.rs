//! Testing utilities for the autofocus controller
//!
//! Synthetic focus charts, scripted adapter doubles and an in-process
//! Mantis simulator, so the whole pipeline runs offline without hardware.

pub mod scripted;
pub mod simulator;
pub mod synthetic_data;

pub use scripted::{RecordingSleeper, ScriptedFrameSource, ScriptedMotor};
pub use simulator::{SimulatedMantis, SimulatedMantisBuilder};
pub use synthetic_data::{defocused_target, encode_png, focus_target};
