//! Scripted doubles for the focus adapters
//!
//! Let the search engine run against an exact metric sequence and an
//! in-memory motor, without images, devices or real sleeps.

use crate::errors::{AcquisitionFailure, AutofocusError};
use crate::focus::{FocusMotor, FrameSource};
use crate::timing::Sleeper;
use crate::types::FrameSample;
use image::{DynamicImage, GrayImage};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Frame source replaying a fixed metric sequence.
///
/// `None` entries, and any call past the end of the script, yield
/// `GrabTimeout` unless a repeating metric was configured.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFrameSource {
    script: VecDeque<Option<f64>>,
    repeat: Option<f64>,
    calls: u32,
}

impl ScriptedFrameSource {
    pub fn new(script: Vec<Option<f64>>) -> Self {
        Self {
            script: script.into(),
            repeat: None,
            calls: 0,
        }
    }

    /// Source returning `metric` forever.
    pub fn repeating(metric: f64) -> Self {
        Self {
            script: VecDeque::new(),
            repeat: Some(metric),
            calls: 0,
        }
    }

    /// Continue with `metric` once the script runs out.
    pub fn then_repeat(mut self, metric: f64) -> Self {
        self.repeat = Some(metric);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl FrameSource for ScriptedFrameSource {
    fn acquire_latest_frame(&mut self) -> Result<FrameSample, AcquisitionFailure> {
        self.calls += 1;
        let next = match self.script.pop_front() {
            Some(entry) => entry,
            None => self.repeat,
        };
        match next {
            Some(metric) => Ok(FrameSample::new(
                DynamicImage::ImageLuma8(GrayImage::new(1, 1)),
                metric,
                u64::from(self.calls),
            )),
            None => Err(AcquisitionFailure::GrabTimeout),
        }
    }
}

/// In-memory focus motor recording every command.
#[derive(Debug, Clone, Default)]
pub struct ScriptedMotor {
    moves: Vec<i64>,
    homes: u32,
    commands: u32,
    fail_from: Option<u32>,
}

impl ScriptedMotor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the `n`-th command (1-based, homes included) and all later ones.
    pub fn fail_on_command(mut self, n: u32) -> Self {
        self.fail_from = Some(n);
        self
    }

    /// Signed relative moves that reached the motor; far is positive.
    pub fn moves(&self) -> &[i64] {
        &self.moves
    }

    /// 0-step home commands received.
    pub fn homes(&self) -> u32 {
        self.homes
    }

    pub fn commands(&self) -> u32 {
        self.commands
    }

    fn command(&mut self, signed: i64, direction: &str) -> Result<(), AutofocusError> {
        self.commands += 1;
        if self.fail_from.is_some_and(|n| self.commands >= n) {
            return Err(AutofocusError::actuator(
                0,
                format!("scripted rejection of step {} command {}", direction, self.commands),
            ));
        }
        if signed == 0 {
            self.homes += 1;
        } else {
            self.moves.push(signed);
        }
        Ok(())
    }
}

impl FocusMotor for ScriptedMotor {
    fn step_near(&mut self, steps: u32) -> Result<(), AutofocusError> {
        self.command(-i64::from(steps), "near")
    }

    fn step_far(&mut self, steps: u32) -> Result<(), AutofocusError> {
        self.command(i64::from(steps), "far")
    }
}

/// Sleeper that records requested waits instead of blocking.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn durations(&self) -> Vec<Duration> {
        self.waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self) -> usize {
        self.waits.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn total(&self) -> Duration {
        self.waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_then_timeouts() {
        let mut source = ScriptedFrameSource::new(vec![Some(1.0), None]);
        assert_eq!(source.acquire_latest_frame().unwrap().metric, 1.0);
        assert_eq!(
            source.acquire_latest_frame().unwrap_err(),
            AcquisitionFailure::GrabTimeout
        );
        assert!(source.acquire_latest_frame().is_err());
        assert_eq!(source.calls(), 3);
    }

    #[test]
    fn test_then_repeat() {
        let mut source = ScriptedFrameSource::new(vec![Some(1.0)]).then_repeat(0.5);
        assert_eq!(source.acquire_latest_frame().unwrap().metric, 1.0);
        assert_eq!(source.acquire_latest_frame().unwrap().metric, 0.5);
        assert_eq!(source.acquire_latest_frame().unwrap().metric, 0.5);
    }

    #[test]
    fn test_motor_failure_is_sticky() {
        let mut motor = ScriptedMotor::new().fail_on_command(2);
        assert!(motor.step_far(10).is_ok());
        assert!(motor.step_far(10).is_err());
        assert!(motor.step_near(0).is_err());
        assert_eq!(motor.moves(), &[10]);
        assert_eq!(motor.homes(), 0);
    }
}
