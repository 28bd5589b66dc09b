//! Operator-driven manual focusing.
//!
//! The operator nudges the lens while watching the live metric and an edge
//! overlay; the loop around it (keyboard, display) belongs to the caller.

use crate::errors::{AcquisitionFailure, AutofocusError};
use crate::focus::actuator::{FocusActuator, FocusMotor};
use crate::focus::frame_source::FrameSource;
use crate::sharpness::{overlay_edges, CannyScorer};
use crate::types::FocusPosition;
use image::RgbImage;
use std::str::FromStr;

pub const DEFAULT_ASSIST_STEP: u32 = 100;

/// Operator command, one per input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistCommand {
    /// `i`: step toward the far stop
    StepIn,
    /// `o`: step toward the near stop
    StepOut,
    /// `s <n>`: change the step size
    SetStep(u32),
    /// `q`
    Quit,
}

impl FromStr for AssistCommand {
    type Err = AutofocusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let command = parts.next().unwrap_or("");
        match command {
            "i" => Ok(Self::StepIn),
            "o" => Ok(Self::StepOut),
            "q" => Ok(Self::Quit),
            "s" => {
                let value = parts
                    .next()
                    .ok_or_else(|| AutofocusError::config("'s' needs a step size"))?;
                let steps = value
                    .parse::<u32>()
                    .map_err(|_| AutofocusError::config(format!("invalid step size: {value}")))?;
                Ok(Self::SetStep(steps))
            }
            other => Err(AutofocusError::config(format!("unknown command: {other:?}"))),
        }
    }
}

/// Metric and edge overlay of one live frame.
#[derive(Debug, Clone)]
pub struct AssistSample {
    pub metric: f64,
    pub position: FocusPosition,
    pub overlay: RgbImage,
}

/// Manual focus session for one camera.
pub struct FocusAssist<'a, M: FocusMotor, F: FrameSource> {
    actuator: FocusActuator<'a, M>,
    frames: F,
    step_size: u32,
    edges: CannyScorer,
}

impl<'a, M: FocusMotor, F: FrameSource> FocusAssist<'a, M, F> {
    pub fn new(actuator: FocusActuator<'a, M>, frames: F) -> Self {
        Self {
            actuator,
            frames,
            step_size: DEFAULT_ASSIST_STEP,
            edges: CannyScorer::default(),
        }
    }

    pub fn step_size(&self) -> u32 {
        self.step_size
    }

    pub fn set_step_size(&mut self, steps: u32) -> Result<(), AutofocusError> {
        if steps == 0 {
            return Err(AutofocusError::config("step size must be greater than 0"));
        }
        self.step_size = steps;
        log::info!("Assist step size set to {}", steps);
        Ok(())
    }

    pub fn position(&self) -> FocusPosition {
        self.actuator.position()
    }

    pub fn actuator(&self) -> &FocusActuator<'a, M> {
        &self.actuator
    }

    pub fn step_in(&mut self) -> Result<(), AutofocusError> {
        self.actuator.move_far(self.step_size)
    }

    pub fn step_out(&mut self) -> Result<(), AutofocusError> {
        self.actuator.move_near(self.step_size)
    }

    /// Grab a frame, score it and build the edge overlay.
    pub fn sample(&mut self) -> Result<AssistSample, AcquisitionFailure> {
        let frame = self.frames.acquire_latest_frame()?;
        let edges = self.edges.edge_map(&frame.image.to_luma8());
        let overlay = overlay_edges(&frame.image.to_rgb8(), &edges);
        Ok(AssistSample {
            metric: frame.metric,
            position: self.actuator.position(),
            overlay,
        })
    }

    /// Apply one command. Returns false once the operator quits.
    pub fn apply(&mut self, command: AssistCommand) -> Result<bool, AutofocusError> {
        match command {
            AssistCommand::StepIn => self.step_in()?,
            AssistCommand::StepOut => self.step_out()?,
            AssistCommand::SetStep(steps) => self.set_step_size(steps)?,
            AssistCommand::Quit => return Ok(false),
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSleeper, ScriptedFrameSource, ScriptedMotor};
    use crate::timing::CancelToken;
    use std::time::Duration;

    #[test]
    fn test_parse_commands() {
        assert_eq!("i".parse::<AssistCommand>().unwrap(), AssistCommand::StepIn);
        assert_eq!("o".parse::<AssistCommand>().unwrap(), AssistCommand::StepOut);
        assert_eq!("s 25".parse::<AssistCommand>().unwrap(), AssistCommand::SetStep(25));
        assert_eq!(" q ".parse::<AssistCommand>().unwrap(), AssistCommand::Quit);
        assert!("s".parse::<AssistCommand>().is_err());
        assert!("s ten".parse::<AssistCommand>().is_err());
        assert!("x".parse::<AssistCommand>().is_err());
    }

    #[test]
    fn test_steps_move_the_tracked_position() {
        let sleeper = RecordingSleeper::new();
        let cancel = CancelToken::new();
        let actuator = FocusActuator::new(ScriptedMotor::new(), Duration::ZERO, &sleeper, &cancel);
        let mut assist = FocusAssist::new(actuator, ScriptedFrameSource::repeating(2.0));

        assert!(assist.apply(AssistCommand::StepIn).unwrap());
        assert!(assist.apply(AssistCommand::SetStep(30)).unwrap());
        assert!(assist.apply(AssistCommand::StepOut).unwrap());
        assert_eq!(assist.position(), 70);
        assert!(!assist.apply(AssistCommand::Quit).unwrap());
        assert_eq!(assist.actuator().motor().moves(), &[100, -30]);
    }

    #[test]
    fn test_zero_step_size_rejected() {
        let sleeper = RecordingSleeper::new();
        let cancel = CancelToken::new();
        let actuator = FocusActuator::new(ScriptedMotor::new(), Duration::ZERO, &sleeper, &cancel);
        let mut assist = FocusAssist::new(actuator, ScriptedFrameSource::repeating(2.0));

        assert!(assist.set_step_size(0).is_err());
        assert_eq!(assist.step_size(), DEFAULT_ASSIST_STEP);
    }

    #[test]
    fn test_sample_reports_metric_and_overlay() {
        let sleeper = RecordingSleeper::new();
        let cancel = CancelToken::new();
        let actuator = FocusActuator::new(ScriptedMotor::new(), Duration::ZERO, &sleeper, &cancel);
        let mut assist = FocusAssist::new(actuator, ScriptedFrameSource::new(vec![Some(4.5), None]));

        let sample = assist.sample().unwrap();
        assert_eq!(sample.metric, 4.5);
        assert_eq!(sample.position, 0);
        assert_eq!(sample.overlay.dimensions(), (1, 1));
        assert_eq!(assist.sample().unwrap_err(), AcquisitionFailure::GrabTimeout);
    }
}
